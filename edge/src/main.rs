//! SmartPiXL edge — the HTTP ingestion process.

mod behavior_tracker;
mod capture;
mod config;
mod datacenter;
mod enrich;
mod fingerprint_tracker;
mod gif;
mod geo_cache;
mod handoff;
mod http;
mod ip_classifier;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pixl_edge=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting pixl-edge");

    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    let enricher = Arc::new(enrich::EdgeEnricher::new(db_pool.clone()));

    spawn_cidr_refresher(Arc::clone(&enricher), &config);
    spawn_geo_eviction(Arc::clone(&enricher));

    let handoff = handoff::HandoffChannel::new(
        &config.endpoint_name,
        config.queue_capacity,
        &config.failover_directory,
    );
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_seconds);
    let writer_shutdown = handoff.spawn_writer(shutdown_timeout);

    let state = http::AppState { enricher, handoff };
    let app = http::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "edge listening");

    let shutdown_signal = async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C signal handler");
        info!("received shutdown signal, draining handoff queue");
        let _ = writer_shutdown.send(true);
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;

    info!("edge shutdown complete");
    Ok(())
}

/// Weekly (by default) CIDR feed refresh, per spec §4.3.
fn spawn_cidr_refresher(enricher: Arc<enrich::EdgeEnricher>, config: &config::Config) {
    let interval = Duration::from_secs(config.cidr_refresh_interval_seconds);
    let aws_url = config.aws_ranges_url.clone();
    let gcp_url = config.gcp_ranges_url.clone();

    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let entries = datacenter::fetch_cidr_entries(&client, &aws_url, &gcp_url).await;
            if entries.is_empty() {
                tracing::warn!(
                    kept = enricher.datacenter.len(),
                    "cidr refresh failed, keeping stale entries"
                );
            } else {
                let n = entries.len();
                enricher.datacenter.replace(entries);
                tracing::info!(refreshed = n, "cidr refresh complete");
            }
        }
    });
}

/// Periodic bulk eviction of stale `GeoCache` tier-1 entries.
fn spawn_geo_eviction(enricher: Arc<enrich::EdgeEnricher>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(3600));
        loop {
            ticker.tick().await;
            enricher.geo.evict_stale();
        }
    });
}
