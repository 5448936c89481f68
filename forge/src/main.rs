//! SmartPiXL forge — the background enrichment process.

mod bulk_writer;
mod client_fields;
mod config;
mod db;
mod enrich;
mod health;
mod receiver;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use pixl_common::Hit;
use tokio::sync::mpsc;
use tracing::info;

use bulk_writer::BulkWriter;
use enrich::ForgeEnricher;
use health::HealthCounters;

const ENRICHMENT_QUEUE_CAPACITY: usize = 10_000;
const ENRICHMENT_WORKER_COUNT: usize = 4;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pixl_forge=debug".into()),
        )
        .json()
        .init();

    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting pixl-forge");

    let db_pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&db_pool).await?;

    let enricher = Arc::new(ForgeEnricher::new(db_pool.clone(), &config));
    enricher.prime().await;

    let counters = Arc::new(HealthCounters::default());

    let (raw_tx, raw_rx) = mpsc::channel::<Hit>(ENRICHMENT_QUEUE_CAPACITY);
    let (enriched_tx, enriched_rx) = mpsc::channel::<Hit>(ENRICHMENT_QUEUE_CAPACITY);

    tokio::spawn(health::serve(
        config.health_port,
        Arc::clone(&counters),
        raw_tx.clone(),
        enriched_tx.clone(),
        db_pool.clone(),
    ));

    let worker_handles = spawn_enrichment_workers(Arc::clone(&enricher), raw_rx, enriched_tx);

    let bulk_writer = BulkWriter::new(db_pool, config.batch_size, Arc::clone(&counters));
    let shutdown_deadline = Duration::from_secs(config.shutdown_timeout_seconds);
    let bulk_writer_handle = tokio::spawn(async move {
        bulk_writer.run(enriched_rx, shutdown_deadline).await;
    });

    let endpoint = PathBuf::from(&config.endpoint_name);
    let listener_handle = tokio::spawn(receiver::run_listener(
        endpoint,
        config.max_concurrent_pipe_instances,
        raw_tx.clone(),
        Arc::clone(&counters),
    ));

    let failover_dir = PathBuf::from(&config.failover_directory);
    let catch_up_handle = tokio::spawn(receiver::run_catch_up(failover_dir, raw_tx.clone(), counters));

    tokio::signal::ctrl_c().await.expect("failed to install CTRL+C signal handler");
    info!("received shutdown signal, draining enrichment and bulk-write queues");

    listener_handle.abort();
    catch_up_handle.abort();
    drop(raw_tx);

    for handle in worker_handles {
        let _ = handle.await;
    }
    let _ = bulk_writer_handle.await;

    info!("forge shutdown complete");
    Ok(())
}

fn spawn_enrichment_workers(
    enricher: Arc<ForgeEnricher>,
    raw_rx: mpsc::Receiver<Hit>,
    enriched_tx: mpsc::Sender<Hit>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let raw_rx = Arc::new(tokio::sync::Mutex::new(raw_rx));
    (0..ENRICHMENT_WORKER_COUNT)
        .map(|_| {
            let enricher = Arc::clone(&enricher);
            let raw_rx = Arc::clone(&raw_rx);
            let enriched_tx = enriched_tx.clone();
            tokio::spawn(async move {
                loop {
                    let hit = {
                        let mut guard = raw_rx.lock().await;
                        guard.recv().await
                    };
                    let Some(mut hit) = hit else {
                        break;
                    };
                    enricher.enrich(&mut hit).await;
                    if enriched_tx.send(hit).await.is_err() {
                        break;
                    }
                }
            })
        })
        .collect()
}
