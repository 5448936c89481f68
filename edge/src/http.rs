//! HTTP ingest endpoints: the pixel GIF, the fingerprinting script, and
//! health/readiness probes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::capture;
use crate::enrich::EdgeEnricher;
use crate::gif::{PIXEL_GIF, PIXEL_SCRIPT};
use crate::handoff::writer::ConnState;
use crate::handoff::HandoffChannel;

#[derive(Clone)]
pub struct AppState {
    pub enricher: Arc<EdgeEnricher>,
    pub handoff: HandoffChannel,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/{company_id}/{filename}", get(pixel_handler))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn pixel_handler(
    State(state): State<AppState>,
    Path((_company_id, filename)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: axum::extract::Request,
) -> Response {
    let query_string = query.unwrap_or_default();

    if filename.ends_with("_SMART.js") {
        return (
            [(header::CONTENT_TYPE, "application/javascript")],
            PIXEL_SCRIPT,
        )
            .into_response();
    }

    if !filename.ends_with("_SMART.GIF") {
        return StatusCode::NOT_FOUND.into_response();
    }

    let peer = connect_info.map(|c| c.0);
    let mut hit = capture::capture(request.uri().path(), &query_string, &headers, peer);
    state.enricher.enrich(&mut hit);
    state.handoff.enqueue(hit);

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        PIXEL_GIF,
    )
        .into_response()
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    handoff_state: &'static str,
    primary_dropped: u64,
    failover_queue_depth: usize,
    geo_refill_failures: u64,
    datacenter_entries: usize,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthBody> {
    Json(health_body(&state))
}

async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<HealthBody>) {
    let body = health_body(&state);
    let status = if matches!(state.handoff.state(), ConnState::Connected | ConnState::Disconnected) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

fn health_body(state: &AppState) -> HealthBody {
    HealthBody {
        status: "ok",
        handoff_state: match state.handoff.state() {
            ConnState::Disconnected => "disconnected",
            ConnState::Connecting => "connecting",
            ConnState::Connected => "connected",
            ConnState::Draining => "draining",
        },
        primary_dropped: state.handoff.primary_dropped_count(),
        failover_queue_depth: state.handoff.failover_queue_depth(),
        geo_refill_failures: state.enricher.geo.refill_failure_count(),
        datacenter_entries: state.enricher.datacenter.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_and_script_filenames_are_distinguished_by_suffix() {
        assert!("0001_SMART.GIF".ends_with("_SMART.GIF"));
        assert!("0001_SMART.js".ends_with("_SMART.js"));
        assert!(!"0001_SMART.js".ends_with("_SMART.GIF"));
    }
}
