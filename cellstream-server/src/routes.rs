//! HTTP routes.

use axum::{Json, Router, extract::State, routing::get};
use cellstream_core::types::ServiceStatus;
use cellstream_telemetry::metrics::render_metrics;
use serde::Serialize;
use std::sync::Arc;

use crate::config::SessionConfig;
use crate::server::DataServer;
use crate::ws::ws_handler;

/// State shared by every route.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The distribution server
    pub server: Arc<DataServer>,
    /// Per-session settings applied to new sockets
    pub session: SessionConfig,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Whether published values are being distributed
    pub running: bool,
    /// Status reported to clients
    pub service_status: ServiceStatus,
    /// Registered sessions
    pub sessions: usize,
    /// Live keys across all categories
    pub live_keys: usize,
    /// Server version
    pub version: &'static str,
}

/// Builds the router: the WebSocket endpoint at `ws_path`, plus `/health`
/// and `/metrics`.
pub fn create_router(state: Arc<AppState>, ws_path: &str) -> Router {
    Router::new()
        .route(ws_path, get(ws_handler))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let stats = state.server.stats();
    Json(HealthResponse {
        running: state.server.is_running(),
        service_status: state.server.service_status(),
        sessions: stats.sessions,
        live_keys: stats.position_keys + stats.portfolio_keys + stats.system_keys,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn metrics() -> String {
    render_metrics()
}
