//! HTTP egress: polling REST, SSE stream and WebSocket

mod rest;
mod sse;
mod ws;

use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::broadcaster::Broadcaster;
use crate::link_health::ConnectionReport;
use crate::vehicle_state::VehicleStateStore;

/// Shared application state
pub struct AppState {
    pub store: Arc<VehicleStateStore>,
    pub broadcaster: Broadcaster,
    pub link: watch::Receiver<ConnectionReport>,
}

/// Build the HTTP/WebSocket router
pub fn router(state: Arc<AppState>) -> Router {
    // The dashboard is served from another origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/telemetry", get(rest::get_telemetry))
        .route("/api/telemetry/history", get(rest::get_history))
        .route("/api/telemetry/stream", get(sse::sse_handler))
        .route("/health", get(rest::health_check))
        .layer(cors)
        .with_state(state)
}
