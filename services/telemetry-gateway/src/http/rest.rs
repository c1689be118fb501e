//! Polling endpoints

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use super::AppState;
use crate::history::HistorySample;
use crate::link_health::ConnectionReport;
use crate::vehicle_state::NormalizedVehicleState;

/// Synchronous counterpart of the stream event, plus history for charts
#[derive(Debug, Serialize)]
pub struct TelemetryResponse {
    pub success: bool,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: i64,
    pub snapshot: Arc<NormalizedVehicleState>,
    pub connection: ConnectionReport,
    pub history: Vec<HistorySample>,
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

/// Current snapshot
pub async fn get_telemetry(State(state): State<Arc<AppState>>) -> Json<TelemetryResponse> {
    Json(TelemetryResponse {
        success: true,
        kind: "telemetry",
        timestamp: chrono::Utc::now().timestamp_millis(),
        snapshot: state.store.snapshot(),
        connection: state.link.borrow().clone(),
        history: state.broadcaster.history(),
    })
}

/// Rolling altitude/speed history, oldest first
pub async fn get_history(State(state): State<Arc<AppState>>) -> Json<Vec<HistorySample>> {
    Json(state.broadcaster.history())
}
