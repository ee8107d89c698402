//! Liveness handler

use crate::api::rest::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    /// Runtimes with a cached engine
    pub managed_runtimes: usize,
    /// Runtimes waiting for a reconcile
    pub queued: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: state.version,
        uptime_secs: state.uptime_secs(),
        managed_runtimes: state.controller.managed(),
        queued: state.controller.queued(),
    })
}
