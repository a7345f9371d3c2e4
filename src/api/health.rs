//! Health check endpoints
//!
//! Public probes for monitoring and container orchestration.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::server::state::AppState;

/// Response for the main health check endpoint
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub uptime_seconds: u64,
    pub rate_limit_enabled: bool,
    /// Clients with a live rate-limit counter
    pub tracked_clients: usize,
}

/// Response for liveness probe
#[derive(Serialize)]
pub struct LivenessResponse {
    pub alive: bool,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let limiter = state.pipeline.limiter();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.settings.app_version.clone(),
        environment: state.settings.environment.to_string(),
        uptime_seconds: state.uptime_seconds(),
        rate_limit_enabled: limiter.config().enabled,
        tracked_clients: limiter.tracked_clients(),
    })
}

/// GET /health/live
///
/// If we can respond, we're alive.
pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { alive: true })
}
