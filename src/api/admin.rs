//! Administrative endpoints

use axum::{extract::State, Json};
use serde::Serialize;

use crate::error::ApiError;
use crate::middleware::CurrentPrincipal;
use crate::server::state::AppState;

/// Authority required by the admin routes
pub const ADMIN_AUTHORITY: &str = "ADMIN";

#[derive(Debug, Serialize)]
pub struct RateLimitStatus {
    pub enabled: bool,
    pub max_requests: u32,
    pub window_seconds: u64,
    pub tracked_clients: usize,
}

/// GET /api/admin/rate-limit
///
/// Current limiter configuration and load. Requires the `ADMIN` authority.
pub async fn rate_limit_status(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> Result<Json<RateLimitStatus>, ApiError> {
    if !principal.has_authority(ADMIN_AUTHORITY) {
        tracing::warn!(subject = %principal.subject, "Admin route denied");
        return Err(ApiError::Forbidden(format!(
            "{} authority required",
            ADMIN_AUTHORITY
        )));
    }

    let limiter = state.pipeline.limiter();
    let config = limiter.config();

    Ok(Json(RateLimitStatus {
        enabled: config.enabled,
        max_requests: config.max_requests,
        window_seconds: config.window_seconds,
        tracked_clients: limiter.tracked_clients(),
    }))
}
