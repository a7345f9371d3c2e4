//! GET /metrics

use axum::{extract::State, http::header, response::IntoResponse};

use crate::error::ApiError;
use crate::server::state::AppState;

/// Prometheus text exposition of the gateway counters
pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let body = state.metrics.render().map_err(anyhow::Error::from)?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    ))
}
