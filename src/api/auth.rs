//! Login endpoint
//!
//! POST /auth/login

use axum::{extract::State, Json};
use validator::Validate;

use crate::error::ApiError;
use crate::schemas::{LoginRequest, LoginResponse};
use crate::server::state::AppState;

/// Exchange a username and password for a bearer token
///
/// Unknown users and wrong passwords get the same 401 so the response does
/// not reveal which usernames exist.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    request.validate()?;

    let principal = state
        .authenticator
        .authenticate(&request.username, &request.password)
        .await
        .map_err(|e| {
            tracing::warn!(username = %request.username, error = %e, "Login failed");
            ApiError::from(e)
        })?;

    let role = principal
        .primary_authority()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("user {} has no authorities", principal.subject))?;

    let token = state.tokens.issue(&principal)?;
    let expires_at = state.tokens.expiry_of(&token)?;

    tracing::info!(
        username = %principal.subject,
        role = %role,
        expires_at = %expires_at,
        "Login succeeded"
    );

    Ok(Json(LoginResponse {
        token,
        username: principal.subject,
        role,
        expires_at,
    }))
}
