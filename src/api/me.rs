//! GET /api/me

use axum::Json;
use serde::{Deserialize, Serialize};

use crate::middleware::CurrentPrincipal;

/// The authenticated caller as the gateway sees it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUserResponse {
    pub username: String,
    pub role: Option<String>,
    pub authorities: Vec<String>,
}

/// Echo the principal bound by the pipeline; anonymous callers get 401
pub async fn current_user(CurrentPrincipal(principal): CurrentPrincipal) -> Json<CurrentUserResponse> {
    Json(CurrentUserResponse {
        role: principal.primary_authority().map(str::to_string),
        username: principal.subject,
        authorities: principal.authorities,
    })
}
