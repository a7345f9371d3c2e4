//! Application routing
//!
//! This module defines all HTTP routes for the application.

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::api::{admin, auth, health, me, metrics};
use crate::middleware::{enforce, log_request, security_headers, REQUEST_ID_HEADER, TRACE_ID_HEADER};
use crate::server::state::AppState;

/// Create the main application router
///
/// Every request, public or not and including CORS preflights, goes
/// through the request pipeline. Public paths are only exempt from
/// authentication, never from rate limiting.
pub fn create_router(state: AppState) -> Router {
    // Public by default (see DEFAULT_PUBLIC_PATHS)
    let public_routes = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::liveness))
        .route("/metrics", get(metrics::metrics));

    let api_routes = Router::new()
        .route("/me", get(me::current_user))
        .route("/admin/rate-limit", get(admin::rate_limit_status));

    // Layer order: last added = outermost = runs first.
    // CORS answers preflights itself, so it sits inside the pipeline and
    // preflights are counted like any other request.
    Router::new()
        .merge(public_routes)
        .nest("/api", api_routes)
        .layer(create_cors_layer(&state.settings.cors_allowed_origin))
        .layer(middleware::from_fn_with_state(state.pipeline.clone(), enforce))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// CORS for the configured front-end origin
fn create_cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
        .expose_headers([
            HeaderName::from_static(TRACE_ID_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            header::RETRY_AFTER,
        ]);

    match HeaderValue::from_str(origin) {
        Ok(value) => layer.allow_origin(value),
        Err(e) => {
            tracing::warn!(origin = %origin, error = %e, "Invalid CORS origin, cross-origin requests disabled");
            layer
        }
    }
}
