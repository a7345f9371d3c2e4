//! Middleware module
//!
//! Contains the request pipeline (rate limiting and bearer authentication)
//! plus logging, security header and metrics support.

pub mod auth;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod rate_limit;
pub mod security;

// Re-export commonly used items
pub use auth::{AuthError, CurrentPrincipal, Principal, TokenAuthenticator};
pub use logging::{log_request, TraceId, REQUEST_ID_HEADER, TRACE_ID_HEADER};
pub use metrics::GatewayMetrics;
pub use pipeline::{enforce, Pipeline, RoutePolicy};
pub use rate_limit::{Decision, RateLimitError, RateLimiter};
pub use security::security_headers;
