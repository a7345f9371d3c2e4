//! Request pipeline
//!
//! Runs the gateway's checks in a fixed order in front of every route:
//!
//! 1. **Rate check**: every request, public or not, is counted against its
//!    client's quota. Over quota ends the request with 429.
//! 2. **Route classification**: public paths skip authentication.
//! 3. **Credential extraction**: no `Bearer` credential means the request is
//!    forwarded anonymously; handlers that need a principal reject it.
//! 4. **Validation**: a supplied credential that fails any check ends the
//!    request with 401 and a generic message.
//! 5. **Principal binding**: the validated principal is attached to the
//!    request extensions before forwarding.
//!
//! Each stage either continues or short-circuits with a [`Rejection`];
//! nothing after a rejection runs and the downstream handler never sees it.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::middleware::auth::{bearer_token, AuthError, Principal, TokenAuthenticator};
use crate::middleware::metrics::GatewayMetrics;
use crate::middleware::rate_limit::{add_rate_limit_headers, Decision, RateLimitError, RateLimiter};

/// Client identifier used when the peer address is unknown
pub const UNKNOWN_CLIENT: &str = "unknown";

// ============================================================================
// Route classification
// ============================================================================

/// Decides which paths bypass authentication
#[derive(Debug, Clone, Default)]
pub struct RoutePolicy {
    public_prefixes: Vec<String>,
}

impl RoutePolicy {
    pub fn new<I, S>(public_prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            public_prefixes: public_prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// A path is public when it equals a prefix or continues it with `/`
    ///
    /// `/auth/` matches `/auth/login`; `/health` matches `/health` and
    /// `/health/live` but not `/healthz`.
    pub fn is_public(&self, path: &str) -> bool {
        self.public_prefixes.iter().any(|prefix| {
            let base = prefix.trim_end_matches('/');
            if base.is_empty() {
                return prefix == "/" && path == "/";
            }
            match path.strip_prefix(base) {
                Some("") => true,
                Some(rest) => rest.starts_with('/'),
                None => false,
            }
        })
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Why the pipeline ended a request early
#[derive(Debug)]
pub enum Rejection {
    RateExceeded(RateLimitError),
    Unauthorized(AuthError),
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        match self {
            Rejection::RateExceeded(err) => err.into_response(),
            Rejection::Unauthorized(err) => err.into_response(),
        }
    }
}

/// A request the pipeline let through
#[derive(Debug, Clone)]
pub struct Admission {
    pub decision: Decision,
    /// `None` for public routes and anonymous requests
    pub principal: Option<Principal>,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Rate limiting and authentication in front of the downstream handlers
#[derive(Clone)]
pub struct Pipeline {
    limiter: RateLimiter,
    authenticator: TokenAuthenticator,
    routes: Arc<RoutePolicy>,
    metrics: GatewayMetrics,
    trust_forwarded_for: bool,
}

impl Pipeline {
    pub fn new(
        limiter: RateLimiter,
        authenticator: TokenAuthenticator,
        routes: RoutePolicy,
        metrics: GatewayMetrics,
        trust_forwarded_for: bool,
    ) -> Self {
        Self {
            limiter,
            authenticator,
            routes: Arc::new(routes),
            metrics,
            trust_forwarded_for,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Run every stage for one request
    ///
    /// On success the request carries the bound [`Principal`] (if any) in
    /// its extensions and is ready to forward.
    pub async fn process(&self, client_id: &str, request: &mut Request) -> Result<Admission, Rejection> {
        let decision = self.check_rate(client_id)?;

        if self.routes.is_public(request.uri().path()) {
            return Ok(Admission {
                decision,
                principal: None,
            });
        }

        let Some(token) = self.extract_credential(client_id, request)? else {
            return Ok(Admission {
                decision,
                principal: None,
            });
        };

        let principal = self.validate_credential(client_id, &token).await?;
        request.extensions_mut().insert(principal.clone());

        Ok(Admission {
            decision,
            principal: Some(principal),
        })
    }

    /// Stage 1: admission control
    fn check_rate(&self, client_id: &str) -> Result<Decision, Rejection> {
        let decision = self.limiter.admit(client_id);
        self.metrics.record_decision(decision.is_allowed());

        match decision {
            Decision::Reject {
                count,
                retry_after_seconds,
            } => {
                tracing::warn!(
                    client = %client_id,
                    count = count,
                    limit = self.limiter.config().max_requests,
                    retry_after_seconds = retry_after_seconds,
                    "Rate limit exceeded"
                );
                Err(Rejection::RateExceeded(RateLimitError { retry_after_seconds }))
            }
            allowed => Ok(allowed),
        }
    }

    /// Stage 3: credential extraction
    ///
    /// `Ok(None)` means no credential was supplied. The token is copied out
    /// so no borrow of the request is held across the validation await.
    fn extract_credential(&self, client_id: &str, request: &Request) -> Result<Option<String>, Rejection> {
        match bearer_token(request.headers()) {
            Ok(token) => Ok(Some(token.to_owned())),
            Err(AuthError::MalformedCredential) => {
                tracing::debug!(client = %client_id, "No bearer credential, forwarding as anonymous");
                self.metrics.record_auth("anonymous");
                Ok(None)
            }
            Err(err) => Err(self.reject_auth(client_id, err)),
        }
    }

    /// Stage 4: validation against the token service and user directory
    async fn validate_credential(&self, client_id: &str, token: &str) -> Result<Principal, Rejection> {
        match self.authenticator.authenticate(token).await {
            Ok(principal) => {
                tracing::debug!(
                    client = %client_id,
                    subject = %principal.subject,
                    authorities = ?principal.authorities,
                    "Principal bound to request"
                );
                self.metrics.record_auth("authenticated");
                Ok(principal)
            }
            Err(err) => Err(self.reject_auth(client_id, err)),
        }
    }

    fn reject_auth(&self, client_id: &str, err: AuthError) -> Rejection {
        // Detail goes to the log only; the response is generic
        tracing::warn!(client = %client_id, kind = err.kind(), error = %err, "Authentication failed");
        self.metrics.record_auth(err.kind());
        Rejection::Unauthorized(err)
    }

    /// Identify the caller for rate limiting
    ///
    /// Uses the transport peer address, or the first `X-Forwarded-For` hop
    /// when the gateway is configured to trust its proxy.
    pub fn client_id(&self, request: &Request) -> String {
        if self.trust_forwarded_for {
            let forwarded = request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.split(',').next())
                .map(str::trim)
                .filter(|ip| !ip.is_empty());
            if let Some(ip) = forwarded {
                return ip.to_string();
            }
        }

        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Middleware running the [`Pipeline`] before the wrapped routes
///
/// # Example
///
/// ```ignore
/// Router::new()
///     .layer(axum::middleware::from_fn_with_state(pipeline, enforce))
/// ```
pub async fn enforce(State(pipeline): State<Pipeline>, mut request: Request, next: Next) -> Response {
    let client_id = pipeline.client_id(&request);

    let response = match pipeline.process(&client_id, &mut request).await {
        Ok(admission) => {
            let mut response = next.run(request).await;
            if let Decision::Allow {
                remaining: Some(remaining),
            } = admission.decision
            {
                add_rate_limit_headers(
                    &mut response,
                    pipeline.limiter.config().max_requests,
                    remaining,
                );
            }
            response
        }
        Err(rejection) => rejection.into_response(),
    };

    pipeline.metrics.record_response(response.status().as_u16());
    response
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RateLimitConfig;
    use crate::services::directory::{AuthorityResolver, InMemoryUserDirectory, UserRecord};
    use crate::services::token::TokenService;
    use axum::body::Body;
    use axum::http::{header, StatusCode};
    use chrono::Duration;

    const SECRET: &[u8] = b"pipeline-test-secret-at-least-32-bytes!";

    struct Fixture {
        clock: ManualClock,
        tokens: Arc<TokenService>,
        pipeline: Pipeline,
    }

    fn fixture(max_requests: u32) -> Fixture {
        let clock = ManualClock::at_timestamp(1_700_000_000);
        let tokens =
            Arc::new(TokenService::new(SECRET, Duration::seconds(600), clock.shared()).unwrap());
        let directory = Arc::new(InMemoryUserDirectory::from_records([UserRecord::new(
            "alice",
            "unused",
            ["USER"],
        )]));
        let limiter = RateLimiter::new(
            RateLimitConfig {
                enabled: true,
                max_requests,
                window_seconds: 60,
                idle_eviction_seconds: 600,
            },
            clock.shared(),
        );
        let pipeline = Pipeline::new(
            limiter,
            TokenAuthenticator::new(tokens.clone(), AuthorityResolver::new(directory, None)),
            RoutePolicy::new(["/auth/", "/health"]),
            GatewayMetrics::new().unwrap(),
            false,
        );
        Fixture {
            clock,
            tokens,
            pipeline,
        }
    }

    fn request(path: &str, bearer: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(path);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_route_policy() {
        let routes = RoutePolicy::new(["/auth/", "/health", "/swagger-ui.html"]);
        assert!(routes.is_public("/auth/login"));
        assert!(routes.is_public("/auth"));
        assert!(routes.is_public("/health"));
        assert!(routes.is_public("/health/live"));
        assert!(routes.is_public("/swagger-ui.html"));
        assert!(!routes.is_public("/healthz"));
        assert!(!routes.is_public("/authx"));
        assert!(!routes.is_public("/api/tickets"));
    }

    #[tokio::test]
    async fn test_valid_token_binds_principal() {
        let f = fixture(10);
        let token = f.tokens.issue(&Principal::new("alice", ["USER"])).unwrap();
        let mut req = request("/api/me", Some(&token));

        let admission = f.pipeline.process("10.0.0.1", &mut req).await.unwrap();

        assert_eq!(admission.principal.unwrap().subject, "alice");
        assert_eq!(req.extensions().get::<Principal>().unwrap().subject, "alice");
    }

    #[tokio::test]
    async fn test_missing_credential_forwards_anonymously() {
        let f = fixture(10);
        let mut req = request("/api/me", None);

        let admission = f.pipeline.process("10.0.0.1", &mut req).await.unwrap();

        assert!(admission.principal.is_none());
        assert!(req.extensions().get::<Principal>().is_none());
    }

    #[tokio::test]
    async fn test_invalid_token_is_rejected_not_anonymous() {
        let f = fixture(10);
        let mut req = request("/api/me", Some("not.a.token"));

        let result = f.pipeline.process("10.0.0.1", &mut req).await;

        assert!(matches!(result, Err(Rejection::Unauthorized(AuthError::InvalidToken(_)))));
    }

    #[tokio::test]
    async fn test_empty_bearer_is_rejected() {
        let f = fixture(10);
        let mut req = Request::builder()
            .uri("/api/me")
            .header(header::AUTHORIZATION, "Bearer ")
            .body(Body::empty())
            .unwrap();

        let result = f.pipeline.process("10.0.0.1", &mut req).await;

        assert!(matches!(result, Err(Rejection::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let f = fixture(10);
        let token = f.tokens.issue(&Principal::new("alice", ["USER"])).unwrap();
        f.clock.advance(Duration::seconds(600));
        let mut req = request("/api/me", Some(&token));

        let result = f.pipeline.process("10.0.0.1", &mut req).await;

        assert!(matches!(result, Err(Rejection::Unauthorized(AuthError::ExpiredToken))));
    }

    #[tokio::test]
    async fn test_public_route_ignores_bad_token_but_is_rate_limited() {
        let f = fixture(1);
        let mut first = request("/auth/login", Some("garbage"));
        assert!(f.pipeline.process("10.0.0.1", &mut first).await.is_ok());

        let mut second = request("/auth/login", None);
        assert!(matches!(
            f.pipeline.process("10.0.0.1", &mut second).await,
            Err(Rejection::RateExceeded(_))
        ));
    }

    #[tokio::test]
    async fn test_rate_check_precedes_authentication() {
        let f = fixture(1);
        let token = f.tokens.issue(&Principal::new("alice", ["USER"])).unwrap();

        let mut first = request("/api/me", Some(&token));
        assert!(f.pipeline.process("10.0.0.1", &mut first).await.is_ok());

        let mut second = request("/api/me", Some(&token));
        let result = f.pipeline.process("10.0.0.1", &mut second).await;

        assert!(matches!(result, Err(Rejection::RateExceeded(_))));
        assert!(second.extensions().get::<Principal>().is_none());
    }

    #[tokio::test]
    async fn test_rejection_responses() {
        let response = Rejection::RateExceeded(RateLimitError {
            retry_after_seconds: 5,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = Rejection::Unauthorized(AuthError::ExpiredToken).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_client_id_from_peer_address() {
        let f = fixture(10);
        let req = Request::builder()
            .uri("/")
            .extension(ConnectInfo(SocketAddr::from(([192, 168, 1, 7], 51000))))
            .body(Body::empty())
            .unwrap();

        assert_eq!(f.pipeline.client_id(&req), "192.168.1.7");
        assert_eq!(f.pipeline.client_id(&request("/", None)), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_forwarded_for_only_when_trusted() {
        let mut f = fixture(10);
        let req = Request::builder()
            .uri("/")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .extension(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 443))))
            .body(Body::empty())
            .unwrap();

        assert_eq!(f.pipeline.client_id(&req), "10.0.0.1");

        f.pipeline.trust_forwarded_for = true;
        assert_eq!(f.pipeline.client_id(&req), "203.0.113.9");
    }
}
