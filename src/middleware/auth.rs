//! Bearer token authentication
//!
//! This module turns an `Authorization: Bearer <token>` header into a
//! [`Principal`]. The token only vouches for the subject; the authorities
//! attached to the request are always re-read from the user directory, so a
//! user whose roles changed (or who was removed) loses access on the next
//! request, or within the authority cache TTL when one is configured, even
//! while holding an unexpired token.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::error::ErrorResponse;
use crate::services::directory::{AuthorityResolver, DirectoryError};
use crate::services::token::{TokenError, TokenService};

/// Generic message for every failed credential; never says which check failed
pub const INVALID_CREDENTIAL_MESSAGE: &str = "Invalid or expired token";

// ============================================================================
// Principal
// ============================================================================

/// Authenticated identity bound to a request
///
/// Inserted into request extensions by the pipeline after a token validates.
/// Handlers read it through [`CurrentPrincipal`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub subject: String,
    /// Ordered, duplicate-free authority names
    pub authorities: Vec<String>,
}

impl Principal {
    /// Build a principal, keeping the first occurrence of each authority
    pub fn new<I, A>(subject: impl Into<String>, authorities: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        let mut ordered: Vec<String> = Vec::new();
        for authority in authorities {
            let authority = authority.into();
            if !ordered.contains(&authority) {
                ordered.push(authority);
            }
        }

        Self {
            subject: subject.into(),
            authorities: ordered,
        }
    }

    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.iter().any(|a| a == authority)
    }

    /// First authority, reported as the user's role at login
    pub fn primary_authority(&self) -> Option<&str> {
        self.authorities.first().map(String::as_str)
    }
}

// ============================================================================
// Authentication Errors
// ============================================================================

/// Authentication error types
///
/// The detail strings are for logs. Every variant that reaches a client is
/// rendered with the same generic message.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Header absent or not Bearer-shaped; treated as "no credential"
    #[error("Missing or malformed Authorization header")]
    MalformedCredential,

    /// Signature, structure, or subject check failed
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Signature valid but past expiry
    #[error("Token expired")]
    ExpiredToken,

    /// Token subject is not (or no longer) in the user directory
    #[error("Unknown subject: {0}")]
    UnknownSubject(String),

    /// User directory failed while re-resolving authorities
    #[error("User directory error: {0}")]
    Directory(String),

    /// Route needs a principal but none was bound
    #[error("Authentication required")]
    Unauthenticated,
}

impl AuthError {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MalformedCredential => "malformed_credential",
            AuthError::InvalidToken(_) => "invalid_token",
            AuthError::ExpiredToken => "expired_token",
            AuthError::UnknownSubject(_) => "unknown_subject",
            AuthError::Directory(_) => "directory_error",
            AuthError::Unauthenticated => "unauthenticated",
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        AuthError::InvalidToken(err.to_string())
    }
}

impl From<DirectoryError> for AuthError {
    fn from(err: DirectoryError) -> Self {
        AuthError::Directory(err.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            AuthError::MalformedCredential | AuthError::Unauthenticated => "Authentication required",
            _ => INVALID_CREDENTIAL_MESSAGE,
        };

        let body = Json(ErrorResponse::new("authentication_error", message));
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Bearer")],
            body,
        )
            .into_response()
    }
}

// ============================================================================
// Credential Extraction
// ============================================================================

/// Extract the bearer token from request headers
///
/// Returns `MalformedCredential` when there is no `Authorization` header or it
/// is not of the form `Bearer <token>`. A `Bearer ` prefix with an empty token
/// counts as a supplied (and later rejected) credential, not as absence.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(AuthError::MalformedCredential)
}

// ============================================================================
// Token Authenticator
// ============================================================================

/// Validates a bearer token and resolves the caller's current authorities
#[derive(Clone)]
pub struct TokenAuthenticator {
    tokens: Arc<TokenService>,
    resolver: AuthorityResolver,
}

impl TokenAuthenticator {
    pub fn new(tokens: Arc<TokenService>, resolver: AuthorityResolver) -> Self {
        Self { tokens, resolver }
    }

    /// Turn a raw token into a principal
    ///
    /// 1. Verify the signature once and read the claims
    /// 2. Reject expired tokens before touching the directory
    /// 3. Re-resolve the subject's authorities from the directory
    /// 4. Check the directory's subject against the token's
    pub async fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
        let claims = self.tokens.verify(token)?;

        if self.tokens.has_expired(&claims) {
            return Err(AuthError::ExpiredToken);
        }

        let principal = self
            .resolver
            .resolve(&claims.sub)
            .await?
            .ok_or_else(|| AuthError::UnknownSubject(claims.sub.clone()))?;

        if principal.subject != claims.sub {
            return Err(AuthError::InvalidToken("subject mismatch".to_string()));
        }

        Ok(principal)
    }
}

// ============================================================================
// Extension Extraction
// ============================================================================

/// Extractor for the principal bound by the pipeline
///
/// Requests that reached a protected handler without a credential are
/// rejected here with 401.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(CurrentPrincipal(principal): CurrentPrincipal) -> String {
///     principal.subject
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentPrincipal(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentPrincipal
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(CurrentPrincipal)
            .ok_or(AuthError::Unauthenticated)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::services::directory::{
        DirectoryError, InMemoryUserDirectory, UserDirectory, UserRecord,
    };
    use axum::http::HeaderValue;
    use chrono::Duration;

    const SECRET: &[u8] = b"auth-test-secret-with-at-least-32-bytes";

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn setup() -> (ManualClock, Arc<TokenService>, Arc<InMemoryUserDirectory>, TokenAuthenticator) {
        let clock = ManualClock::at_timestamp(1_700_000_000);
        let tokens =
            Arc::new(TokenService::new(SECRET, Duration::seconds(300), clock.shared()).unwrap());
        let directory = Arc::new(InMemoryUserDirectory::from_records([UserRecord::new(
            "alice",
            "unused-hash",
            ["USER"],
        )]));
        let resolver = AuthorityResolver::new(directory.clone(), None);
        let authenticator = TokenAuthenticator::new(tokens.clone(), resolver);
        (clock, tokens, directory, authenticator)
    }

    #[test]
    fn test_principal_dedups_authorities_in_order() {
        let principal = Principal::new("alice", ["USER", "ADMIN", "USER"]);
        assert_eq!(principal.authorities, vec!["USER", "ADMIN"]);
        assert_eq!(principal.primary_authority(), Some("USER"));
        assert!(principal.has_authority("ADMIN"));
        assert!(!principal.has_authority("AUDITOR"));
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(&headers_with("Bearer abc.def.ghi")).unwrap(), "abc.def.ghi");
        assert_eq!(bearer_token(&headers_with("Bearer ")).unwrap(), "");
        assert!(matches!(
            bearer_token(&headers_with("Basic dXNlcjpwYXNz")),
            Err(AuthError::MalformedCredential)
        ));
        assert!(matches!(
            bearer_token(&HeaderMap::new()),
            Err(AuthError::MalformedCredential)
        ));
    }

    #[test]
    fn test_auth_errors_render_generic_401() {
        for err in [
            AuthError::InvalidToken("signature mismatch".to_string()),
            AuthError::ExpiredToken,
            AuthError::Directory("connection refused".to_string()),
        ] {
            let response = err.into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn test_authenticate_uses_directory_authorities() {
        let (_clock, tokens, directory, authenticator) = setup();
        // Token claims an authority the directory no longer grants
        let token = tokens
            .issue(&Principal::new("alice", ["ADMIN"]))
            .unwrap();

        let principal = authenticator.authenticate(&token).await.unwrap();
        assert_eq!(principal.authorities, vec!["USER"]);

        directory.upsert(UserRecord::new("alice", "unused-hash", ["AUDITOR"]));
        let principal = authenticator.authenticate(&token).await.unwrap();
        assert_eq!(principal.authorities, vec!["AUDITOR"]);
    }

    #[tokio::test]
    async fn test_authenticate_rejects_removed_user() {
        let (_clock, tokens, directory, authenticator) = setup();
        let token = tokens.issue(&Principal::new("alice", ["USER"])).unwrap();

        directory.remove("alice");

        assert!(matches!(
            authenticator.authenticate(&token).await,
            Err(AuthError::UnknownSubject(_))
        ));
    }

    #[tokio::test]
    async fn test_authenticate_rejects_expired_token() {
        let (clock, tokens, _directory, authenticator) = setup();
        let token = tokens.issue(&Principal::new("alice", ["USER"])).unwrap();

        clock.advance(Duration::seconds(300));

        assert!(matches!(
            authenticator.authenticate(&token).await,
            Err(AuthError::ExpiredToken)
        ));
    }

    #[tokio::test]
    async fn test_authenticate_rejects_garbage() {
        let (_clock, _tokens, _directory, authenticator) = setup();
        assert!(matches!(
            authenticator.authenticate("garbage").await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    struct UnreachableDirectory;

    #[async_trait]
    impl UserDirectory for UnreachableDirectory {
        async fn find_by_username(&self, _: &str) -> Result<Option<UserRecord>, DirectoryError> {
            Err(DirectoryError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_directory_outage_is_an_auth_failure() {
        let (_clock, tokens, _directory, _) = setup();
        let authenticator = TokenAuthenticator::new(
            tokens.clone(),
            AuthorityResolver::new(Arc::new(UnreachableDirectory), None),
        );
        let token = tokens.issue(&Principal::new("alice", ["USER"])).unwrap();

        let err = authenticator.authenticate(&token).await.unwrap_err();

        assert!(matches!(err, AuthError::Directory(_)));
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_expiry_checked_before_directory_lookup() {
        let (clock, tokens, directory, authenticator) = setup();
        let token = tokens.issue(&Principal::new("alice", ["USER"])).unwrap();

        directory.remove("alice");
        clock.advance(Duration::seconds(300));

        assert!(matches!(
            authenticator.authenticate(&token).await,
            Err(AuthError::ExpiredToken)
        ));
    }

    #[tokio::test]
    async fn test_authenticate_rejects_foreign_signature() {
        let (clock, _tokens, _directory, authenticator) = setup();
        let foreign = TokenService::new(
            b"another-secret-that-is-also-32-bytes-long",
            Duration::seconds(300),
            clock.shared(),
        )
        .unwrap();
        let token = foreign.issue(&Principal::new("alice", ["USER"])).unwrap();

        assert!(matches!(
            authenticator.authenticate(&token).await,
            Err(AuthError::InvalidToken(_))
        ));
    }
}
