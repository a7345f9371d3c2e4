//! Bearer token issuance and validation
//!
//! Tokens are HS256-signed JWTs carrying the subject, its authorities at the
//! time of login, and issued-at / expiry timestamps in whole Unix seconds.
//! Every read of a claim goes through the signature-verified parse; there is
//! no code path that looks at an unverified payload.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::SharedClock;
use crate::middleware::auth::Principal;

/// Longest accepted token lifetime (ten years)
pub const MAX_TOKEN_TTL_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

/// Token-related errors
///
/// The carried strings are for logs only; they never reach a client.
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Signing secret is missing")]
    MissingSecret,

    #[error("Token TTL must be between 1 and {MAX_TOKEN_TTL_SECONDS} seconds, got {0}")]
    InvalidTtl(i64),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token encoding failed: {0}")]
    EncodingFailed(String),
}

/// Claims carried by an issued token
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (username)
    pub sub: String,
    /// Authorities granted when the token was issued
    pub roles: Vec<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Issues and validates signed bearer tokens
///
/// Keys are derived once at construction and only read afterwards, so a
/// single instance is shared by every request without locking.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
    clock: SharedClock,
}

impl TokenService {
    /// Create a token service for the given secret and lifetime
    ///
    /// An empty secret or an out-of-range TTL is a configuration error and
    /// is reported here, at startup, instead of on the first request.
    pub fn new(secret: &[u8], ttl: Duration, clock: SharedClock) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::MissingSecret);
        }
        if ttl <= Duration::zero() || ttl > Duration::seconds(MAX_TOKEN_TTL_SECONDS) {
            return Err(TokenError::InvalidTtl(ttl.num_seconds()));
        }

        // Expiry is checked against our own clock with an inclusive boundary,
        // so the library's exp check (with its leeway) stays off.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["sub", "exp"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl,
            clock,
        })
    }

    /// Issue a token for the principal, valid from now until now + TTL
    pub fn issue(&self, principal: &Principal) -> Result<String, TokenError> {
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| TokenError::EncodingFailed("expiry out of range".to_string()))?;
        let claims = Claims {
            sub: principal.subject.clone(),
            roles: principal.authorities.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::EncodingFailed(e.to_string()))
    }

    /// Verify the signature and structure, returning the claims
    ///
    /// Expiry is not checked here.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        if token.trim().is_empty() {
            return Err(TokenError::InvalidToken("empty token".to_string()));
        }

        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| TokenError::InvalidToken(e.to_string()))?;

        if data.claims.sub.is_empty() {
            return Err(TokenError::InvalidToken("empty subject".to_string()));
        }

        Ok(data.claims)
    }

    /// Subject encoded in a verified token
    pub fn extract_subject(&self, token: &str) -> Result<String, TokenError> {
        self.verify(token).map(|claims| claims.sub)
    }

    /// Whether a verified token is at or past its expiry
    pub fn is_expired(&self, token: &str) -> Result<bool, TokenError> {
        self.verify(token).map(|claims| self.has_expired(&claims))
    }

    /// True iff the token verifies, names `expected_subject`, and has not expired
    pub fn validate(&self, token: &str, expected_subject: &str) -> bool {
        match self.verify(token) {
            Ok(claims) => claims.sub == expected_subject && !self.has_expired(&claims),
            Err(_) => false,
        }
    }

    /// Expiry instant of a verified token
    pub fn expiry_of(&self, token: &str) -> Result<DateTime<Utc>, TokenError> {
        let claims = self.verify(token)?;
        DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| TokenError::InvalidToken("expiry out of range".to_string()))
    }

    /// Whether already-verified claims are at or past their expiry
    pub fn has_expired(&self, claims: &Claims) -> bool {
        claims.exp <= self.clock.now().timestamp()
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("ttl_seconds", &self.ttl.num_seconds())
            .finish_non_exhaustive()
    }
}
