//! Application settings and configuration
//!
//! This module provides configuration management for the gateway,
//! loading settings from environment variables with sensible defaults.
//! Everything is read once at startup; changing a value requires a restart.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;

use crate::services::token::MAX_TOKEN_TTL_SECONDS;

/// Minimum signing secret length in bytes (256 bits for HS256)
pub const MIN_JWT_SECRET_BYTES: usize = 32;

/// Upper bound for the rate-limit window and the idle eviction period (one year)
pub const MAX_RATE_LIMIT_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Path prefixes that skip authentication (they are still rate limited)
pub const DEFAULT_PUBLIC_PATHS: &[&str] = &[
    "/auth/",
    "/v3/api-docs",
    "/swagger-ui",
    "/swagger-ui.html",
    "/swagger-resources",
    "/webjars",
    "/health",
    "/metrics",
];

/// Application environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[value(alias = "dev")]
    Development,
    #[value(alias = "stage")]
    Staging,
    #[value(alias = "prod")]
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => anyhow::bail!("Invalid environment: {}. Expected: development, staging, or production", s),
        }
    }
}

/// Token issuance and validation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// HS256 signing secret
    #[serde(skip_serializing)]
    pub jwt_secret: String,

    /// Token lifetime in seconds
    pub token_ttl_seconds: u64,

    /// How long a directory lookup may be reused; 0 disables caching
    pub authority_cache_ttl_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_seconds: 3600,
            authority_cache_ttl_seconds: 0,
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_requests: u32,
    pub window_seconds: u64,
    /// Counters untouched for this long are dropped (never less than one window)
    pub idle_eviction_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 60,
            window_seconds: 60,
            idle_eviction_seconds: 600,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    // App settings
    pub app_name: String,
    pub app_version: String,
    pub environment: Environment,
    pub log_level: String,

    // Server settings
    pub host: String,
    pub port: u16,

    // Authentication
    pub auth: AuthConfig,

    // Rate limiting
    pub rate_limit: RateLimitConfig,

    /// Take the client identifier from `X-Forwarded-For` instead of the peer address
    pub trust_forwarded_for: bool,

    /// Path prefixes reachable without a token
    pub public_paths: Vec<String>,

    /// Origin allowed by CORS (the ticketing front-end)
    pub cors_allowed_origin: String,

    /// JSON file seeding the in-memory user directory
    pub users_file: Option<PathBuf>,
}

impl Settings {
    /// Load settings from environment variables with defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignored in production typically)
        dotenvy::dotenv().ok();

        let settings = Self {
            // App settings
            app_name: env_or_default("APP_NAME", "tickets-gateway"),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: env_or_default("ENVIRONMENT", "development")
                .parse()
                .unwrap_or_default(),
            log_level: env_or_default("LOG_LEVEL", "info"),

            // Server settings
            host: env_or_default("HOST", "0.0.0.0"),
            port: env_or_default("PORT", "8080")
                .parse()
                .context("Invalid PORT value")?,

            // Authentication
            auth: AuthConfig {
                jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
                token_ttl_seconds: env_or_default("JWT_EXPIRATION_SECONDS", "3600")
                    .parse()
                    .context("Invalid JWT_EXPIRATION_SECONDS value")?,
                authority_cache_ttl_seconds: env_or_default("AUTHORITY_CACHE_TTL_SECONDS", "0")
                    .parse()
                    .unwrap_or(0),
            },

            // Rate limiting
            rate_limit: RateLimitConfig {
                enabled: env_or_default("RATE_LIMIT_ENABLED", "true")
                    .parse()
                    .unwrap_or(true),
                max_requests: env_or_default("RATE_LIMIT_MAX_REQUESTS", "60")
                    .parse()
                    .context("Invalid RATE_LIMIT_MAX_REQUESTS value")?,
                window_seconds: env_or_default("RATE_LIMIT_WINDOW_SECONDS", "60")
                    .parse()
                    .context("Invalid RATE_LIMIT_WINDOW_SECONDS value")?,
                idle_eviction_seconds: env_or_default("RATE_LIMIT_IDLE_EVICTION_SECONDS", "600")
                    .parse()
                    .unwrap_or(600),
            },

            trust_forwarded_for: env_or_default("TRUST_FORWARDED_FOR", "false")
                .parse()
                .unwrap_or(false),

            public_paths: env::var("PUBLIC_PATHS")
                .map(|raw| parse_path_list(&raw))
                .unwrap_or_else(|_| default_public_paths()),

            cors_allowed_origin: env_or_default("CORS_ALLOWED_ORIGIN", "http://localhost:3000"),

            users_file: env::var("USERS_FILE").ok().map(PathBuf::from),
        };

        // Validate settings
        settings.validate()?;

        Ok(settings)
    }

    /// Validate settings
    ///
    /// A bad value here is fatal: the gateway refuses to start rather than
    /// serve requests it cannot authenticate or throttle correctly.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        if self.auth.jwt_secret.is_empty() {
            anyhow::bail!("JWT secret must be set");
        }
        if self.auth.jwt_secret.len() < MIN_JWT_SECRET_BYTES {
            anyhow::bail!(
                "JWT secret must be at least {} bytes, got {}",
                MIN_JWT_SECRET_BYTES,
                self.auth.jwt_secret.len()
            );
        }
        if self.auth.token_ttl_seconds == 0 {
            anyhow::bail!("Token TTL must be > 0");
        }
        if self.auth.token_ttl_seconds > MAX_TOKEN_TTL_SECONDS as u64 {
            anyhow::bail!(
                "Token TTL must be at most {} seconds, got {}",
                MAX_TOKEN_TTL_SECONDS,
                self.auth.token_ttl_seconds
            );
        }

        if self.rate_limit.enabled {
            if self.rate_limit.max_requests == 0 {
                anyhow::bail!("Rate limit max_requests must be > 0");
            }
            if self.rate_limit.window_seconds == 0 {
                anyhow::bail!("Rate limit window_seconds must be > 0");
            }
            if self.rate_limit.window_seconds > MAX_RATE_LIMIT_SECONDS {
                anyhow::bail!(
                    "Rate limit window_seconds must be at most {}",
                    MAX_RATE_LIMIT_SECONDS
                );
            }
            if self.rate_limit.idle_eviction_seconds > MAX_RATE_LIMIT_SECONDS {
                anyhow::bail!(
                    "Rate limit idle_eviction_seconds must be at most {}",
                    MAX_RATE_LIMIT_SECONDS
                );
            }
        }

        if self.is_production() && !self.rate_limit.enabled {
            tracing::warn!("Running in production with rate limiting disabled!");
        }

        Ok(())
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Get the server address string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "tickets-gateway".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: Environment::Development,
            log_level: "info".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            trust_forwarded_for: false,
            public_paths: default_public_paths(),
            cors_allowed_origin: "http://localhost:3000".to_string(),
            users_file: None,
        }
    }
}

fn default_public_paths() -> Vec<String> {
    DEFAULT_PUBLIC_PATHS.iter().map(|p| p.to_string()).collect()
}

/// Split a comma-separated list, dropping blanks
fn parse_path_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Helper function to get environment variable with default
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
