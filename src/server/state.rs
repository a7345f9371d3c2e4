//! Application state container
//!
//! Shared resources handed to every handler via Axum's state extraction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::{SharedClock, SystemClock};
use crate::config::Settings;
use crate::middleware::{GatewayMetrics, Pipeline, RateLimiter, RoutePolicy, TokenAuthenticator};
use crate::services::{
    Authenticator, AuthorityResolver, InMemoryUserDirectory, TokenService, UserDirectory,
};

/// Shared application state
///
/// Cheap to clone; every field is reference counted.
#[derive(Clone)]
pub struct AppState {
    /// Application settings
    pub settings: Arc<Settings>,

    /// Issues and verifies bearer tokens
    pub tokens: Arc<TokenService>,

    /// Checks login credentials against the user directory
    pub authenticator: Arc<Authenticator>,

    /// Rate limiting and authentication in front of the routes
    pub pipeline: Pipeline,

    pub metrics: GatewayMetrics,

    /// Application start time (for uptime calculation)
    pub start_time: Instant,
}

impl AppState {
    /// Build the state from settings, seeding users from `USERS_FILE`
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        let directory: Arc<dyn UserDirectory> = match &settings.users_file {
            Some(path) => {
                let directory = InMemoryUserDirectory::load_from_file(path)?;
                if directory.is_empty() {
                    tracing::warn!(path = %path.display(), "USERS_FILE has no users; every login will fail");
                }
                Arc::new(directory)
            }
            None => {
                tracing::warn!("USERS_FILE not set; user directory is empty and every login will fail");
                Arc::new(InMemoryUserDirectory::new())
            }
        };

        Self::with_directory(settings, directory, SystemClock::shared())
    }

    /// Build the state around an existing directory and clock
    pub fn with_directory(
        settings: Settings,
        directory: Arc<dyn UserDirectory>,
        clock: SharedClock,
    ) -> anyhow::Result<Self> {
        let settings = Arc::new(settings);

        let ttl = i64::try_from(settings.auth.token_ttl_seconds)?;
        let tokens = Arc::new(TokenService::new(
            settings.auth.jwt_secret.as_bytes(),
            chrono::Duration::seconds(ttl),
            clock.clone(),
        )?);

        let cache_ttl = Some(settings.auth.authority_cache_ttl_seconds)
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs);
        let resolver = AuthorityResolver::new(directory.clone(), cache_ttl);

        let metrics = GatewayMetrics::new()?;
        let pipeline = Pipeline::new(
            RateLimiter::new(settings.rate_limit.clone(), clock),
            TokenAuthenticator::new(tokens.clone(), resolver),
            RoutePolicy::new(settings.public_paths.iter().cloned()),
            metrics.clone(),
            settings.trust_forwarded_for,
        );

        tracing::debug!(
            token_ttl_seconds = settings.auth.token_ttl_seconds,
            authority_cache_ttl_seconds = settings.auth.authority_cache_ttl_seconds,
            rate_limit_enabled = settings.rate_limit.enabled,
            max_requests = settings.rate_limit.max_requests,
            window_seconds = settings.rate_limit.window_seconds,
            public_paths = ?settings.public_paths,
            "Application state initialized"
        );

        Ok(Self {
            settings,
            tokens,
            authenticator: Arc::new(Authenticator::new(directory)),
            pipeline,
            metrics,
            start_time: Instant::now(),
        })
    }

    /// Get the application uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
