//! Application server
//!
//! Binds the listener, runs the idle-counter sweeper and handles graceful
//! shutdown.

use crate::{
    config::Settings,
    server::{routes, state::AppState},
};
use anyhow::Result;
use std::net::SocketAddr;
use tokio::{signal, task::JoinHandle};

/// Main application struct
pub struct App {
    settings: Settings,
    state: AppState,
}

impl App {
    /// Create a new application instance
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;

        tracing::debug!("Initializing application state");
        let state = AppState::new(settings.clone())?;

        Ok(Self { settings, state })
    }

    /// Run the server until SIGINT (Ctrl+C) or SIGTERM
    pub async fn run_with_graceful_shutdown(self) -> Result<()> {
        let addr = self.settings.server_addr().parse::<SocketAddr>()?;
        let router = routes::create_router(self.state.clone());
        let sweeper = self.spawn_eviction_sweeper();

        tracing::info!("Starting server on {} with graceful shutdown enabled", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        // Peer addresses identify clients for rate limiting
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        tracing::info!(
            tracked_clients = self.state.pipeline.limiter().tracked_clients(),
            "Server stopped"
        );

        Ok(())
    }

    /// Periodically drop rate-limit counters of clients that went quiet
    fn spawn_eviction_sweeper(&self) -> Option<JoinHandle<()>> {
        let limiter = self.state.pipeline.limiter().clone();
        if !limiter.config().enabled {
            return None;
        }

        let metrics = self.state.metrics.clone();
        let period = limiter.eviction_interval();
        tracing::debug!(period_seconds = period.as_secs(), "Starting rate-limit counter sweeper");

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let evicted = limiter.evict_idle();
                metrics.evicted_counters.inc_by(evicted as u64);
            }
        }))
    }
}

/// Create a future that completes when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
