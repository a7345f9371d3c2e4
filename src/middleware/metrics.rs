//! Prometheus metrics for the request pipeline
//!
//! Counts admission decisions, authentication outcomes and responses, and
//! renders them in the Prometheus text format for `GET /metrics`.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Gateway metrics registry
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,

    /// Responses by status class (2xx, 4xx, ...)
    pub http_responses: IntCounterVec,

    /// Admission decisions by outcome (allow / reject)
    pub rate_limit_decisions: IntCounterVec,

    /// Authentication outcomes by kind (authenticated, anonymous, expired_token, ...)
    pub auth_outcomes: IntCounterVec,

    /// Idle rate-limit counters dropped by the sweeper
    pub evicted_counters: IntCounter,
}

impl GatewayMetrics {
    /// Create and register all gateway metrics
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_responses = IntCounterVec::new(
            Opts::new("gateway_http_responses_total", "HTTP responses by status class"),
            &["class"],
        )?;
        registry.register(Box::new(http_responses.clone()))?;

        let rate_limit_decisions = IntCounterVec::new(
            Opts::new("gateway_rate_limit_decisions_total", "Rate limiter decisions"),
            &["decision"],
        )?;
        registry.register(Box::new(rate_limit_decisions.clone()))?;

        let auth_outcomes = IntCounterVec::new(
            Opts::new("gateway_auth_outcomes_total", "Bearer authentication outcomes"),
            &["outcome"],
        )?;
        registry.register(Box::new(auth_outcomes.clone()))?;

        let evicted_counters = IntCounter::new(
            "gateway_rate_limit_evicted_counters_total",
            "Idle rate-limit counters evicted",
        )?;
        registry.register(Box::new(evicted_counters.clone()))?;

        Ok(Self {
            registry,
            http_responses,
            rate_limit_decisions,
            auth_outcomes,
            evicted_counters,
        })
    }

    pub fn record_decision(&self, allowed: bool) {
        let label = if allowed { "allow" } else { "reject" };
        self.rate_limit_decisions.with_label_values(&[label]).inc();
    }

    pub fn record_auth(&self, outcome: &str) {
        self.auth_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn record_response(&self, status: u16) {
        let class = match status {
            100..=199 => "1xx",
            200..=299 => "2xx",
            300..=399 => "3xx",
            400..=499 => "4xx",
            _ => "5xx",
        };
        self.http_responses.with_label_values(&[class]).inc();
    }

    /// Render the registry in Prometheus text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
