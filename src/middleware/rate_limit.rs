//! Fixed-window rate limiting
//!
//! Each client identifier gets a counter holding the start of its current
//! window and the number of requests seen in it. A request that finds the
//! window elapsed resets the counter before counting itself. This is a fixed
//! window, not a sliding one: a burst straddling a window edge can see up to
//! twice `max_requests` admitted in quick succession.
//!
//! Counters live in a sharded map. Lookup-or-create and the
//! reset-then-increment step run under the shard's write lock, so clients
//! on different shards never contend and no increment is ever lost.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::sync::Arc;

use crate::clock::SharedClock;
use crate::config::RateLimitConfig;

/// Plain-text body of a 429 response
pub const RATE_LIMITED_MESSAGE: &str = "Too many requests, please try again later.";

// ============================================================================
// Types
// ============================================================================

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Request may proceed; `remaining` is `None` when limiting is disabled
    Allow { remaining: Option<u32> },
    /// Quota exhausted; `count` keeps growing until the window resets
    Reject { count: u32, retry_after_seconds: u64 },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }
}

/// Per-client window state
#[derive(Debug, Clone, Copy)]
struct Counter {
    /// Window start (Unix seconds)
    window_start: i64,
    count: u32,
}

/// Fixed-window limiter shared by every request
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    counters: Arc<DashMap<String, Counter>>,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: SharedClock) -> Self {
        Self {
            config,
            counters: Arc::new(DashMap::new()),
            clock,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Decide whether one more request from `client_id` may proceed
    pub fn admit(&self, client_id: &str) -> Decision {
        if !self.config.enabled {
            return Decision::Allow { remaining: None };
        }

        let now = self.clock.now().timestamp();
        let window = self.window_seconds();

        // The entry guard holds the shard lock until it is dropped, which
        // makes create, reset and increment one atomic step per client.
        let (count, window_start) = {
            let mut counter = self
                .counters
                .entry(client_id.to_owned())
                .or_insert(Counter {
                    window_start: now,
                    count: 0,
                });

            if now - counter.window_start >= window {
                counter.window_start = now;
                counter.count = 0;
            }

            counter.count = counter.count.saturating_add(1);
            (counter.count, counter.window_start)
        };

        if count > self.config.max_requests {
            let retry_after_seconds = window_start
                .saturating_add(window)
                .saturating_sub(now)
                .max(1) as u64;
            Decision::Reject {
                count,
                retry_after_seconds,
            }
        } else {
            Decision::Allow {
                remaining: Some(self.config.max_requests - count),
            }
        }
    }

    /// Requests counted in the client's current window, if it has a counter
    pub fn count(&self, client_id: &str) -> Option<u32> {
        self.counters.get(client_id).map(|counter| counter.count)
    }

    /// Number of clients currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.counters.len()
    }

    /// Drop counters whose window started at least the eviction period ago
    ///
    /// The period is never shorter than one window, so a dropped counter is
    /// one whose window had already elapsed. Removing it is equivalent to the
    /// reset the next request would have done anyway. Runs under the same
    /// shard locks as [`admit`](Self::admit).
    pub fn evict_idle(&self) -> usize {
        let now = self.clock.now().timestamp();
        let idle = self.idle_eviction_seconds();
        let before = self.counters.len();

        self.counters
            .retain(|_, counter| now - counter.window_start < idle);

        let evicted = before.saturating_sub(self.counters.len());
        if evicted > 0 {
            tracing::debug!(evicted = evicted, remaining = self.counters.len(), "Evicted idle rate-limit counters");
        }
        evicted
    }

    /// Sweep interval for [`evict_idle`](Self::evict_idle)
    pub fn eviction_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_eviction_seconds() as u64)
    }

    fn window_seconds(&self) -> i64 {
        i64::try_from(self.config.window_seconds).unwrap_or(i64::MAX)
    }

    fn idle_eviction_seconds(&self) -> i64 {
        i64::try_from(self.config.idle_eviction_seconds)
            .unwrap_or(i64::MAX)
            .max(self.window_seconds())
    }
}

// ============================================================================
// Rate Limit Errors
// ============================================================================

/// Rejection written by the pipeline when a client is over quota
#[derive(Debug)]
pub struct RateLimitError {
    /// Seconds until the client's window resets
    pub retry_after_seconds: u64,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_MESSAGE).into_response();

        if let Ok(value) = HeaderValue::from_str(&self.retry_after_seconds.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }

        response
    }
}

/// Add quota headers to an admitted response
pub fn add_rate_limit_headers(response: &mut Response, limit: u32, remaining: u32) {
    let headers = response.headers_mut();

    // X-RateLimit-Limit: Maximum requests per window
    if let Ok(v) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("x-ratelimit-limit", v);
    }
    // X-RateLimit-Remaining: Requests left in the current window
    if let Ok(v) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", v);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;

    fn limiter(max_requests: u32, window_seconds: u64) -> (ManualClock, RateLimiter) {
        let clock = ManualClock::at_timestamp(1_700_000_000);
        let config = RateLimitConfig {
            enabled: true,
            max_requests,
            window_seconds,
            idle_eviction_seconds: 600,
        };
        let limiter = RateLimiter::new(config, clock.shared());
        (clock, limiter)
    }

    #[test]
    fn test_window_boundary() {
        let (clock, limiter) = limiter(60, 60);

        for i in 1..=60 {
            assert!(limiter.admit("10.0.0.1").is_allowed(), "request {} should be allowed", i);
        }
        assert!(!limiter.admit("10.0.0.1").is_allowed(), "request 61 should be rejected");

        clock.advance(Duration::seconds(61));

        assert!(limiter.admit("10.0.0.1").is_allowed());
        assert_eq!(limiter.count("10.0.0.1"), Some(1));
    }

    #[test]
    fn test_reset_exactly_at_window_length() {
        let (clock, limiter) = limiter(1, 60);

        assert!(limiter.admit("c").is_allowed());
        clock.advance(Duration::seconds(59));
        assert!(!limiter.admit("c").is_allowed());

        clock.advance(Duration::seconds(1));
        assert!(limiter.admit("c").is_allowed());
    }

    #[test]
    fn test_counter_keeps_growing_past_limit() {
        let (_clock, limiter) = limiter(2, 60);

        limiter.admit("c");
        limiter.admit("c");
        assert!(matches!(limiter.admit("c"), Decision::Reject { count: 3, .. }));
        assert!(matches!(limiter.admit("c"), Decision::Reject { count: 4, .. }));
    }

    #[test]
    fn test_remaining_and_retry_after() {
        let (clock, limiter) = limiter(2, 60);

        assert_eq!(limiter.admit("c"), Decision::Allow { remaining: Some(1) });
        assert_eq!(limiter.admit("c"), Decision::Allow { remaining: Some(0) });

        clock.advance(Duration::seconds(20));
        assert_eq!(
            limiter.admit("c"),
            Decision::Reject {
                count: 3,
                retry_after_seconds: 40
            }
        );
    }

    #[test]
    fn test_huge_window_does_not_overflow_retry_after() {
        let (_clock, limiter) = limiter(1, u64::MAX);

        assert!(limiter.admit("10.0.0.1").is_allowed());
        match limiter.admit("10.0.0.1") {
            Decision::Reject {
                retry_after_seconds,
                ..
            } => assert!(retry_after_seconds > 0),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_clients_are_isolated() {
        let (_clock, limiter) = limiter(60, 60);

        for _ in 0..100 {
            limiter.admit("client-a");
        }
        assert!(!limiter.admit("client-a").is_allowed());

        for i in 1..=60 {
            assert!(limiter.admit("client-b").is_allowed(), "client-b request {} should be allowed", i);
        }
        assert!(!limiter.admit("client-b").is_allowed());
    }

    #[test]
    fn test_disabled_limiter_allows_everything() {
        let clock = ManualClock::at_timestamp(1_700_000_000);
        let config = RateLimitConfig {
            enabled: false,
            max_requests: 1,
            window_seconds: 60,
            idle_eviction_seconds: 600,
        };
        let limiter = RateLimiter::new(config, clock.shared());

        for _ in 0..10_000 {
            assert_eq!(limiter.admit("c"), Decision::Allow { remaining: None });
        }
        assert_eq!(limiter.tracked_clients(), 0);
        assert_eq!(limiter.count("c"), None);
    }

    #[test]
    fn test_concurrent_admission_is_exact() {
        const THREADS: usize = 16;
        const PER_THREAD: usize = 50;
        const LIMIT: u32 = 100;

        let (_clock, limiter) = limiter(LIMIT, 60);

        let allowed: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    let limiter = &limiter;
                    scope.spawn(move || {
                        (0..PER_THREAD)
                            .filter(|_| limiter.admit("shared-client").is_allowed())
                            .count()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(allowed, LIMIT as usize);
        assert_eq!(limiter.count("shared-client"), Some((THREADS * PER_THREAD) as u32));
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_share_one_counter() {
        let (_clock, limiter) = limiter(10, 60);

        let tasks: Vec<_> = (0..40)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.admit("new-client").is_allowed() })
            })
            .collect();

        let mut allowed = 0;
        for task in tasks {
            if task.await.unwrap() {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 10);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_evict_idle_keeps_active_counters() {
        let (clock, limiter) = limiter(5, 60);

        limiter.admit("old");
        clock.advance(Duration::seconds(590));
        limiter.admit("recent");
        clock.advance(Duration::seconds(10));

        assert_eq!(limiter.evict_idle(), 1);
        assert_eq!(limiter.count("old"), None);
        assert_eq!(limiter.count("recent"), Some(1));
    }

    #[test]
    fn test_eviction_period_never_shorter_than_window() {
        let clock = ManualClock::at_timestamp(1_700_000_000);
        let config = RateLimitConfig {
            enabled: true,
            max_requests: 1,
            window_seconds: 120,
            idle_eviction_seconds: 10,
        };
        let limiter = RateLimiter::new(config, clock.shared());

        limiter.admit("c");
        clock.advance(Duration::seconds(60));

        assert_eq!(limiter.evict_idle(), 0);
        assert!(!limiter.admit("c").is_allowed());
    }

    #[test]
    fn test_rate_limit_error_response() {
        let response = RateLimitError {
            retry_after_seconds: 30,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "30");
    }
}
