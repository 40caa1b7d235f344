//! Per-identity sliding-window admission control.
//!
//! [`RateLimiter`] counts admitted requests per identity over the trailing
//! `window`. A request is admitted while fewer than `max_requests` admitted
//! requests remain inside the window; denied attempts are not recorded.
//!
//! # Boundary policy
//!
//! A timestamp whose age is **greater than or equal to** `window` is pruned
//! before the count is taken. An attempt arriving exactly `window` after the
//! oldest counted attempt is therefore admitted.
//!
//! # Table growth
//!
//! Windows live in a moka cache with time-to-idle equal to the window. An
//! identity idle for a full window has nothing left to count, so evicting it
//! is not observable; this keeps unbounded identity sets from growing the
//! table forever.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use moka::sync::Cache;
use tracing::debug;

use crate::telemetry;

/// Configuration for the rate limiter.
///
/// ```rust
/// # use muninn::limiter::RateLimitConfig;
/// # use std::time::Duration;
/// let config = RateLimitConfig::new()
///     .max_requests(20)
///     .window(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Admissions allowed per identity inside one window. Default: 100.
    pub max_requests: usize,
    /// Length of the trailing window. Default: 1 hour.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(3600),
        }
    }
}

impl RateLimitConfig {
    /// Create a new config with the default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of admissions allowed per window.
    pub fn max_requests(mut self, n: usize) -> Self {
        self.max_requests = n;
        self
    }

    /// Set the window length.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

type RateWindow = Arc<Mutex<VecDeque<Instant>>>;

/// Thread-safe per-identity sliding-window rate limiter.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Cache<String, RateWindow>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let windows = Cache::builder()
            .time_to_idle(config.window.max(Duration::from_secs(1)))
            .build();
        Self { config, windows }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admit or deny a request from `identity` at the current instant.
    pub fn check(&self, identity: &str) -> bool {
        self.check_at(identity, Instant::now())
    }

    /// Admit or deny a request from `identity` arriving at `now`.
    ///
    /// Prune-then-append runs under the identity's window lock, so
    /// concurrent callers for the same identity never interleave.
    pub fn check_at(&self, identity: &str, now: Instant) -> bool {
        let window = self
            .windows
            .get_with_by_ref(identity, || Arc::new(Mutex::new(VecDeque::new())));
        let mut stamps = window.lock().unwrap_or_else(PoisonError::into_inner);

        stamps.retain(|t| now.saturating_duration_since(*t) < self.config.window);

        if stamps.len() >= self.config.max_requests {
            debug!(
                identity,
                in_window = stamps.len(),
                max = self.config.max_requests,
                "admission denied"
            );
            metrics::counter!(telemetry::ADMISSIONS_DENIED_TOTAL).increment(1);
            return false;
        }

        stamps.push_back(now);
        true
    }

    /// Number of admissions currently counted for `identity` (without pruning).
    pub fn in_window(&self, identity: &str) -> usize {
        self.windows
            .get(identity)
            .map(|w| w.lock().unwrap_or_else(PoisonError::into_inner).len())
            .unwrap_or(0)
    }
}
