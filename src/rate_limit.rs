//! Rate limiting for outbound lookups
//!
//! Upstream registries are polite-use services, so every outbound call (bulk
//! whois session, HTTP request, RDAP lookup, DNS query) is followed by a fixed
//! pause. The delay is not adaptive: failures do not lengthen it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use crate::config::RateLimitConfig;

/// Fixed-delay limiter shared by every source client of a run
#[derive(Debug)]
pub struct RateLimiter {
    /// Pause inserted after each call
    delay: Duration,
    /// Number of calls recorded so far
    calls: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter that pauses for `delay` after each call.
    /// A zero delay disables the pause but calls are still counted.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.delay())
    }

    /// Limiter that never sleeps
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        !self.delay.is_zero()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Record one outbound call and wait out the configured delay
    pub async fn after_call(&self) {
        let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if self.is_enabled() {
            debug!("Rate limiter pausing {:?} after call #{}", self.delay, n);
            sleep(self.delay).await;
        }
    }

    /// Total outbound calls recorded
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}
