//! Per-domain token bucket.

use std::time::Duration;

use tokio::time::Instant;

use super::config::RateLimitConfig;
use crate::config::duration_from_secs;

/// Token bucket for a single domain.
///
/// Tokens may go negative: each acquisition reserves a token immediately
/// and waits out the deficit, so concurrent callers are served in the
/// order they reserved.
#[derive(Debug, Clone)]
pub struct DomainState {
    /// Available tokens, at most the effective capacity.
    pub tokens: f64,
    /// Last time tokens were refilled.
    pub last_refill: Instant,
    /// Crawl-delay advertised by robots.txt, if any.
    pub crawl_delay: Option<Duration>,
    /// Total acquisitions.
    pub total_requests: u64,
    /// Total time callers were told to wait.
    pub total_wait: Duration,
}

impl DomainState {
    /// Create a full bucket.
    pub fn new(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            tokens: f64::from(config.burst),
            last_refill: now,
            crawl_delay: None,
            total_requests: 0,
            total_wait: Duration::ZERO,
        }
    }

    /// Effective `(rate, capacity)` after applying the crawl delay.
    ///
    /// The stricter of the configured rate and the crawl delay wins. When
    /// the crawl delay binds, bursting is disabled.
    pub fn effective_limits(&self, config: &RateLimitConfig) -> (f64, f64) {
        let rate = config.requests_per_second;
        let capacity = f64::from(config.burst);

        match self.crawl_delay {
            Some(delay) if config.respect_crawl_delay && !delay.is_zero() => {
                let delay_rate = 1.0 / delay.as_secs_f64();
                if delay_rate < rate {
                    (delay_rate, 1.0)
                } else {
                    (rate, capacity)
                }
            }
            _ => (rate, capacity),
        }
    }

    fn refill(&mut self, rate: f64, capacity: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = now;
    }

    /// Reserve one token and return how long the caller must wait for it.
    pub fn reserve(&mut self, config: &RateLimitConfig, now: Instant) -> Duration {
        let (rate, capacity) = self.effective_limits(config);
        self.refill(rate, capacity, now);

        self.tokens -= 1.0;
        self.total_requests += 1;

        if self.tokens >= 0.0 {
            return Duration::ZERO;
        }

        let wait = duration_from_secs(-self.tokens / rate);
        self.total_wait += wait;
        wait
    }
}
