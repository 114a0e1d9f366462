//! Rate limiter configuration and statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Token bucket settings, applied per domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Steady-state refill rate.
    pub requests_per_second: f64,
    /// Bucket capacity.
    pub burst: u32,
    /// Slow down to robots.txt `Crawl-delay` when it is stricter.
    pub respect_crawl_delay: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 1.0,
            burst: 1,
            respect_crawl_delay: true,
        }
    }
}

impl RateLimitConfig {
    /// Create a config with the given rate and burst.
    pub fn per_second(requests_per_second: f64, burst: u32) -> Self {
        Self {
            requests_per_second,
            burst,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.requests_per_second.is_finite() && self.requests_per_second > 0.0) {
            return Err(ConfigError::invalid(
                "rate_limit.requests_per_second",
                "must be greater than 0",
            ));
        }
        if self.burst == 0 {
            return Err(ConfigError::invalid("rate_limit.burst", "must be at least 1"));
        }
        Ok(())
    }
}

/// Snapshot of one domain's limiter state.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainStats {
    /// Tokens currently available; negative while callers are queued.
    pub tokens: f64,
    pub crawl_delay: Option<Duration>,
    pub total_requests: u64,
    pub total_wait: Duration,
}
