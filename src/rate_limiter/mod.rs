//! Per-domain token bucket rate limiter.
//!
//! Each domain has its own bucket, so a slow domain never delays another.
//! Acquisitions reserve a token up front and then sleep off any deficit,
//! which keeps waiters roughly first-come first-served.

mod config;
mod domain_state;

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

pub use config::{DomainStats, RateLimitConfig};
use domain_state::DomainState;

use crate::domain::DomainKey;
use crate::registry::DomainRegistry;

/// Rate limiter shared by every request to the same set of domains.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    domains: DomainRegistry<DomainState>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given defaults.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            domains: DomainRegistry::new(),
        }
    }

    /// Default configuration used when a call has no override.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Wait until a request to `domain` is permitted.
    ///
    /// Returns the time spent waiting. `config` replaces the limiter's
    /// defaults for this acquisition only.
    pub async fn acquire(&self, domain: &DomainKey, config: Option<&RateLimitConfig>) -> Duration {
        let config = config.unwrap_or(&self.config);
        if !config.enabled {
            return Duration::ZERO;
        }

        let entry = self
            .domains
            .entry_or_insert_with(domain, || DomainState::new(config, Instant::now()))
            .await;

        // Reserve under the domain lock, sleep outside it
        let wait = entry.lock().await.reserve(config, Instant::now());
        if wait.is_zero() {
            return Duration::ZERO;
        }

        debug!("Rate limiting {}: waiting {:?}", domain, wait);
        let started = Instant::now();
        tokio::time::sleep(wait).await;
        started.elapsed()
    }

    /// Record the robots.txt crawl delay for a domain.
    pub async fn set_crawl_delay(&self, domain: &DomainKey, delay: Option<Duration>) {
        let entry = self
            .domains
            .entry_or_insert_with(domain, || DomainState::new(&self.config, Instant::now()))
            .await;
        let mut state = entry.lock().await;
        if state.crawl_delay != delay {
            if let Some(delay) = delay {
                info!("Domain {} requests a crawl delay of {:?}", domain, delay);
            }
            state.crawl_delay = delay;
        }
    }

    /// Get statistics for all domains.
    pub async fn get_stats(&self) -> HashMap<DomainKey, DomainStats> {
        let mut stats = HashMap::new();
        for domain in self.domains.domains().await {
            if let Some(entry) = self.domains.get(&domain).await {
                let state = entry.lock().await;
                stats.insert(
                    domain,
                    DomainStats {
                        tokens: state.tokens,
                        crawl_delay: state.crawl_delay,
                        total_requests: state.total_requests,
                        total_wait: state.total_wait,
                    },
                );
            }
        }
        stats
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
