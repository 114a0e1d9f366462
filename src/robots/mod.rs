//! robots.txt cache.
//!
//! One entry per domain, refreshed after its TTL. Concurrent lookups for a
//! domain whose entry is missing or stale share a single fetch.

mod config;
mod rules;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

pub use config::{RobotsConfig, RobotsEnforcement, UnknownPolicy};
pub use rules::RobotsRules;

use crate::domain::DomainKey;
use crate::registry::DomainRegistry;
use crate::transport::{Method, Timeouts, Transport, TransportRequest};

/// Outcome of a robots.txt lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "detail", rename_all = "snake_case")]
pub enum RobotsDecision {
    Allow,
    Deny,
    /// robots.txt could not be determined; carries the reason.
    Unknown(String),
    /// No lookup was made (robots disabled or request rejected earlier).
    NotChecked,
}

impl RobotsDecision {
    /// Whether the request may proceed under `policy`.
    pub fn permits(&self, policy: UnknownPolicy) -> bool {
        match self {
            RobotsDecision::Allow | RobotsDecision::NotChecked => true,
            RobotsDecision::Deny => false,
            RobotsDecision::Unknown(_) => policy == UnknownPolicy::FailOpen,
        }
    }
}

/// Decision plus the domain's crawl delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotsVerdict {
    pub decision: RobotsDecision,
    pub crawl_delay: Option<Duration>,
}

#[derive(Debug)]
struct CachedRobots {
    rules: Result<Arc<RobotsRules>, String>,
    expires_at: Instant,
}

/// Per-domain robots.txt cache.
#[derive(Clone)]
pub struct RobotsCache {
    config: RobotsConfig,
    transport: Arc<dyn Transport>,
    entries: DomainRegistry<Option<CachedRobots>>,
}

impl RobotsCache {
    /// Create a cache that fetches through `transport`.
    pub fn new(config: RobotsConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            entries: DomainRegistry::new(),
        }
    }

    pub fn config(&self) -> &RobotsConfig {
        &self.config
    }

    /// Decide whether `user_agent` may fetch `path` on `domain`.
    ///
    /// Never fails: fetch problems become [`RobotsDecision::Unknown`].
    pub async fn check(&self, domain: &DomainKey, path: &str, user_agent: &str) -> RobotsVerdict {
        if !self.config.enabled {
            return RobotsVerdict {
                decision: RobotsDecision::NotChecked,
                crawl_delay: None,
            };
        }

        match self.rules(domain, user_agent).await {
            Ok(rules) => RobotsVerdict {
                decision: if rules.is_allowed(user_agent, path) {
                    RobotsDecision::Allow
                } else {
                    RobotsDecision::Deny
                },
                crawl_delay: rules.crawl_delay(user_agent),
            },
            Err(reason) => RobotsVerdict {
                decision: RobotsDecision::Unknown(reason),
                crawl_delay: None,
            },
        }
    }

    /// Cached rules for a domain, fetching them if missing or expired.
    pub async fn rules(
        &self,
        domain: &DomainKey,
        user_agent: &str,
    ) -> Result<Arc<RobotsRules>, String> {
        let entry = self.entries.entry_or_insert_with(domain, || None).await;
        // Held across the fetch so concurrent callers wait for one request
        let mut cached = entry.lock().await;

        let now = Instant::now();
        if let Some(hit) = cached.as_ref().filter(|c| c.expires_at > now) {
            return hit.rules.clone();
        }

        let rules = self.fetch(domain, user_agent).await.map(Arc::new);
        let ttl = match &rules {
            Ok(_) => self.config.ttl(),
            Err(reason) => {
                warn!("robots.txt for {} unavailable: {}", domain, reason);
                self.config.error_ttl()
            }
        };
        *cached = Some(CachedRobots {
            rules: rules.clone(),
            expires_at: Instant::now() + ttl,
        });
        rules
    }

    async fn fetch(&self, domain: &DomainKey, user_agent: &str) -> Result<RobotsRules, String> {
        let robots_url = domain.robots_url();
        debug!("Fetching robots.txt at {}", robots_url);

        let url = Url::parse(&robots_url).map_err(|e| e.to_string())?;
        let mut request = TransportRequest::new(Method::GET, url);
        request
            .headers
            .insert("user-agent".to_string(), user_agent.to_string());
        let timeout = self.config.fetch_timeout();
        request.timeouts = Timeouts {
            total: Some(timeout),
            ..Default::default()
        };

        let read = async {
            let response = self
                .transport
                .execute(request)
                .await
                .map_err(|e| e.to_string())?;

            match response.status {
                200..=299 => {}
                // No usable robots.txt: everything is allowed
                400..=499 => return Ok(RobotsRules::allow_all()),
                status => return Err(format!("robots.txt returned HTTP {}", status)),
            }

            let limit = usize::try_from(self.config.max_size).unwrap_or(usize::MAX);
            let mut body = Vec::new();
            let mut stream = response.body;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| e.to_string())?;
                let room = limit - body.len();
                body.extend_from_slice(&chunk[..chunk.len().min(room)]);
                if body.len() >= limit {
                    break;
                }
            }

            let text = decode_truncated(&body)?;
            Ok::<_, String>(RobotsRules::parse(text))
        };

        tokio::time::timeout(timeout, read)
            .await
            .map_err(|_| format!("robots.txt fetch timed out after {:?}", timeout))?
    }
}

/// Decode UTF-8, tolerating a multi-byte sequence cut by the size limit.
fn decode_truncated(body: &[u8]) -> Result<&str, String> {
    match std::str::from_utf8(body) {
        Ok(text) => Ok(text),
        Err(e) if e.error_len().is_none() => {
            // Incomplete trailing sequence; keep the valid prefix
            std::str::from_utf8(&body[..e.valid_up_to()]).map_err(|e| e.to_string())
        }
        Err(_) => Err("robots.txt is not valid UTF-8".to_string()),
    }
}
