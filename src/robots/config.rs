use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_from_secs;
use crate::error::ConfigError;

/// What to do when robots.txt could not be determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownPolicy {
    /// Proceed as if allowed.
    #[default]
    FailOpen,
    /// Refuse the request.
    FailClosed,
}

/// Whether denials are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotsEnforcement {
    #[default]
    Enforce,
    /// Record decisions but never block. Development only.
    DevOverride,
}

/// robots.txt settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotsConfig {
    pub enabled: bool,
    /// How long a fetched robots.txt stays valid.
    pub ttl_secs: f64,
    /// How long a failed lookup is remembered before retrying.
    pub error_ttl_secs: f64,
    pub fetch_timeout_secs: f64,
    pub on_unknown: UnknownPolicy,
    pub enforcement: RobotsEnforcement,
    /// Bytes of robots.txt considered; the rest is ignored.
    pub max_size: u64,
}

impl Default for RobotsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 86_400.0,
            error_ttl_secs: 300.0,
            fetch_timeout_secs: 10.0,
            on_unknown: UnknownPolicy::FailOpen,
            enforcement: RobotsEnforcement::Enforce,
            max_size: 512 * 1024,
        }
    }
}

impl RobotsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.ttl_secs.is_finite() && self.ttl_secs > 0.0) {
            return Err(ConfigError::invalid("robots.ttl_secs", "must be greater than 0"));
        }
        if !(self.error_ttl_secs.is_finite() && self.error_ttl_secs >= 0.0) {
            return Err(ConfigError::invalid(
                "robots.error_ttl_secs",
                "must be a non-negative number",
            ));
        }
        if !(self.fetch_timeout_secs.is_finite() && self.fetch_timeout_secs > 0.0) {
            return Err(ConfigError::invalid(
                "robots.fetch_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.max_size == 0 {
            return Err(ConfigError::invalid("robots.max_size", "must be greater than 0"));
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        duration_from_secs(self.ttl_secs)
    }

    pub fn error_ttl(&self) -> Duration {
        duration_from_secs(self.error_ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        duration_from_secs(self.fetch_timeout_secs)
    }
}
