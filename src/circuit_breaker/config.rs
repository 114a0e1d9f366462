use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_from_secs;
use crate::error::ConfigError;

/// Circuit breaker settings, applied per domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Number of most recent outcomes considered.
    pub window_size: usize,
    /// Outcomes required in the window before the circuit may open.
    pub minimum_volume: usize,
    /// Failure share of the window at which the circuit opens.
    pub failure_ratio: f64,
    /// Time spent OPEN before probes are allowed.
    pub cooldown_secs: f64,
    /// Concurrent probes in HALF-OPEN; this many successes close the circuit.
    pub probe_limit: u32,
    /// Statuses counted as domain failures. Other 4xx are ignored.
    pub failure_statuses: Vec<u16>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        let mut failure_statuses = vec![429];
        failure_statuses.extend(500..=599);

        Self {
            enabled: true,
            window_size: 20,
            minimum_volume: 5,
            failure_ratio: 0.5,
            cooldown_secs: 30.0,
            probe_limit: 1,
            failure_statuses,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker.window_size",
                "must be at least 1",
            ));
        }
        if self.minimum_volume == 0 || self.minimum_volume > self.window_size {
            return Err(ConfigError::invalid(
                "circuit_breaker.minimum_volume",
                "must be between 1 and window_size",
            ));
        }
        if !(self.failure_ratio > 0.0 && self.failure_ratio <= 1.0) {
            return Err(ConfigError::invalid(
                "circuit_breaker.failure_ratio",
                "must be within (0, 1]",
            ));
        }
        if !(self.cooldown_secs.is_finite() && self.cooldown_secs >= 0.0) {
            return Err(ConfigError::invalid(
                "circuit_breaker.cooldown_secs",
                "must be a non-negative number",
            ));
        }
        if self.probe_limit == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker.probe_limit",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        duration_from_secs(self.cooldown_secs)
    }

    pub fn is_failure_status(&self, status: u16) -> bool {
        self.failure_statuses.contains(&status)
    }
}
