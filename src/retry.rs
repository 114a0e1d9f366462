//! Retry policy: exponential backoff with jitter.
//!
//! The policy is pure. It never sleeps or touches shared state; the
//! pipeline owns the loop and the sleeping.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::duration_from_secs;
use crate::error::ConfigError;
use crate::outcome::Outcome;
use crate::transport::Method;

/// Retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts = 1 + max_retries.
    pub max_retries: u32,
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
    /// Upper bound of the random extra delay, as a fraction of the backoff.
    pub jitter_factor: f64,
    pub retryable_statuses: Vec<u16>,
    pub retry_on_connect_error: bool,
    pub retry_on_timeout: bool,
    pub retry_on_protocol_error: bool,
    /// Only these methods are ever retried.
    pub retryable_methods: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_secs: 0.5,
            max_delay_secs: 30.0,
            jitter_factor: 0.1,
            retryable_statuses: Vec::new(),
            retry_on_connect_error: true,
            retry_on_timeout: true,
            retry_on_protocol_error: false,
            retryable_methods: vec!["GET".to_string(), "HEAD".to_string()],
        }
    }
}

impl RetryConfig {
    /// Check values are in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_delay_secs.is_finite() && self.base_delay_secs >= 0.0) {
            return Err(ConfigError::invalid(
                "retry.base_delay_secs",
                "must be a non-negative number",
            ));
        }
        if !(self.max_delay_secs.is_finite() && self.max_delay_secs >= self.base_delay_secs) {
            return Err(ConfigError::invalid(
                "retry.max_delay_secs",
                "must be at least base_delay_secs",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::invalid(
                "retry.jitter_factor",
                "must be within [0, 1]",
            ));
        }
        if let Some(status) = self
            .retryable_statuses
            .iter()
            .find(|s| !(100..=599).contains(*s))
        {
            return Err(ConfigError::invalid(
                "retry.retryable_statuses",
                format!("{} is not an HTTP status", status),
            ));
        }
        Ok(())
    }

    /// Whether a failed request with this method may be retried at all.
    pub fn permits_retry(&self, method: &Method) -> bool {
        self.max_retries > 0
            && self
                .retryable_methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(method.as_str()))
    }

    /// Backoff before retry number `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(62) as i32;
        let secs = (self.base_delay_secs * 2f64.powi(exponent)).min(self.max_delay_secs);
        duration_from_secs(secs)
    }
}

/// What to do after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Stop,
    RetryAfter(Duration),
}

/// Decide whether to retry after attempt number `attempt` (1-based).
pub fn decide(attempt: u32, outcome: &Outcome, config: &RetryConfig) -> RetryDecision {
    decide_with_rng(attempt, outcome, config, &mut rand::thread_rng())
}

/// [`decide`] with an explicit random source.
pub fn decide_with_rng<R: Rng + ?Sized>(
    attempt: u32,
    outcome: &Outcome,
    config: &RetryConfig,
    rng: &mut R,
) -> RetryDecision {
    if !outcome.is_retryable() || attempt > config.max_retries {
        return RetryDecision::Stop;
    }

    let backoff = config.backoff(attempt);
    let max_jitter = backoff.as_secs_f64() * config.jitter_factor;
    let jitter = if max_jitter > 0.0 {
        rng.gen_range(0.0..=max_jitter)
    } else {
        0.0
    };

    RetryDecision::RetryAfter(backoff + duration_from_secs(jitter))
}
