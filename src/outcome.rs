//! Attempt outcome classification.
//!
//! Every attempt is classified exactly once; the same classification feeds
//! the retry policy, the circuit breaker and the observers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryConfig;
use crate::transport::{Method, TransportError};

/// Why an attempt did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum FailureReason {
    /// The server answered with a status of 400 or above.
    Status(u16),
    ConnectError,
    Timeout,
    ProtocolError,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Status(status) => write!(f, "HTTP {}", status),
            FailureReason::ConnectError => f.write_str("connect error"),
            FailureReason::Timeout => f.write_str("timeout"),
            FailureReason::ProtocolError => f.write_str("protocol error"),
        }
    }
}

/// Classified result of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    RetryableFailure(FailureReason),
    NonRetryableFailure(FailureReason),
}

impl Outcome {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Outcome::RetryableFailure(_))
    }

    /// The failure reason, if the attempt failed.
    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            Outcome::Success => None,
            Outcome::RetryableFailure(r) | Outcome::NonRetryableFailure(r) => Some(*r),
        }
    }
}

/// What the circuit breaker should count for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitSignal {
    Success,
    Failure,
    /// Client errors say nothing about the domain's health.
    Ignored,
}

/// Classify a received status.
///
/// Statuses below 400 are successes. Statuses listed in
/// `retryable_statuses` are retryable for idempotent methods when the
/// retry budget is non-zero; otherwise every response is terminal.
pub fn classify_status(status: u16, method: &Method, config: &RetryConfig) -> Outcome {
    if status < 400 {
        Outcome::Success
    } else if config.retryable_statuses.contains(&status) && config.permits_retry(method) {
        Outcome::RetryableFailure(FailureReason::Status(status))
    } else {
        Outcome::NonRetryableFailure(FailureReason::Status(status))
    }
}

/// Classify a transport failure.
pub fn classify_transport_error(
    error: &TransportError,
    method: &Method,
    config: &RetryConfig,
) -> Outcome {
    let reason = error.reason();
    let enabled = match error {
        TransportError::Connect(_) => config.retry_on_connect_error,
        TransportError::Timeout(_) => config.retry_on_timeout,
        TransportError::Protocol(_) | TransportError::Body(_) => config.retry_on_protocol_error,
        TransportError::Request(_) => false,
    };

    if enabled && config.permits_retry(method) {
        Outcome::RetryableFailure(reason)
    } else {
        Outcome::NonRetryableFailure(reason)
    }
}

/// Circuit signal for a transport failure.
pub fn transport_signal(error: &TransportError) -> CircuitSignal {
    if error.is_domain_failure() {
        CircuitSignal::Failure
    } else {
        CircuitSignal::Ignored
    }
}

/// Circuit signal for a received status.
pub fn status_signal(status: u16, config: &CircuitBreakerConfig) -> CircuitSignal {
    if status < 400 {
        CircuitSignal::Success
    } else if config.is_failure_status(status) {
        CircuitSignal::Failure
    } else {
        CircuitSignal::Ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retry_config() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            retryable_statuses: vec![503],
            ..Default::default()
        }
    }

    #[test]
    fn test_success_statuses() {
        let config = retry_config();
        assert_eq!(classify_status(200, &Method::GET, &config), Outcome::Success);
        assert_eq!(classify_status(304, &Method::GET, &config), Outcome::Success);
    }

    #[test]
    fn test_retryable_status_needs_idempotent_method() {
        let config = retry_config();
        assert_eq!(
            classify_status(503, &Method::GET, &config),
            Outcome::RetryableFailure(FailureReason::Status(503))
        );
        assert_eq!(
            classify_status(503, &Method::POST, &config),
            Outcome::NonRetryableFailure(FailureReason::Status(503))
        );
        assert_eq!(
            classify_status(404, &Method::GET, &config),
            Outcome::NonRetryableFailure(FailureReason::Status(404))
        );
    }

    #[test]
    fn test_transport_errors() {
        let config = retry_config();
        let timeout = TransportError::Timeout("read".into());
        assert!(classify_transport_error(&timeout, &Method::HEAD, &config).is_retryable());
        assert!(!classify_transport_error(&timeout, &Method::POST, &config).is_retryable());

        // Protocol errors are not retried by default
        let protocol = TransportError::Protocol("reset".into());
        assert_eq!(
            classify_transport_error(&protocol, &Method::GET, &config),
            Outcome::NonRetryableFailure(FailureReason::ProtocolError)
        );
    }

    #[test]
    fn test_unbuildable_request_is_never_retried() {
        let config = RetryConfig {
            retry_on_protocol_error: true,
            ..retry_config()
        };
        let error = TransportError::Request("invalid header name".into());
        assert_eq!(
            classify_transport_error(&error, &Method::GET, &config),
            Outcome::NonRetryableFailure(FailureReason::ProtocolError)
        );
        assert_eq!(transport_signal(&error), CircuitSignal::Ignored);
        assert_eq!(
            transport_signal(&TransportError::Timeout("read".into())),
            CircuitSignal::Failure
        );
    }

    #[test]
    fn test_zero_budget_makes_everything_terminal() {
        let config = RetryConfig {
            max_retries: 0,
            ..retry_config()
        };
        let timeout = TransportError::Timeout("read".into());
        assert_eq!(
            classify_transport_error(&timeout, &Method::GET, &config),
            Outcome::NonRetryableFailure(FailureReason::Timeout)
        );
        assert_eq!(
            classify_status(503, &Method::GET, &config),
            Outcome::NonRetryableFailure(FailureReason::Status(503))
        );
    }

    #[test]
    fn test_status_signal() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(status_signal(200, &config), CircuitSignal::Success);
        assert_eq!(status_signal(404, &config), CircuitSignal::Ignored);
        assert_eq!(status_signal(429, &config), CircuitSignal::Failure);
        assert_eq!(status_signal(502, &config), CircuitSignal::Failure);
    }

    #[test]
    fn test_outcome_reason() {
        assert_eq!(Outcome::Success.reason(), None);
        assert_eq!(
            Outcome::RetryableFailure(FailureReason::Timeout).reason(),
            Some(FailureReason::Timeout)
        );
    }
}
