//! Error types for the request pipeline and its configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::DomainKey;
use crate::outcome::FailureReason;
pub use crate::transport::TransportError;

/// Terminal failure of one pipeline call.
///
/// Individual attempt failures are handled by the retry loop; only the final
/// state of the loop is surfaced here.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Connect, read or protocol failure reported by the transport.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Retryable failures persisted past the retry budget.
    #[error("retries exhausted after {attempts} attempts (last failure: {last}): {detail}")]
    RetryExhausted {
        attempts: u32,
        last: FailureReason,
        detail: String,
    },

    /// Short-circuited by an open circuit breaker before any I/O.
    #[error("circuit open for {domain}")]
    CircuitOpen { domain: DomainKey },

    /// Denied by the domain's robots.txt before any I/O.
    #[error("blocked by robots.txt: {path} on {domain}")]
    RobotsBlocked { domain: DomainKey, path: String },

    /// Response body violated the size or content-type limits.
    #[error("download limit exceeded: {0}")]
    DownloadLimitExceeded(#[from] LimitViolation),

    /// The request itself is malformed (bad URL, invalid override).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Writing a download to its destination failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which download limit a response violated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitViolation {
    #[error("body of at least {received} bytes exceeds the {limit} byte limit")]
    TooLarge { limit: u64, received: u64 },

    #[error("content type {content_type:?} is not allowed")]
    ContentType { content_type: Option<String> },
}

/// Discriminant of [`HttpError`], used in events and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    RetryExhausted,
    CircuitOpen,
    RobotsBlocked,
    DownloadLimitExceeded,
    InvalidRequest,
    Io,
}

impl HttpError {
    /// The error's kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HttpError::Transport(_) => ErrorKind::Transport,
            HttpError::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            HttpError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            HttpError::RobotsBlocked { .. } => ErrorKind::RobotsBlocked,
            HttpError::DownloadLimitExceeded(_) => ErrorKind::DownloadLimitExceeded,
            HttpError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            HttpError::Io(_) => ErrorKind::Io,
        }
    }

    /// Short name recorded as `final_error` in request metadata.
    pub fn name(&self) -> &'static str {
        match self {
            HttpError::Transport(e) => e.name(),
            HttpError::RetryExhausted { .. } => "RetryExhausted",
            HttpError::CircuitOpen { .. } => "CircuitOpen",
            HttpError::RobotsBlocked { .. } => "RobotsBlocked",
            HttpError::DownloadLimitExceeded(_) => "DownloadLimitExceeded",
            HttpError::InvalidRequest(_) => "InvalidRequest",
            HttpError::Io(_) => "Io",
        }
    }
}

/// Invalid or unreadable client configuration.
///
/// Raised when a client is constructed, never while a request is running.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("failed to build HTTP transport: {0}")]
    Transport(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_name() {
        let err = HttpError::Transport(TransportError::Timeout("read".to_string()));
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.name(), "Timeout");

        let err = HttpError::RetryExhausted {
            attempts: 3,
            last: FailureReason::ConnectError,
            detail: "refused".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::RetryExhausted);
        assert!(err.to_string().contains("3 attempts"));
    }

    #[test]
    fn test_limit_violation_message() {
        let err = HttpError::from(LimitViolation::TooLarge {
            limit: 10,
            received: 12,
        });
        assert_eq!(err.kind(), ErrorKind::DownloadLimitExceeded);
        assert!(err.to_string().contains("10 byte limit"));
    }

    #[test]
    fn test_config_error_names_field() {
        let err = ConfigError::invalid("retry.jitter_factor", "must be within [0, 1]");
        assert_eq!(
            err.to_string(),
            "invalid value for `retry.jitter_factor`: must be within [0, 1]"
        );
    }
}
