//! Transport capability used by the pipeline.
//!
//! The pipeline never talks to reqwest directly; it goes through
//! [`Transport`], so tests can script responses and failures.

mod reqwest_transport;

pub use reqwest_transport::ReqwestTransport;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;
use url::Url;

pub use reqwest::Method;

use crate::outcome::FailureReason;

/// Streamed response body.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Low-level failure of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The body stream failed after the response head arrived.
    #[error("failed reading response body: {0}")]
    Body(String),

    /// The request could not be built; nothing was sent.
    #[error("request could not be built: {0}")]
    Request(String),
}

impl TransportError {
    /// Classification used by retry and circuit decisions.
    pub fn reason(&self) -> FailureReason {
        match self {
            TransportError::Connect(_) => FailureReason::ConnectError,
            TransportError::Timeout(_) => FailureReason::Timeout,
            TransportError::Protocol(_) | TransportError::Body(_) | TransportError::Request(_) => {
                FailureReason::ProtocolError
            }
        }
    }

    /// Whether the failure says something about the remote domain's health.
    pub fn is_domain_failure(&self) -> bool {
        !matches!(self, TransportError::Request(_))
    }

    /// Short error name for metadata.
    pub fn name(&self) -> &'static str {
        match self {
            TransportError::Connect(_) => "ConnectError",
            TransportError::Timeout(_) => "Timeout",
            TransportError::Protocol(_) => "ProtocolError",
            TransportError::Body(_) => "BodyError",
            TransportError::Request(_) => "InvalidRequest",
        }
    }
}

/// Timeouts for one exchange. `None` means no limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Option<Duration>,
    pub read: Option<Duration>,
    pub total: Option<Duration>,
}

/// A fully resolved outbound request.
///
/// Header names are lowercase.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    /// `read` bounds the wait for each body chunk; `total` bounds the
    /// whole exchange.
    pub timeouts: Timeouts,
}

impl TransportRequest {
    /// Create a bodyless request with no headers.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HashMap::new(),
            body: None,
            timeouts: Timeouts::default(),
        }
    }
}

/// Response head plus a body that has not been read yet.
pub struct TransportResponse {
    pub status: u16,
    pub reason: Option<String>,
    /// URL after redirects.
    pub url: String,
    /// Lowercase header names. Repeated headers are joined with `, `
    /// except `set-cookie`, which keeps its last value. Values that are not
    /// valid UTF-8 are dropped.
    pub headers: HashMap<String, String>,
    pub body: BodyStream,
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Performs a single HTTP exchange. No retries, no policy.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: TransportRequest)
        -> Result<TransportResponse, TransportError>;
}
