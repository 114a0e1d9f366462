//! Request descriptions.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderName, HeaderValue};
use serde::Serialize;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{ConfigError, HttpError};
use crate::rate_limiter::RateLimitConfig;
use crate::retry::RetryConfig;
use crate::transport::{Method, Timeouts};

/// Per-call replacements for the client's policy configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOverrides {
    pub retry: Option<RetryConfig>,
    pub rate_limit: Option<RateLimitConfig>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl RequestOverrides {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        if let Some(rate_limit) = &self.rate_limit {
            rate_limit.validate()?;
        }
        if let Some(circuit_breaker) = &self.circuit_breaker {
            circuit_breaker.validate()?;
        }
        Ok(())
    }
}

/// Description of one outbound request.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    /// Appended to the URL's existing query.
    pub query: Vec<(String, String)>,
    pub body: Option<Bytes>,
    /// Total timeout per attempt; replaces the configured one.
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    /// Longest wait for each chunk of the response body.
    pub read_timeout: Option<Duration>,
    pub max_download_size: Option<u64>,
    pub allowed_content_types: Option<Vec<String>>,
    /// Correlation id; generated when absent.
    pub trace_id: Option<String>,
    /// Copied into the result metadata.
    pub context: BTreeMap<String, String>,
    pub overrides: RequestOverrides,
}

impl RequestSpec {
    /// Create a request with no headers or body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            query: Vec::new(),
            body: None,
            timeout: None,
            connect_timeout: None,
            read_timeout: None,
            max_download_size: None,
            allowed_content_types: None,
            trace_id: None,
            context: BTreeMap::new(),
            overrides: RequestOverrides::default(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::HEAD, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Set a header. Names are case-insensitive.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(self.header("content-type", "application/json").body(body))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Per-call timeouts; unset values fall back to the client's.
    pub(crate) fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: self.connect_timeout,
            read: self.read_timeout,
            total: self.timeout,
        }
    }

    pub fn max_download_size(mut self, bytes: u64) -> Self {
        self.max_download_size = Some(bytes);
        self
    }

    pub fn allowed_content_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_content_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.overrides.retry = Some(config);
        self
    }

    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.overrides.rate_limit = Some(config);
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.overrides.circuit_breaker = Some(config);
        self
    }

    /// Reject malformed per-call settings before any work is done.
    pub(crate) fn validate(&self) -> Result<(), HttpError> {
        for (name, timeout) in [
            ("timeout", self.timeout),
            ("connect_timeout", self.connect_timeout),
            ("read_timeout", self.read_timeout),
        ] {
            if timeout.is_some_and(|t| t.is_zero()) {
                return Err(HttpError::InvalidRequest(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }
        for (name, value) in &self.headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(HttpError::InvalidRequest(format!(
                    "invalid header name {:?}",
                    name
                )));
            }
            if HeaderValue::from_str(value).is_err() {
                return Err(HttpError::InvalidRequest(format!(
                    "invalid value for header {:?}",
                    name
                )));
            }
        }
        if self.max_download_size == Some(0) {
            return Err(HttpError::InvalidRequest(
                "max_download_size must be greater than 0".to_string(),
            ));
        }
        self.overrides
            .validate()
            .map_err(|e| HttpError::InvalidRequest(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_lowercases_headers() {
        let spec = RequestSpec::get("https://example.com")
            .header("X-Trace", "1")
            .header("x-trace", "2");
        assert_eq!(spec.headers.len(), 1);
        assert_eq!(spec.headers["x-trace"], "2");
    }

    #[test]
    fn test_json_body() {
        let spec = RequestSpec::post("https://example.com/api")
            .json(&serde_json::json!({"q": "ladon"}))
            .unwrap();
        assert_eq!(spec.headers["content-type"], "application/json");
        assert_eq!(spec.body.as_deref(), Some(&br#"{"q":"ladon"}"#[..]));
    }

    #[test]
    fn test_invalid_override_rejected() {
        let spec = RequestSpec::get("https://example.com").rate_limit(RateLimitConfig {
            requests_per_second: -1.0,
            ..Default::default()
        });
        assert!(matches!(spec.validate(), Err(HttpError::InvalidRequest(_))));

        let spec = RequestSpec::get("https://example.com").timeout(Duration::ZERO);
        assert!(spec.validate().is_err());
        assert!(RequestSpec::get("https://example.com").validate().is_ok());
    }

    #[test]
    fn test_invalid_headers_rejected() {
        let spec = RequestSpec::get("https://example.com").header("bad header", "x");
        assert!(matches!(spec.validate(), Err(HttpError::InvalidRequest(_))));

        let spec = RequestSpec::get("https://example.com").header("x-note", "line\nbreak");
        assert!(matches!(spec.validate(), Err(HttpError::InvalidRequest(_))));
    }

    #[test]
    fn test_per_call_timeouts() {
        let spec = RequestSpec::get("https://example.com")
            .connect_timeout(Duration::from_secs(1))
            .read_timeout(Duration::from_secs(2));
        assert_eq!(
            spec.timeouts(),
            Timeouts {
                connect: Some(Duration::from_secs(1)),
                read: Some(Duration::from_secs(2)),
                total: None,
            }
        );

        let spec = RequestSpec::get("https://example.com").read_timeout(Duration::ZERO);
        assert!(spec.validate().is_err());
    }
}
