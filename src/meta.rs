//! Result and metadata contract.
//!
//! Every pipeline call returns a [`Meta`] describing what happened,
//! whether the call succeeded or not.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::circuit_breaker::CircuitState;
use crate::domain::DomainKey;
use crate::error::{ErrorKind, HttpError};
use crate::robots::RobotsDecision;

/// Serialize a `Duration` as float milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = f64::deserialize(deserializer)?;
        Ok(crate::config::duration_from_secs(millis / 1000.0))
    }
}

pub(crate) mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_secs_f64() * 1000.0)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let millis = Option::<f64>::deserialize(deserializer)?;
        Ok(millis.map(|ms| crate::config::duration_from_secs(ms / 1000.0)))
    }
}

/// Metadata for one pipeline call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub trace_id: String,
    pub method: String,
    /// URL as requested, including query parameters.
    pub url: String,
    /// URL of the final response after redirects.
    pub final_url: Option<String>,
    /// `None` when the URL could not be parsed.
    pub domain: Option<DomainKey>,
    pub status: Option<u16>,
    pub reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(rename = "latency_ms", with = "duration_ms")]
    pub latency: Duration,
    /// Attempts actually sent; 0 when rejected before any I/O.
    pub attempts: u32,
    #[serde(rename = "total_backoff_ms", with = "duration_ms")]
    pub total_backoff: Duration,
    #[serde(rename = "rate_limit_wait_ms", with = "duration_ms")]
    pub rate_limit_wait: Duration,
    /// Circuit state observed at the last admission check.
    pub circuit_state: Option<CircuitState>,
    pub robots: RobotsDecision,
    /// A robots denial was recorded but not enforced.
    pub robots_bypassed: bool,
    /// Bytes of the final response body.
    pub response_size: Option<u64>,
    #[serde(rename = "timeout_ms", with = "option_duration_ms")]
    pub timeout: Option<Duration>,
    pub error_kind: Option<ErrorKind>,
    /// Short name of the terminal error.
    pub final_error: Option<String>,
    /// Caller-supplied context. Pipeline fields never come from here.
    pub context: BTreeMap<String, String>,
}

/// Accumulates metadata while a call runs.
#[derive(Debug)]
pub(crate) struct MetaBuilder {
    meta: Meta,
    started: Instant,
}

impl MetaBuilder {
    pub(crate) fn start(
        trace_id: String,
        method: String,
        url: String,
        context: BTreeMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            meta: Meta {
                trace_id,
                method,
                url,
                final_url: None,
                domain: None,
                status: None,
                reason: None,
                started_at: now,
                finished_at: now,
                latency: Duration::ZERO,
                attempts: 0,
                total_backoff: Duration::ZERO,
                rate_limit_wait: Duration::ZERO,
                circuit_state: None,
                robots: RobotsDecision::NotChecked,
                robots_bypassed: false,
                response_size: None,
                timeout: None,
                error_kind: None,
                final_error: None,
                context,
            },
            started: Instant::now(),
        }
    }

    pub(crate) fn meta(&self) -> &Meta {
        &self.meta
    }

    pub(crate) fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    /// Stamp the end of the call and the terminal error, if any.
    pub(crate) fn finish(mut self, error: Option<&HttpError>) -> Meta {
        let latency = self.started.elapsed();
        self.meta.latency = latency;
        self.meta.finished_at = self.meta.started_at
            + chrono::Duration::from_std(latency).unwrap_or_else(|_| chrono::Duration::zero());
        if let Some(error) = error {
            self.meta.error_kind = Some(error.kind());
            self.meta.final_error = Some(error.name().to_string());
        }
        self.meta
    }
}

/// Successful call: the value and its metadata.
#[derive(Debug)]
pub struct Fetched<T> {
    pub value: T,
    pub meta: Meta,
}

impl<T> Fetched<T> {
    pub fn into_parts(self) -> (T, Meta) {
        (self.value, self.meta)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        Fetched {
            value: f(self.value),
            meta: self.meta,
        }
    }
}

/// Failed call: the error and its metadata.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct FetchError {
    pub kind: HttpError,
    pub meta: Meta,
}

impl FetchError {
    pub fn error_kind(&self) -> ErrorKind {
        self.kind.kind()
    }
}

/// Result of every pipeline call.
pub type FetchResult<T> = Result<Fetched<T>, FetchError>;

/// Access the metadata of a result regardless of outcome.
pub trait ResultMeta {
    fn meta(&self) -> &Meta;
}

impl<T> ResultMeta for FetchResult<T> {
    fn meta(&self) -> &Meta {
        match self {
            Ok(fetched) => &fetched.meta,
            Err(error) => &error.meta,
        }
    }
}
