//! ladon-net - polite, resilient outbound HTTP for crawler adapters.
//!
//! Every request goes through one pipeline: a robots.txt check, circuit
//! breaker admission, a per-domain rate limit, the exchange itself and a
//! bounded retry loop. Callers always get a result with [`Meta`] describing
//! what happened, whether the call succeeded or not.

pub mod circuit_breaker;
pub mod config;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod meta;
pub mod observer;
pub mod outcome;
pub mod rate_limiter;
pub mod retry;
pub mod robots;
pub mod transport;

mod registry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitTransition};
pub use config::{HttpClientConfig, TimeoutConfig};
pub use domain::DomainKey;
pub use error::{ConfigError, ErrorKind, HttpError, LimitViolation, TransportError};
pub use http_client::{
    Download, HeadResponse, HttpClient, HttpClientBuilder, HttpResponse, RequestOverrides,
    RequestSpec, ResponseHeaders,
};
pub use meta::{FetchError, FetchResult, Fetched, Meta, ResultMeta};
pub use observer::{AttemptEvent, CallEvent, RequestObserver};
pub use outcome::{CircuitSignal, FailureReason, Outcome};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use retry::{RetryConfig, RetryDecision};
pub use robots::{
    RobotsCache, RobotsConfig, RobotsDecision, RobotsEnforcement, RobotsRules, UnknownPolicy,
};
pub use transport::{Method, Transport, TransportRequest, TransportResponse};
