//! HTTP client with robots.txt, rate limiting, circuit breaking and retries.
//!
//! Every call runs the same pipeline: robots check, circuit admission, then
//! per attempt a rate-limit slot, the exchange, classification and the retry
//! decision. Results always carry a [`Meta`], on success and on failure.

mod body;
mod pipeline;
mod request;
mod response;
mod user_agent;

pub use body::BodyLimits;
pub use request::{RequestOverrides, RequestSpec};
pub use response::{
    parse_content_disposition_filename, Download, HeadResponse, HttpResponse, ResponseHeaders,
};
pub use user_agent::{resolve_user_agent, USER_AGENT};

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::warn;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::HttpClientConfig;
use crate::error::ConfigError;
use crate::meta::{Fetched, FetchResult};
use crate::observer::{Observers, RequestObserver};
use crate::rate_limiter::RateLimiter;
use crate::robots::{RobotsCache, RobotsEnforcement};
use crate::transport::{ReqwestTransport, Transport};

/// Resilient HTTP client.
///
/// Cloning is cheap; clones share the rate limiter, circuit breaker, robots
/// cache and transport.
#[derive(Clone)]
pub struct HttpClient {
    config: Arc<HttpClientConfig>,
    user_agent: String,
    transport: Arc<dyn Transport>,
    rate_limiter: RateLimiter,
    circuit_breaker: CircuitBreaker,
    robots: RobotsCache,
    observers: Observers,
}

impl HttpClient {
    /// Create a client over the default reqwest transport.
    pub fn new(config: HttpClientConfig) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    pub fn builder(config: HttpClientConfig) -> HttpClientBuilder {
        HttpClientBuilder {
            config,
            transport: None,
            rate_limiter: None,
            circuit_breaker: None,
            robots: None,
            observers: Vec::new(),
        }
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// User-Agent sent with requests and matched against robots.txt.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub fn robots(&self) -> &RobotsCache {
        &self.robots
    }

    /// Run a request and buffer the response body.
    pub async fn execute(&self, spec: RequestSpec) -> FetchResult<HttpResponse> {
        let Fetched { value, meta } = self.perform(spec, &body::Buffer).await?;
        let (head, body) = value;
        Ok(Fetched {
            value: HttpResponse {
                status: head.status,
                reason: head.reason,
                url: head.url,
                headers: head.headers,
                body,
            },
            meta,
        })
    }

    /// GET a URL.
    pub async fn get(&self, url: &str) -> FetchResult<HttpResponse> {
        self.execute(RequestSpec::get(url)).await
    }

    /// POST a body to a URL. Not retried unless POST is listed in
    /// `retry.retryable_methods`.
    pub async fn post(&self, url: &str, body: impl Into<Bytes>) -> FetchResult<HttpResponse> {
        self.execute(RequestSpec::post(url).body(body)).await
    }

    /// HEAD a URL.
    pub async fn head(&self, url: &str) -> FetchResult<HeadResponse> {
        self.execute_head(RequestSpec::head(url)).await
    }

    /// Run a request whose body is read and dropped. Download limits do not
    /// apply.
    pub async fn execute_head(&self, spec: RequestSpec) -> FetchResult<HeadResponse> {
        let fetched = self.perform(spec, &body::Discard).await?;
        Ok(fetched.map(|(head, _)| HeadResponse {
            status: head.status,
            reason: head.reason,
            url: head.url,
            headers: head.headers,
        }))
    }

    /// Run a request and stream the body into `dest`.
    ///
    /// The file appears only once the whole body has arrived within limits.
    /// Error statuses are written too; check `status` on the result.
    pub async fn download(
        &self,
        spec: RequestSpec,
        dest: impl AsRef<Path>,
    ) -> FetchResult<Download> {
        let sink = body::ToFile {
            dest: dest.as_ref(),
        };
        let fetched = self.perform(spec, &sink).await?;
        Ok(fetched.map(|(head, stored)| Download {
            status: head.status,
            url: head.url,
            headers: head.headers,
            path: stored.path,
            size: stored.size,
            sha256: stored.sha256,
        }))
    }
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    config: HttpClientConfig,
    transport: Option<Arc<dyn Transport>>,
    rate_limiter: Option<RateLimiter>,
    circuit_breaker: Option<CircuitBreaker>,
    robots: Option<RobotsCache>,
    observers: Vec<Arc<dyn RequestObserver>>,
}

impl HttpClientBuilder {
    /// Use a custom transport instead of reqwest.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Share a rate limiter with other clients.
    pub fn rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    /// Share a circuit breaker with other clients.
    pub fn circuit_breaker(mut self, circuit_breaker: CircuitBreaker) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self
    }

    /// Share a robots.txt cache with other clients.
    pub fn robots_cache(mut self, robots: RobotsCache) -> Self {
        self.robots = Some(robots);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn RequestObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Validate the configuration and assemble the client.
    pub fn build(self) -> Result<HttpClient, ConfigError> {
        self.config.validate()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.config)?),
        };

        if self.config.robots.enabled
            && self.config.robots.enforcement == RobotsEnforcement::DevOverride
        {
            warn!("robots.txt development override is active: disallowed paths will be fetched");
        }

        let user_agent = resolve_user_agent(self.config.user_agent.as_deref());
        let rate_limiter = self
            .rate_limiter
            .unwrap_or_else(|| RateLimiter::new(self.config.rate_limit.clone()));
        let circuit_breaker = self
            .circuit_breaker
            .unwrap_or_else(|| CircuitBreaker::new(self.config.circuit_breaker.clone()));
        let robots = self
            .robots
            .unwrap_or_else(|| RobotsCache::new(self.config.robots.clone(), transport.clone()));

        Ok(HttpClient {
            config: Arc::new(self.config),
            user_agent,
            transport,
            rate_limiter,
            circuit_breaker,
            robots,
            observers: Observers::new(self.observers),
        })
    }
}
