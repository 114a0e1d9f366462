//! The request pipeline.

use std::collections::HashMap;

use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use super::body::{BodyError, BodyLimits, BodySink};
use super::{HttpClient, RequestSpec};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitPermit, CircuitState};
use crate::domain::DomainKey;
use crate::error::HttpError;
use crate::meta::{FetchError, Fetched, FetchResult, MetaBuilder};
use crate::observer::{AttemptEvent, CallEvent, Observers};
use crate::outcome::{
    classify_status, classify_transport_error, status_signal, transport_signal, CircuitSignal,
    FailureReason, Outcome,
};
use crate::rate_limiter::RateLimitConfig;
use crate::retry::{decide, RetryConfig, RetryDecision};
use crate::robots::{RobotsDecision, RobotsEnforcement};
use crate::transport::{Timeouts, TransportError, TransportRequest, TransportResponse};

const REQUEST_TARGET: &str = "ladon_net::request";

/// Status line and headers of a received response.
#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub status: u16,
    pub reason: Option<String>,
    pub url: String,
    pub headers: HashMap<String, String>,
}

/// What one attempt produced.
enum Exchange<T> {
    Completed { head: ResponseHead, output: T },
    /// A retryable status; the body was not read.
    RetryableStatus { head: ResponseHead },
    Failed {
        error: TransportError,
        head: Option<ResponseHead>,
    },
    /// The response broke a download limit or could not be stored.
    Rejected { error: HttpError, head: ResponseHead },
}

impl<T> Exchange<T> {
    fn head(&self) -> Option<&ResponseHead> {
        match self {
            Exchange::Completed { head, .. }
            | Exchange::RetryableStatus { head }
            | Exchange::Rejected { head, .. } => Some(head),
            Exchange::Failed { head, .. } => head.as_ref(),
        }
    }
}

/// An admitted attempt whose outcome has not been recorded yet.
///
/// If the call future is dropped mid-exchange, the attempt is recorded as
/// a failure on a spawned task so the domain's window still sees it.
struct InFlight {
    breaker: CircuitBreaker,
    observers: Observers,
    domain: DomainKey,
    permit: CircuitPermit,
    config: CircuitBreakerConfig,
    armed: bool,
}

impl InFlight {
    fn settle(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.armed || !self.config.enabled || self.permit.is_bypass() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("Abandoned attempt to {} could not be recorded", self.domain);
            return;
        };
        let breaker = self.breaker.clone();
        let observers = self.observers.clone();
        let domain = self.domain.clone();
        let permit = self.permit;
        let config = self.config.clone();
        debug!("Attempt to {} abandoned, recording it as a failure", domain);
        handle.spawn(async move {
            if let Some(transition) = breaker
                .record(&domain, &permit, CircuitSignal::Failure, Some(&config))
                .await
            {
                observers.transition(&transition);
            }
        });
    }
}

/// Effective per-call settings.
struct CallPolicy<'a> {
    retry: &'a RetryConfig,
    rate_limit: &'a RateLimitConfig,
    circuit_breaker: &'a CircuitBreakerConfig,
    timeouts: Timeouts,
    limits: BodyLimits,
}

impl HttpClient {
    /// Run one call through the pipeline and report it.
    pub(super) async fn perform<S: BodySink>(
        &self,
        spec: RequestSpec,
        sink: &S,
    ) -> FetchResult<(ResponseHead, S::Output)> {
        let trace_id = spec
            .trace_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut trace = MetaBuilder::start(
            trace_id,
            spec.method.to_string(),
            spec.url.clone(),
            spec.context.clone(),
        );

        let result = self.run(&spec, sink, &mut trace).await;

        let meta = trace.finish(result.as_ref().err());
        let error_detail = result.as_ref().err().map(|e| e.to_string());
        match &error_detail {
            None => debug!(
                target: REQUEST_TARGET,
                trace_id = %meta.trace_id,
                method = %meta.method,
                url = %meta.url,
                status = ?meta.status,
                attempts = meta.attempts,
                latency_ms = meta.latency.as_secs_f64() * 1000.0,
                rate_limit_wait_ms = meta.rate_limit_wait.as_secs_f64() * 1000.0,
                backoff_ms = meta.total_backoff.as_secs_f64() * 1000.0,
                circuit_state = ?meta.circuit_state,
                robots = ?meta.robots,
                "Request completed"
            ),
            Some(detail) => warn!(
                target: REQUEST_TARGET,
                trace_id = %meta.trace_id,
                method = %meta.method,
                url = %meta.url,
                status = ?meta.status,
                attempts = meta.attempts,
                latency_ms = meta.latency.as_secs_f64() * 1000.0,
                rate_limit_wait_ms = meta.rate_limit_wait.as_secs_f64() * 1000.0,
                backoff_ms = meta.total_backoff.as_secs_f64() * 1000.0,
                circuit_state = ?meta.circuit_state,
                robots = ?meta.robots,
                error = ?meta.final_error,
                "Request failed: {}",
                detail
            ),
        }

        self.observers.call(&CallEvent {
            meta: meta.clone(),
            error: meta.error_kind,
            error_detail,
        });

        match result {
            Ok(value) => Ok(Fetched { value, meta }),
            Err(kind) => Err(FetchError { kind, meta }),
        }
    }

    async fn run<S: BodySink>(
        &self,
        spec: &RequestSpec,
        sink: &S,
        trace: &mut MetaBuilder,
    ) -> Result<(ResponseHead, S::Output), HttpError> {
        spec.validate()?;
        let url = build_url(&spec.url, &spec.query)?;
        trace.meta_mut().url = url.to_string();

        let domain = DomainKey::from_url(&url)
            .ok_or_else(|| HttpError::InvalidRequest(format!("URL has no host: {}", url)))?;
        trace.meta_mut().domain = Some(domain.clone());

        let policy = self.policy(spec);
        trace.meta_mut().timeout = policy.timeouts.total;

        self.check_robots(&domain, &url, trace).await?;

        let mut permit = self
            .admit(&domain, policy.circuit_breaker, trace)
            .await?;
        let method = spec.method.clone();
        let headers = self.request_headers(spec);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if attempt > 1 {
                permit = self
                    .admit(&domain, policy.circuit_breaker, trace)
                    .await?;
            }

            let wait = self
                .rate_limiter
                .acquire(&domain, Some(policy.rate_limit))
                .await;
            trace.meta_mut().rate_limit_wait += wait;
            trace.meta_mut().attempts = attempt;

            let request = TransportRequest {
                method: method.clone(),
                url: url.clone(),
                headers: headers.clone(),
                body: spec.body.clone(),
                timeouts: policy.timeouts,
            };

            let in_flight = InFlight {
                breaker: self.circuit_breaker.clone(),
                observers: self.observers.clone(),
                domain: domain.clone(),
                permit,
                config: policy.circuit_breaker.clone(),
                armed: true,
            };
            let started = Instant::now();
            let exchange = match policy.timeouts.total {
                Some(total) => {
                    match tokio::time::timeout(total, self.exchange(request, sink, &policy)).await
                    {
                        Ok(exchange) => exchange,
                        Err(_) => Exchange::Failed {
                            error: TransportError::Timeout(format!(
                                "no complete response within {:?}",
                                total
                            )),
                            head: None,
                        },
                    }
                }
                None => self.exchange(request, sink, &policy).await,
            };
            let latency = started.elapsed();
            in_flight.settle();

            let (outcome, signal) = match &exchange {
                Exchange::Failed { error, .. } => (
                    classify_transport_error(error, &method, policy.retry),
                    transport_signal(error),
                ),
                other => match other.head() {
                    Some(head) => (
                        classify_status(head.status, &method, policy.retry),
                        status_signal(head.status, policy.circuit_breaker),
                    ),
                    None => (Outcome::Success, CircuitSignal::Success),
                },
            };

            let circuit_state = self
                .record(&domain, &permit, signal, policy.circuit_breaker)
                .await;
            trace.meta_mut().circuit_state = Some(circuit_state);

            {
                let meta = trace.meta_mut();
                if let Some(head) = exchange.head() {
                    meta.status = Some(head.status);
                    meta.reason = head.reason.clone();
                    meta.final_url = Some(head.url.clone());
                }
                if let Exchange::Completed { output, .. } = &exchange {
                    meta.response_size = Some(S::size(output));
                }
            }

            if !self.observers.is_empty() {
                let error_text = match &exchange {
                    Exchange::Failed { error, .. } => Some(error.to_string()),
                    Exchange::Rejected { error, .. } => Some(error.to_string()),
                    _ => None,
                };
                self.observers.attempt(&AttemptEvent {
                    trace_id: trace.meta().trace_id.clone(),
                    domain: domain.clone(),
                    method: method.to_string(),
                    url: url.to_string(),
                    attempt,
                    outcome,
                    status: exchange.head().map(|h| h.status),
                    circuit_state,
                    latency,
                    rate_limit_wait: wait,
                    error: error_text,
                });
            }

            let (last, detail) = match exchange {
                Exchange::Completed { head, output } => return Ok((head, output)),
                Exchange::Rejected { error, .. } => return Err(error),
                Exchange::Failed {
                    error: TransportError::Request(detail),
                    ..
                } => return Err(HttpError::InvalidRequest(detail)),
                Exchange::Failed { error, .. } if !outcome.is_retryable() => {
                    return Err(HttpError::Transport(error))
                }
                Exchange::Failed { error, .. } => (error.reason(), error.to_string()),
                Exchange::RetryableStatus { head } => (
                    FailureReason::Status(head.status),
                    match head.reason {
                        Some(reason) => format!("HTTP {} {}", head.status, reason),
                        None => format!("HTTP {}", head.status),
                    },
                ),
            };

            match decide(attempt, &outcome, policy.retry) {
                RetryDecision::Stop => {
                    return Err(HttpError::RetryExhausted {
                        attempts: attempt,
                        last,
                        detail,
                    })
                }
                RetryDecision::RetryAfter(delay) => {
                    debug!(
                        "Attempt {} for {} failed ({}), retrying in {:?}",
                        attempt, url, detail, delay
                    );
                    tokio::time::sleep(delay).await;
                    trace.meta_mut().total_backoff += delay;
                }
            }
        }
    }

    /// One request/response exchange, including reading the body.
    async fn exchange<S: BodySink>(
        &self,
        request: TransportRequest,
        sink: &S,
        policy: &CallPolicy<'_>,
    ) -> Exchange<S::Output> {
        let method = request.method.clone();
        let TransportResponse {
            status,
            reason,
            url,
            headers,
            body,
        } = match self.transport.execute(request).await {
            Ok(response) => response,
            Err(error) => return Exchange::Failed { error, head: None },
        };
        let head = ResponseHead {
            status,
            reason,
            url,
            headers,
        };

        if classify_status(status, &method, policy.retry).is_retryable() {
            return Exchange::RetryableStatus { head };
        }

        if sink.enforces_limits() {
            if let Err(violation) = policy.limits.check_headers(&head.headers) {
                return Exchange::Rejected {
                    error: violation.into(),
                    head,
                };
            }
        }

        match sink.consume(body, &policy.limits).await {
            Ok(output) => Exchange::Completed { head, output },
            Err(BodyError::Transport(error)) => Exchange::Failed {
                error,
                head: Some(head),
            },
            Err(BodyError::Limit(violation)) => Exchange::Rejected {
                error: violation.into(),
                head,
            },
            Err(BodyError::Io(error)) => Exchange::Rejected {
                error: error.into(),
                head,
            },
        }
    }

    fn policy<'a>(&'a self, spec: &'a RequestSpec) -> CallPolicy<'a> {
        let overrides = &spec.overrides;
        CallPolicy {
            retry: overrides.retry.as_ref().unwrap_or(&self.config.retry),
            rate_limit: overrides
                .rate_limit
                .as_ref()
                .unwrap_or(&self.config.rate_limit),
            circuit_breaker: overrides
                .circuit_breaker
                .as_ref()
                .unwrap_or(&self.config.circuit_breaker),
            timeouts: self.config.timeouts.resolve(&spec.timeouts()),
            limits: BodyLimits {
                max_size: spec.max_download_size.or(self.config.max_download_size),
                allowed_content_types: spec
                    .allowed_content_types
                    .clone()
                    .unwrap_or_else(|| self.config.allowed_content_types.clone()),
            },
        }
    }

    /// Default headers, then the User-Agent, then the request's own headers.
    fn request_headers(&self, spec: &RequestSpec) -> HashMap<String, String> {
        let mut headers: HashMap<String, String> = self
            .config
            .default_headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
            .collect();
        headers.insert("user-agent".to_string(), self.user_agent.clone());
        headers.extend(
            spec.headers
                .iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value.clone())),
        );
        headers
    }

    async fn check_robots(
        &self,
        domain: &DomainKey,
        url: &Url,
        trace: &mut MetaBuilder,
    ) -> Result<(), HttpError> {
        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        let verdict = self.robots.check(domain, &path, &self.user_agent).await;

        if matches!(verdict.decision, RobotsDecision::Allow | RobotsDecision::Deny) {
            self.rate_limiter
                .set_crawl_delay(domain, verdict.crawl_delay)
                .await;
        }

        let permitted = verdict.decision.permits(self.config.robots.on_unknown);
        trace.meta_mut().robots = verdict.decision;
        if permitted {
            return Ok(());
        }

        match self.config.robots.enforcement {
            RobotsEnforcement::Enforce => Err(HttpError::RobotsBlocked {
                domain: domain.clone(),
                path,
            }),
            RobotsEnforcement::DevOverride => {
                warn!(
                    "robots.txt disallows {} on {}; fetching anyway (development override)",
                    path, domain
                );
                trace.meta_mut().robots_bypassed = true;
                Ok(())
            }
        }
    }

    async fn admit(
        &self,
        domain: &DomainKey,
        config: &CircuitBreakerConfig,
        trace: &mut MetaBuilder,
    ) -> Result<CircuitPermit, HttpError> {
        let decision = self.circuit_breaker.allow(domain, Some(config)).await;
        if let Some(transition) = &decision.transition {
            self.observers.transition(transition);
        }
        trace.meta_mut().circuit_state = Some(decision.state);

        match decision.permit {
            Some(permit) => Ok(permit),
            None => {
                debug!(
                    "Circuit for {} is {}, rejecting request (retry in {:?})",
                    domain, decision.state, decision.retry_in
                );
                Err(HttpError::CircuitOpen {
                    domain: domain.clone(),
                })
            }
        }
    }

    /// Record an attempt with the breaker and return the resulting state.
    async fn record(
        &self,
        domain: &DomainKey,
        permit: &CircuitPermit,
        signal: CircuitSignal,
        config: &CircuitBreakerConfig,
    ) -> CircuitState {
        if let Some(transition) = self
            .circuit_breaker
            .record(domain, permit, signal, Some(config))
            .await
        {
            self.observers.transition(&transition);
            return transition.to;
        }
        if config.enabled {
            self.circuit_breaker.state(domain).await
        } else {
            CircuitState::Closed
        }
    }
}

/// Parse the URL and append query parameters. Only http and https are
/// accepted.
fn build_url(raw: &str, query: &[(String, String)]) -> Result<Url, HttpError> {
    let mut url = Url::parse(raw)
        .map_err(|e| HttpError::InvalidRequest(format!("invalid URL {:?}: {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(HttpError::InvalidRequest(format!(
            "unsupported URL scheme {:?}",
            url.scheme()
        )));
    }
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}
