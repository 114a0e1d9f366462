//! Observer hooks.
//!
//! Observers see every attempt, every finished call and every circuit
//! transition. They run inline, so they should be cheap; a panicking
//! observer is logged and otherwise ignored.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::error;

use crate::circuit_breaker::{CircuitState, CircuitTransition};
use crate::domain::DomainKey;
use crate::error::ErrorKind;
use crate::meta::{duration_ms, Meta};
use crate::outcome::Outcome;

/// One attempt of a call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptEvent {
    pub trace_id: String,
    pub domain: DomainKey,
    pub method: String,
    pub url: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub outcome: Outcome,
    pub status: Option<u16>,
    pub circuit_state: CircuitState,
    #[serde(rename = "latency_ms", with = "duration_ms")]
    pub latency: Duration,
    #[serde(rename = "rate_limit_wait_ms", with = "duration_ms")]
    pub rate_limit_wait: Duration,
    /// Transport or limit error text, if the attempt failed without a status.
    pub error: Option<String>,
}

/// A finished call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallEvent {
    pub meta: Meta,
    pub error: Option<ErrorKind>,
    pub error_detail: Option<String>,
}

impl CallEvent {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Receives pipeline events. All methods default to no-ops.
pub trait RequestObserver: Send + Sync {
    fn on_attempt(&self, _event: &AttemptEvent) {}

    fn on_call(&self, _event: &CallEvent) {}

    fn on_circuit_transition(&self, _transition: &CircuitTransition) {}
}

/// Registered observers.
#[derive(Clone, Default)]
pub(crate) struct Observers {
    observers: Arc<Vec<Arc<dyn RequestObserver>>>,
}

impl Observers {
    pub(crate) fn new(observers: Vec<Arc<dyn RequestObserver>>) -> Self {
        Self {
            observers: Arc::new(observers),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    fn each(&self, hook: &str, f: impl Fn(&dyn RequestObserver)) {
        for observer in self.observers.iter() {
            let result = catch_unwind(AssertUnwindSafe(|| f(observer.as_ref())));
            if result.is_err() {
                error!("Request observer panicked in {}", hook);
            }
        }
    }

    pub(crate) fn attempt(&self, event: &AttemptEvent) {
        self.each("on_attempt", |o| o.on_attempt(event));
    }

    pub(crate) fn call(&self, event: &CallEvent) {
        self.each("on_call", |o| o.on_call(event));
    }

    pub(crate) fn transition(&self, transition: &CircuitTransition) {
        self.each("on_circuit_transition", |o| {
            o.on_circuit_transition(transition)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;

    struct Panicky;

    impl RequestObserver for Panicky {
        fn on_circuit_transition(&self, _transition: &CircuitTransition) {
            panic!("observer bug");
        }
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl RequestObserver for Counting {
        fn on_circuit_transition(&self, _transition: &CircuitTransition) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_panicking_observer_does_not_stop_others() {
        let counting = Arc::new(Counting::default());
        let observers = Observers::new(vec![Arc::new(Panicky), counting.clone()]);
        assert!(!observers.is_empty());

        observers.transition(&CircuitTransition {
            domain: DomainKey::parse("https://example.com").unwrap(),
            from: CircuitState::Closed,
            to: CircuitState::Open,
            at: Utc::now(),
        });
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }
}
