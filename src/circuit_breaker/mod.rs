//! Per-domain circuit breaker.
//!
//! Tracks a sliding window of recent outcomes for each domain and stops
//! sending requests to a domain whose failure ratio crosses the threshold.
//! After a cooldown, a limited number of probes decide whether the domain
//! has recovered.

mod config;
mod domain_circuit;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

pub use config::CircuitBreakerConfig;
pub use domain_circuit::{CircuitPermit, CircuitState};
use domain_circuit::DomainCircuit;

use crate::domain::DomainKey;
use crate::outcome::CircuitSignal;
use crate::registry::DomainRegistry;

/// A state change of one domain's circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitTransition {
    pub domain: DomainKey,
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
}

/// Answer to an admission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitDecision {
    /// Present when the attempt may proceed.
    pub permit: Option<CircuitPermit>,
    /// State after the admission check.
    pub state: CircuitState,
    /// Transition caused by the check (OPEN to HALF-OPEN).
    pub transition: Option<CircuitTransition>,
    /// Remaining cooldown when rejected while OPEN.
    pub retry_in: Option<Duration>,
}

impl CircuitDecision {
    pub fn is_allowed(&self) -> bool {
        self.permit.is_some()
    }
}

/// Snapshot of a domain circuit for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub opened_at: Option<Instant>,
    pub window_failures: usize,
    pub window_total: usize,
}

/// Circuit breaker shared across requests.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: DomainRegistry<DomainCircuit>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given defaults.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: DomainRegistry::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask whether an attempt to `domain` may be sent.
    pub async fn allow(
        &self,
        domain: &DomainKey,
        config: Option<&CircuitBreakerConfig>,
    ) -> CircuitDecision {
        let config = config.unwrap_or(&self.config);
        if !config.enabled {
            return CircuitDecision {
                permit: Some(CircuitPermit::bypass()),
                state: CircuitState::Closed,
                transition: None,
                retry_in: None,
            };
        }

        let entry = self
            .circuits
            .entry_or_insert_with(domain, DomainCircuit::new)
            .await;
        let (admission, transition) = entry.lock().await.admit(config, Instant::now());

        CircuitDecision {
            permit: admission.permit,
            state: admission.state,
            transition: transition.map(|(from, to)| self.transitioned(domain, from, to)),
            retry_in: admission.retry_in,
        }
    }

    /// Record the outcome of an attempt admitted by `permit`.
    pub async fn record(
        &self,
        domain: &DomainKey,
        permit: &CircuitPermit,
        signal: CircuitSignal,
        config: Option<&CircuitBreakerConfig>,
    ) -> Option<CircuitTransition> {
        let config = config.unwrap_or(&self.config);
        if !config.enabled || permit.is_bypass() {
            return None;
        }

        let entry = self.circuits.get(domain).await?;
        let transition = entry
            .lock()
            .await
            .record(permit, signal, config, Instant::now());
        transition.map(|(from, to)| self.transitioned(domain, from, to))
    }

    /// Current state of a domain's circuit. Unknown domains are CLOSED.
    pub async fn state(&self, domain: &DomainKey) -> CircuitState {
        match self.circuits.get(domain).await {
            Some(entry) => entry.lock().await.state(),
            None => CircuitState::Closed,
        }
    }

    /// Diagnostic snapshot of a domain's circuit.
    pub async fn snapshot(&self, domain: &DomainKey) -> Option<CircuitSnapshot> {
        let entry = self.circuits.get(domain).await?;
        let circuit = entry.lock().await;
        let (window_failures, window_total) = circuit.window_counts();
        Some(CircuitSnapshot {
            state: circuit.state(),
            opened_at: circuit.opened_at(),
            window_failures,
            window_total,
        })
    }

    fn transitioned(
        &self,
        domain: &DomainKey,
        from: CircuitState,
        to: CircuitState,
    ) -> CircuitTransition {
        match to {
            CircuitState::Open => warn!("Circuit for {} {} -> {}", domain, from, to),
            _ => info!("Circuit for {} {} -> {}", domain, from, to),
        }
        CircuitTransition {
            domain: domain.clone(),
            from,
            to,
            at: Utc::now(),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
