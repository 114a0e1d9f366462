//! State machine for a single domain's circuit.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::config::CircuitBreakerConfig;
use crate::outcome::CircuitSignal;

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half-open"),
        }
    }
}

/// Proof that an attempt was admitted.
///
/// Outcomes are only counted against the state generation that admitted
/// them; results that arrive after a transition are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitPermit {
    generation: u64,
    probe: bool,
}

impl CircuitPermit {
    /// Permit issued while the breaker is disabled; never recorded.
    pub(crate) fn bypass() -> Self {
        Self {
            generation: u64::MAX,
            probe: false,
        }
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub(crate) fn is_bypass(&self) -> bool {
        self.generation == u64::MAX
    }
}

/// Result of asking a circuit for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub permit: Option<CircuitPermit>,
    pub state: CircuitState,
    /// Time until the circuit will consider probes, when rejected while OPEN.
    pub retry_in: Option<Duration>,
}

/// Per-domain circuit.
#[derive(Debug)]
pub struct DomainCircuit {
    state: CircuitState,
    generation: u64,
    /// Recent outcomes, `true` meaning failure. Only used while CLOSED.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    probes_in_flight: u32,
    probe_successes: u32,
    last_probe_at: Option<Instant>,
}

impl Default for DomainCircuit {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainCircuit {
    pub fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            generation: 0,
            window: VecDeque::new(),
            opened_at: None,
            probes_in_flight: 0,
            probe_successes: 0,
            last_probe_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// `(failures, total)` in the current window.
    pub fn window_counts(&self) -> (usize, usize) {
        let failures = self.window.iter().filter(|failed| **failed).count();
        (failures, self.window.len())
    }

    fn transition(&mut self, to: CircuitState, now: Instant) -> (CircuitState, CircuitState) {
        let from = self.state;
        self.state = to;
        self.generation += 1;
        self.probes_in_flight = 0;
        self.probe_successes = 0;
        self.last_probe_at = None;

        match to {
            CircuitState::Open => {
                self.opened_at = Some(now);
                self.window.clear();
            }
            CircuitState::Closed => {
                self.opened_at = None;
                self.window.clear();
            }
            CircuitState::HalfOpen => {}
        }
        (from, to)
    }

    /// Ask to send one attempt.
    ///
    /// Moves OPEN to HALF-OPEN once the cooldown has elapsed; the returned
    /// transition, if any, must be reported by the caller.
    pub fn admit(
        &mut self,
        config: &CircuitBreakerConfig,
        now: Instant,
    ) -> (Admission, Option<(CircuitState, CircuitState)>) {
        let mut transition = None;

        if self.state == CircuitState::Open {
            let elapsed = self
                .opened_at
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or(Duration::MAX);
            let cooldown = config.cooldown();
            if elapsed < cooldown {
                let admission = Admission {
                    permit: None,
                    state: CircuitState::Open,
                    retry_in: Some(cooldown - elapsed),
                };
                return (admission, None);
            }
            transition = Some(self.transition(CircuitState::HalfOpen, now));
        }

        // A probe whose outcome never arrived (cancelled caller) must not
        // wedge the circuit in HALF-OPEN
        if self.state == CircuitState::HalfOpen && self.probes_in_flight >= config.probe_limit {
            let stale = self
                .last_probe_at
                .is_some_and(|at| now.saturating_duration_since(at) >= config.cooldown());
            if stale {
                self.probes_in_flight = 0;
            }
        }

        let admission = match self.state {
            CircuitState::Closed => Admission {
                permit: Some(CircuitPermit {
                    generation: self.generation,
                    probe: false,
                }),
                state: CircuitState::Closed,
                retry_in: None,
            },
            CircuitState::HalfOpen if self.probes_in_flight < config.probe_limit => {
                self.probes_in_flight += 1;
                self.last_probe_at = Some(now);
                Admission {
                    permit: Some(CircuitPermit {
                        generation: self.generation,
                        probe: true,
                    }),
                    state: CircuitState::HalfOpen,
                    retry_in: None,
                }
            }
            state => Admission {
                permit: None,
                state,
                retry_in: None,
            },
        };
        (admission, transition)
    }

    /// Record the outcome of an admitted attempt.
    pub fn record(
        &mut self,
        permit: &CircuitPermit,
        signal: CircuitSignal,
        config: &CircuitBreakerConfig,
        now: Instant,
    ) -> Option<(CircuitState, CircuitState)> {
        if permit.generation != self.generation {
            return None;
        }

        match self.state {
            CircuitState::Closed => {
                let failed = match signal {
                    CircuitSignal::Success => false,
                    CircuitSignal::Failure => true,
                    CircuitSignal::Ignored => return None,
                };
                self.window.push_back(failed);
                while self.window.len() > config.window_size {
                    self.window.pop_front();
                }

                let (failures, total) = self.window_counts();
                let ratio = failures as f64 / total as f64;
                if total >= config.minimum_volume && ratio >= config.failure_ratio {
                    return Some(self.transition(CircuitState::Open, now));
                }
                None
            }
            CircuitState::HalfOpen => match signal {
                CircuitSignal::Failure => Some(self.transition(CircuitState::Open, now)),
                CircuitSignal::Success => {
                    self.probe_successes += 1;
                    if self.probe_successes >= config.probe_limit {
                        Some(self.transition(CircuitState::Closed, now))
                    } else {
                        None
                    }
                }
                CircuitSignal::Ignored => {
                    // Inconclusive probe; free its slot
                    self.probes_in_flight = self.probes_in_flight.saturating_sub(1);
                    None
                }
            },
            CircuitState::Open => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            window_size: 10,
            minimum_volume: 4,
            failure_ratio: 0.5,
            cooldown_secs: 10.0,
            probe_limit: 1,
            ..Default::default()
        }
    }

    fn admit(circuit: &mut DomainCircuit, now: Instant) -> CircuitPermit {
        circuit.admit(&config(), now).0.permit.expect("admitted")
    }

    #[test]
    fn test_opens_at_minimum_volume() {
        let config = config();
        let now = Instant::now();
        let mut circuit = DomainCircuit::new();

        for _ in 0..3 {
            let permit = admit(&mut circuit, now);
            assert_eq!(
                circuit.record(&permit, CircuitSignal::Failure, &config, now),
                None
            );
        }
        let permit = admit(&mut circuit, now);
        assert_eq!(
            circuit.record(&permit, CircuitSignal::Failure, &config, now),
            Some((CircuitState::Closed, CircuitState::Open))
        );
        assert_eq!(circuit.opened_at(), Some(now));
    }

    #[test]
    fn test_ratio_below_threshold_stays_closed() {
        let config = config();
        let now = Instant::now();
        let mut circuit = DomainCircuit::new();

        for i in 0..10 {
            let permit = admit(&mut circuit, now);
            let signal = if i % 3 == 1 {
                CircuitSignal::Failure
            } else {
                CircuitSignal::Success
            };
            assert_eq!(circuit.record(&permit, signal, &config, now), None);
        }
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[test]
    fn test_ignored_signals_do_not_count() {
        let config = config();
        let now = Instant::now();
        let mut circuit = DomainCircuit::new();

        for _ in 0..10 {
            let permit = admit(&mut circuit, now);
            circuit.record(&permit, CircuitSignal::Ignored, &config, now);
        }
        assert_eq!(circuit.window_counts(), (0, 0));
    }

    #[test]
    fn test_open_rejects_until_cooldown() {
        let config = config();
        let start = Instant::now();
        let mut circuit = DomainCircuit::new();
        for _ in 0..4 {
            let permit = admit(&mut circuit, start);
            circuit.record(&permit, CircuitSignal::Failure, &config, start);
        }

        let (admission, transition) = circuit.admit(&config, start + Duration::from_secs(4));
        assert!(admission.permit.is_none());
        assert_eq!(admission.state, CircuitState::Open);
        assert_eq!(admission.retry_in, Some(Duration::from_secs(6)));
        assert!(transition.is_none());

        let (admission, transition) = circuit.admit(&config, start + Duration::from_secs(10));
        assert!(admission.permit.unwrap().is_probe());
        assert_eq!(
            transition,
            Some((CircuitState::Open, CircuitState::HalfOpen))
        );
    }

    #[test]
    fn test_half_open_limits_probes() {
        let config = config();
        let start = Instant::now();
        let mut circuit = DomainCircuit::new();
        for _ in 0..4 {
            let permit = admit(&mut circuit, start);
            circuit.record(&permit, CircuitSignal::Failure, &config, start);
        }

        let later = start + Duration::from_secs(11);
        let (first, _) = circuit.admit(&config, later);
        let (second, _) = circuit.admit(&config, later);
        assert!(first.permit.is_some());
        assert!(second.permit.is_none());
        assert_eq!(second.state, CircuitState::HalfOpen);
    }

    #[test]
    fn test_probe_success_closes() {
        let config = config();
        let start = Instant::now();
        let mut circuit = DomainCircuit::new();
        for _ in 0..4 {
            let permit = admit(&mut circuit, start);
            circuit.record(&permit, CircuitSignal::Failure, &config, start);
        }

        let later = start + Duration::from_secs(11);
        let probe = admit(&mut circuit, later);
        assert_eq!(
            circuit.record(&probe, CircuitSignal::Success, &config, later),
            Some((CircuitState::HalfOpen, CircuitState::Closed))
        );
        assert_eq!(circuit.window_counts(), (0, 0));
        assert_eq!(circuit.opened_at(), None);
    }

    #[test]
    fn test_probe_failure_reopens_with_fresh_timestamp() {
        let config = config();
        let start = Instant::now();
        let mut circuit = DomainCircuit::new();
        for _ in 0..4 {
            let permit = admit(&mut circuit, start);
            circuit.record(&permit, CircuitSignal::Failure, &config, start);
        }

        let later = start + Duration::from_secs(11);
        let probe = admit(&mut circuit, later);
        assert_eq!(
            circuit.record(&probe, CircuitSignal::Failure, &config, later),
            Some((CircuitState::HalfOpen, CircuitState::Open))
        );
        assert_eq!(circuit.opened_at(), Some(later));
    }

    #[test]
    fn test_stale_outcomes_are_dropped() {
        let config = config();
        let start = Instant::now();
        let mut circuit = DomainCircuit::new();

        // Admitted while closed, but finishes after the circuit opened
        let straggler = admit(&mut circuit, start);
        for _ in 0..4 {
            let permit = admit(&mut circuit, start);
            circuit.record(&permit, CircuitSignal::Failure, &config, start);
        }
        assert_eq!(circuit.state(), CircuitState::Open);

        let later = start + Duration::from_secs(11);
        let _probe = admit(&mut circuit, later);
        assert_eq!(
            circuit.record(&straggler, CircuitSignal::Success, &config, later),
            None
        );
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_abandoned_probe_is_released_after_cooldown() {
        let config = config();
        let start = Instant::now();
        let mut circuit = DomainCircuit::new();
        for _ in 0..4 {
            let permit = admit(&mut circuit, start);
            circuit.record(&permit, CircuitSignal::Failure, &config, start);
        }

        let probing = start + Duration::from_secs(11);
        let _lost = admit(&mut circuit, probing);
        assert!(circuit.admit(&config, probing).0.permit.is_none());

        let much_later = probing + Duration::from_secs(10);
        assert!(circuit.admit(&config, much_later).0.permit.is_some());
    }
}
