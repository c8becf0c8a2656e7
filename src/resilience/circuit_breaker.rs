//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast or are served a fallback
//! - Half-Open: a single probe call tests whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: first call after reset_timeout elapsed since the last failure
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails (timestamp refreshed)
//! any success → Closed, counter reset
//! ```
//!
//! # Design Decisions
//! - One circuit per name, created lazily in a [`CircuitRegistry`]
//! - Registries are explicit values; [`CircuitRegistry::global`] backs the free functions
//! - Single probe in Half-Open; concurrent callers are treated as Open
//! - State is mutated under the map's shard lock, never across an `.await`

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::resilience::error::ResilienceError;

/// Consecutive failures that open a circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Cooldown before an open circuit lets a probe through.
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Phase of a circuit's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitPhase::Closed => "closed",
            CircuitPhase::Open => "open",
            CircuitPhase::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure history of one named circuit.
#[derive(Debug, Clone)]
pub struct CircuitState {
    /// Name of the protected resource.
    pub name: String,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Time of the most recent failure.
    pub last_failure: Option<Instant>,
    /// Current phase.
    pub phase: CircuitPhase,
    probe_in_flight: bool,
}

impl CircuitState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            consecutive_failures: 0,
            last_failure: None,
            phase: CircuitPhase::Closed,
            probe_in_flight: false,
        }
    }

    /// Whether a half-open probe is currently running.
    pub fn probe_in_flight(&self) -> bool {
        self.probe_in_flight
    }
}

/// Value served instead of calling the operation while its circuit is open.
pub struct Fallback<T>(Box<dyn FnOnce() -> T + Send>);

impl<T> Fallback<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self(Box::new(f))
    }

    pub fn call(self) -> T {
        (self.0)()
    }
}

impl<T> fmt::Debug for Fallback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Fallback(<fn>)")
    }
}

enum Admission {
    Pass,
    Probe,
    Rejected,
}

struct RegistryInner {
    circuits: DashMap<String, CircuitState>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

/// Named circuits sharing one set of thresholds.
///
/// Cloning is cheap; clones share the same circuits.
#[derive(Clone)]
pub struct CircuitRegistry {
    inner: Arc<RegistryInner>,
}

static GLOBAL: OnceLock<CircuitRegistry> = OnceLock::new();

impl CircuitRegistry {
    /// Registry with the default threshold (5) and reset timeout (30s).
    pub fn new() -> Self {
        Self::with_config(&CircuitBreakerConfig::default())
    }

    pub fn with_config(config: &CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                circuits: DashMap::new(),
                failure_threshold: config.failure_threshold,
                reset_timeout: Duration::from_millis(config.reset_timeout_ms),
            }),
        }
    }

    /// Process-wide registry, created with defaults on first use.
    pub fn global() -> &'static CircuitRegistry {
        GLOBAL.get_or_init(CircuitRegistry::new)
    }

    pub fn failure_threshold(&self) -> u32 {
        self.inner.failure_threshold
    }

    pub fn reset_timeout(&self) -> Duration {
        self.inner.reset_timeout
    }

    /// Snapshot of a circuit, registering it as Closed if unseen.
    pub fn get_circuit_state(&self, name: &str) -> CircuitState {
        self.update(name, |circuit| circuit.clone())
    }

    /// Snapshots of every registered circuit, sorted by name.
    pub fn circuits(&self) -> Vec<CircuitState> {
        let mut all: Vec<CircuitState> = self
            .inner
            .circuits
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Run `operation` through the circuit called `name`.
    ///
    /// While the circuit is open the operation is not invoked: the fallback
    /// is returned if given, otherwise [`ResilienceError::CircuitOpen`].
    pub async fn with_circuit_breaker<T, E, F, Fut>(
        &self,
        name: &str,
        operation: F,
        fallback: Option<Fallback<T>>,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _probe = match self.admit(name) {
            Admission::Pass => None,
            Admission::Probe => Some(ProbeSlot { registry: self, name }),
            Admission::Rejected => {
                metrics::record_circuit_rejection(name);
                return match fallback {
                    Some(fallback) => {
                        tracing::debug!(circuit = %name, "Circuit open, serving fallback");
                        Ok(fallback.call())
                    }
                    None => Err(ResilienceError::CircuitOpen {
                        circuit: name.to_owned(),
                    }),
                };
            }
        };

        match operation().await {
            Ok(value) => {
                self.record_success(name);
                metrics::record_call(name, "success");
                Ok(value)
            }
            Err(error) => {
                self.record_failure(name);
                metrics::record_call(name, "failure");
                Err(ResilienceError::Operation(error))
            }
        }
    }

    fn update<R>(&self, name: &str, f: impl FnOnce(&mut CircuitState) -> R) -> R {
        let mut circuit = self
            .inner
            .circuits
            .entry(name.to_owned())
            .or_insert_with(|| CircuitState::new(name));
        f(&mut circuit)
    }

    fn admit(&self, name: &str) -> Admission {
        let reset_timeout = self.inner.reset_timeout;
        let admission = self.update(name, |circuit| match circuit.phase {
            CircuitPhase::Closed => Admission::Pass,
            CircuitPhase::Open => {
                let cooled_down = circuit
                    .last_failure
                    .map_or(true, |at| at.elapsed() > reset_timeout);
                if cooled_down {
                    circuit.phase = CircuitPhase::HalfOpen;
                    circuit.probe_in_flight = true;
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
            CircuitPhase::HalfOpen if circuit.probe_in_flight => Admission::Rejected,
            CircuitPhase::HalfOpen => {
                circuit.probe_in_flight = true;
                Admission::Probe
            }
        });

        if let Admission::Probe = admission {
            tracing::debug!(circuit = %name, "Circuit half-open, probing");
            metrics::record_circuit_state(name, CircuitPhase::HalfOpen);
        }
        admission
    }

    fn record_success(&self, name: &str) {
        let previous = self.update(name, |circuit| {
            let previous = circuit.phase;
            circuit.consecutive_failures = 0;
            circuit.phase = CircuitPhase::Closed;
            previous
        });

        if previous != CircuitPhase::Closed {
            tracing::debug!(circuit = %name, from = %previous, "Circuit closed");
            metrics::record_circuit_state(name, CircuitPhase::Closed);
        }
    }

    fn record_failure(&self, name: &str) {
        let threshold = self.inner.failure_threshold;
        let (previous, current, failures) = self.update(name, |circuit| {
            let previous = circuit.phase;
            circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);
            circuit.last_failure = Some(Instant::now());
            if circuit.consecutive_failures >= threshold || previous == CircuitPhase::HalfOpen {
                circuit.phase = CircuitPhase::Open;
            }
            (previous, circuit.phase, circuit.consecutive_failures)
        });

        if current == CircuitPhase::Open && previous != CircuitPhase::Open {
            tracing::debug!(circuit = %name, failures, from = %previous, "Circuit opened");
            metrics::record_circuit_state(name, CircuitPhase::Open);
        } else {
            tracing::debug!(circuit = %name, failures, "Circuit recorded failure");
        }
    }
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CircuitRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitRegistry")
            .field("circuits", &self.inner.circuits.len())
            .field("failure_threshold", &self.inner.failure_threshold)
            .field("reset_timeout", &self.inner.reset_timeout)
            .finish()
    }
}

/// Holds the half-open probe slot; released on drop, including when the
/// probing future is cancelled mid-flight.
struct ProbeSlot<'a> {
    registry: &'a CircuitRegistry,
    name: &'a str,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        self.registry.update(self.name, |circuit| circuit.probe_in_flight = false);
    }
}
