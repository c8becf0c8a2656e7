//! Resilient call layer: retries with exponential backoff nested inside
//! per-name circuit breakers, plus the config, observability and HTTP
//! probing pieces used by the `resilient-probe` binary.

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::ResilienceConfig;
pub use resilience::{
    get_circuit_state, resilient_call, with_circuit_breaker, with_retry, CallError, CallOptions,
    CircuitPhase, CircuitRegistry, CircuitState, Fallback, ResilienceError, RetryOptions,
};
