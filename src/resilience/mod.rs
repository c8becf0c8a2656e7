//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call site:
//!     → call.rs (resilient_call: breaker around retrier)
//!     → circuit_breaker.rs (admit, or fail fast / serve fallback)
//!     → retries.rs (run operation, retry retryable failures)
//!     → backoff.rs (exponential delay + jitter between attempts)
//! ```
//!
//! # Design Decisions
//! - The layer imposes no timeouts; operations bring their own
//! - Errors are never swallowed: a fallback is opt-in per call
//! - Circuit state is shared per name across every caller of a registry

pub mod backoff;
pub mod call;
pub mod circuit_breaker;
pub mod error;
pub mod retries;

pub use call::{get_circuit_state, resilient_call, with_circuit_breaker, CallOptions};
pub use circuit_breaker::{CircuitPhase, CircuitRegistry, CircuitState, Fallback};
pub use error::{CallError, ResilienceError};
pub use retries::{is_retryable, with_retry, Connectivity, RetryOptions};
