//! Resilient call: retries nested inside a circuit breaker.
//!
//! ```text
//! resilient_call(name, op)
//!     → circuit_breaker (admit? else fallback / CircuitOpen)
//!         → retries (up to max_retries + 1 attempts of op)
//!     ← one aggregate success or failure recorded on the circuit
//! ```

use std::fmt;
use std::future::Future;

use crate::resilience::circuit_breaker::{CircuitRegistry, CircuitState, Fallback};
use crate::resilience::error::{CallError, ResilienceError};
use crate::resilience::retries::{with_retry, RetryOptions};

/// Retry settings plus an optional open-circuit fallback.
pub struct CallOptions<T, E> {
    pub retry: RetryOptions<E>,
    pub fallback: Option<Fallback<T>>,
}

impl<T, E: CallError + 'static> CallOptions<T, E> {
    pub fn new() -> Self {
        Self::with_retry(RetryOptions::new())
    }
}

impl<T, E: CallError + 'static> Default for CallOptions<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> CallOptions<T, E> {
    pub fn with_retry(retry: RetryOptions<E>) -> Self {
        Self {
            retry,
            fallback: None,
        }
    }

    pub fn fallback<F>(mut self, f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        self.fallback = Some(Fallback::new(f));
        self
    }
}

impl<T, E> fmt::Debug for CallOptions<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("retry", &self.retry)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl CircuitRegistry {
    /// Run `operation` with retries, guarded by the circuit called `name`.
    ///
    /// An exhausted retry loop counts as a single failure on the circuit.
    pub async fn resilient_call<T, E, F, Fut>(
        &self,
        name: &str,
        operation: F,
        options: CallOptions<T, E>,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let CallOptions { retry, fallback } = options;
        self.with_circuit_breaker(name, || with_retry(operation, &retry), fallback)
            .await
    }
}

/// [`CircuitRegistry::with_circuit_breaker`] on the process-wide registry.
pub async fn with_circuit_breaker<T, E, F, Fut>(
    name: &str,
    operation: F,
    fallback: Option<Fallback<T>>,
) -> Result<T, ResilienceError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    CircuitRegistry::global()
        .with_circuit_breaker(name, operation, fallback)
        .await
}

/// [`CircuitRegistry::resilient_call`] on the process-wide registry.
pub async fn resilient_call<T, E, F, Fut>(
    name: &str,
    operation: F,
    options: CallOptions<T, E>,
) -> Result<T, ResilienceError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    CircuitRegistry::global()
        .resilient_call(name, operation, options)
        .await
}

/// [`CircuitRegistry::get_circuit_state`] on the process-wide registry.
pub fn get_circuit_state(name: &str) -> CircuitState {
    CircuitRegistry::global().get_circuit_state(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitPhase;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn retryable() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused")
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_recover_within_one_call() {
        let registry = CircuitRegistry::new();
        let calls = AtomicU32::new(0);

        let value = registry
            .resilient_call(
                "svc",
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n <= 2 {
                            Err(retryable())
                        } else {
                            Ok("ok")
                        }
                    }
                },
                CallOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(value, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let state = registry.get_circuit_state("svc");
        assert_eq!(state.phase, CircuitPhase::Closed);
        assert_eq!(state.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_count_once_and_fallback_after_open() {
        let registry = CircuitRegistry::new();
        let calls = AtomicU32::new(0);
        let operation = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<&str, _>(retryable()) }
        };

        for logical in 1..=5u32 {
            let options = CallOptions::with_retry(RetryOptions::new().with_max_retries(1))
                .fallback(|| "fallback");
            let result = registry.resilient_call("svc", operation, options).await;

            assert!(matches!(result, Err(ResilienceError::Operation(_))));
            assert_eq!(calls.load(Ordering::SeqCst), logical * 2);
            assert_eq!(registry.get_circuit_state("svc").consecutive_failures, logical);
        }
        assert_eq!(registry.get_circuit_state("svc").phase, CircuitPhase::Open);

        let options = CallOptions::with_retry(RetryOptions::new().with_max_retries(1))
            .fallback(|| "fallback");
        let value = registry.resilient_call("svc", operation, options).await.unwrap();
        assert_eq!(value, "fallback");
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_skips_retry_loop() {
        let registry = CircuitRegistry::new();
        let calls = AtomicU32::new(0);
        let operation = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(retryable()) }
        };

        for _ in 0..5 {
            let options = CallOptions::with_retry(RetryOptions::new().with_max_retries(0));
            let _ = registry.resilient_call("svc", operation, options).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        let started = tokio::time::Instant::now();
        let err = registry
            .resilient_call("svc", operation, CallOptions::new())
            .await
            .unwrap_err();

        assert!(err.is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(started.elapsed(), std::time::Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_is_not_retried_but_counts() {
        let registry = CircuitRegistry::new();
        let calls = AtomicU32::new(0);

        let err = registry
            .resilient_call(
                "svc",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(io::Error::new(io::ErrorKind::InvalidInput, "bad request")) }
                },
                CallOptions::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.into_operation().unwrap().kind(), io::ErrorKind::InvalidInput);
        assert_eq!(registry.get_circuit_state("svc").consecutive_failures, 1);
    }

    #[test]
    fn test_global_accessor_registers_unseen_name() {
        let name = "call-tests-unused";
        let state = get_circuit_state(name);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.phase, CircuitPhase::Closed);
        assert!(CircuitRegistry::global()
            .circuits()
            .iter()
            .any(|c| c.name == name));
    }

    #[tokio::test]
    async fn test_global_free_functions() {
        let value = resilient_call(
            "call-tests-global",
            || async { Ok::<_, io::Error>(7) },
            CallOptions::new(),
        )
        .await
        .unwrap();
        assert_eq!(value, 7);

        let value = with_circuit_breaker(
            "call-tests-global",
            || async { Ok::<_, io::Error>(8) },
            None,
        )
        .await
        .unwrap();
        assert_eq!(value, 8);
        assert_eq!(get_circuit_state("call-tests-global").phase, CircuitPhase::Closed);
    }
}
