//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failure is retryable (caller predicate or default policy)
//! - Re-run the operation with exponential backoff + jitter
//! - Return the original error once attempts are exhausted
//!
//! # Design Decisions
//! - Attempts are strictly sequential; attempt N+1 starts after attempt N failed
//! - Offline callers never retry
//! - 5xx and network-level failures are retryable by default; everything else is terminal

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::error::CallError;

/// Decides whether a failed attempt should be retried.
pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Shared online/offline flag consulted by the default retry policy.
///
/// Clones observe the same flag, so one handle can be flipped by whatever
/// detects connectivity changes while call sites hold the others.
#[derive(Debug, Clone)]
pub struct Connectivity(Arc<AtomicBool>);

impl Connectivity {
    pub fn new(online: bool) -> Self {
        Self(Arc::new(AtomicBool::new(online)))
    }

    pub fn is_online(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set_online(&self, online: bool) {
        self.0.store(online, Ordering::Relaxed);
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Default retry policy.
///
/// Offline: never. Otherwise retry on HTTP status >= 500 or on a
/// network/fetch level failure.
pub fn is_retryable<E: CallError + ?Sized>(error: &E, connectivity: &Connectivity) -> bool {
    if !connectivity.is_online() {
        return false;
    }
    if error.status().is_some_and(|status| status >= 500) {
        return true;
    }
    error.is_network()
}

/// Per-call retry settings.
pub struct RetryOptions<E> {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// Seed for backoff growth.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    predicate: RetryPredicate<E>,
}

impl<E: CallError + 'static> RetryOptions<E> {
    /// Defaults with the default retry policy (always online).
    pub fn new() -> Self {
        Self::from_config(&RetryConfig::default())
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            predicate: default_predicate(Connectivity::default()),
        }
    }

    /// Use the default retry policy, consulting `connectivity` for offline detection.
    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.predicate = default_predicate(connectivity);
        self
    }
}

impl<E: CallError + 'static> Default for RetryOptions<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RetryOptions<E> {
    /// Default delays and attempt count with a caller-supplied predicate.
    ///
    /// Usable for error types that do not implement [`CallError`].
    pub fn from_predicate<P>(predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let config = RetryConfig::default();
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            predicate: Arc::new(predicate),
        }
    }

    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn should_retry(&self, error: &E) -> bool {
        (self.predicate)(error)
    }
}

impl<E> Clone for RetryOptions<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<E> fmt::Debug for RetryOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("predicate", &"<fn>")
            .finish()
    }
}

fn default_predicate<E: CallError + 'static>(connectivity: Connectivity) -> RetryPredicate<E> {
    Arc::new(move |error: &E| is_retryable(error, &connectivity))
}

/// Run `operation`, retrying retryable failures with exponential backoff.
///
/// Returns the first success, or the last error unmodified once the
/// predicate rejects it or `max_retries` retries have been spent.
pub async fn with_retry<T, E, F, Fut>(mut operation: F, options: &RetryOptions<E>) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;

    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if attempt >= options.max_retries || !options.should_retry(&error) {
            return Err(error);
        }

        let delay = calculate_backoff(attempt, options.base_delay, options.max_delay);
        tracing::debug!(
            attempt = attempt + 1,
            max_retries = options.max_retries,
            delay = ?delay,
            "Retrying failed operation"
        );
        metrics::record_retry();

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use thiserror::Error;
    use tokio::time::Instant;

    #[derive(Debug, Error)]
    #[error("upstream returned {0}")]
    struct StatusError(u16);

    impl CallError for StatusError {
        fn status(&self) -> Option<u16> {
            Some(self.0)
        }
    }

    fn always_retry() -> RetryOptions<io::Error> {
        RetryOptions::from_predicate(|_: &io::Error| true)
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_uses_all_attempts() {
        for max_retries in [0u32, 1, 3, 5] {
            let calls = AtomicU32::new(0);
            let options = always_retry().with_max_retries(max_retries);

            let result: Result<(), io::Error> = with_retry(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(io::Error::other("down")) }
                },
                &options,
            )
            .await;

            assert!(result.is_err());
            assert_eq!(calls.load(Ordering::SeqCst), max_retries + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_fails_once_with_original_error() {
        let calls = AtomicU32::new(0);
        let options = RetryOptions::from_predicate(|_: &io::Error| false).with_max_retries(5);

        let result: Result<(), io::Error> = with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(io::Error::new(io::ErrorKind::InvalidData, "bad payload")) }
            },
            &options,
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(err.to_string(), "bad payload");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_kth_attempt() {
        for k in 1..=4u32 {
            let calls = AtomicU32::new(0);
            let options = always_retry().with_max_retries(3);

            let result = with_retry(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n < k {
                            Err(io::Error::other("flaky"))
                        } else {
                            Ok(n)
                        }
                    }
                },
                &options,
            )
            .await;

            assert_eq!(result.unwrap(), k);
            assert_eq!(calls.load(Ordering::SeqCst), k);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_between_attempts_follow_backoff() {
        let stamps = Mutex::new(Vec::new());
        let options = always_retry()
            .with_max_retries(4)
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(1_000));

        let _: Result<(), io::Error> = with_retry(
            || {
                stamps.lock().unwrap().push(Instant::now());
                async { Err(io::Error::other("down")) }
            },
            &options,
        )
        .await;

        let stamps = stamps.into_inner().unwrap();
        assert_eq!(stamps.len(), 5);

        for (i, pair) in stamps.windows(2).enumerate() {
            let waited = (pair[1] - pair[0]).as_millis();
            let floor = (100u128 << i).min(1_000);
            let ceiling = (floor + 200).min(1_000);
            assert!(waited >= floor, "retry {i}: waited {waited}ms, expected >= {floor}ms");
            assert!(waited <= ceiling, "retry {i}: waited {waited}ms, expected <= {ceiling}ms");
        }
    }

    #[test]
    fn test_default_policy() {
        let online = Connectivity::default();

        assert!(is_retryable(&StatusError(500), &online));
        assert!(is_retryable(&StatusError(503), &online));
        assert!(!is_retryable(&StatusError(404), &online));
        assert!(!is_retryable(&StatusError(429), &online));

        assert!(is_retryable(&io::Error::other("network request failed"), &online));
        assert!(is_retryable(&io::Error::from(io::ErrorKind::ConnectionReset), &online));
        assert!(!is_retryable(&io::Error::other("invalid input"), &online));
    }

    #[test]
    fn test_offline_is_never_retryable() {
        let connectivity = Connectivity::default();
        let options: RetryOptions<StatusError> =
            RetryOptions::new().with_connectivity(connectivity.clone());

        assert!(options.should_retry(&StatusError(502)));
        connectivity.set_online(false);
        assert!(!options.should_retry(&StatusError(502)));
        connectivity.set_online(true);
        assert!(options.should_retry(&StatusError(502)));
    }

    #[test]
    fn test_defaults() {
        let options: RetryOptions<io::Error> = RetryOptions::default();
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.base_delay, Duration::from_millis(500));
        assert_eq!(options.max_delay, Duration::from_millis(10_000));
    }
}
