//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Upper bound (exclusive) of the random jitter added to every delay.
pub const JITTER_MS: u64 = 200;

/// Calculate the delay before retry number `attempt` (0 for the first retry).
///
/// `min(base * 2^attempt + jitter, max)` with jitter drawn from `[0, JITTER_MS)`.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..JITTER_MS);
    backoff_with_jitter(attempt, base, max, jitter)
}

/// Deterministic half of [`calculate_backoff`].
pub fn backoff_with_jitter(attempt: u32, base: Duration, max: Duration, jitter_ms: u64) -> Duration {
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);

    let exponential = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    let delay_ms = exponential.saturating_add(jitter_ms).min(max_ms);

    Duration::from_millis(delay_ms)
}
