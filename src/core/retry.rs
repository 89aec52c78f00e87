/*!
 * Retry policy with exponential backoff
 *
 * Retries are decided and slept at the controller, never inside workers:
 * a failed operation whose kind is retryable is resubmitted to the pool
 * as a fresh singleton batch after the backoff elapses.
 */

use std::time::Duration;

use crate::config::RetryPolicy;
use crate::error::ErrorKind;

/// Whether an operation that has completed `attempts` tries should be
/// resubmitted. Verification failures get a single retry; other
/// retryable kinds use the full attempt budget.
pub fn should_retry(kind: ErrorKind, attempts: u32, policy: &RetryPolicy) -> bool {
    if !kind.is_retryable() {
        return false;
    }
    match kind {
        ErrorKind::VerificationFailed => attempts < 2,
        _ => attempts < policy.max_attempts,
    }
}

/// Backoff before attempt `attempts + 1`: `base · 2^(attempts−1)`,
/// plus up to 10% jitter so parallel retries do not stampede.
pub fn backoff_delay(policy: &RetryPolicy, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    let base_ms = policy.base_delay_ms.saturating_mul(1u64 << exponent);
    let jitter_ms = (base_ms as f64 * 0.1 * rand::random::<f64>()) as u64;
    Duration::from_millis(base_ms + jitter_ms)
}
