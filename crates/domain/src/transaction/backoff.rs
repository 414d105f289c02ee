//! Retry backoff policy.

use std::time::Duration;

/// Maximum number of processing attempts before a transaction is dead-lettered.
pub const MAX_ATTEMPTS: u32 = 5;

/// Upper bound for a single retry delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// Returns the delay before the next attempt after `attempt` failed attempts.
///
/// The delay is `2^attempt` minutes, capped at [`MAX_BACKOFF`].
pub fn backoff_delay(attempt: u32) -> Duration {
    let minutes = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(minutes.saturating_mul(60)).min(MAX_BACKOFF)
}
