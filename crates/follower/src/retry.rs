//! Backoff for transient chain and database errors.

use std::time::Duration;

use rand::random;

const BASE_DELAY_MS: u64 = 250;
const MAX_DELAY_MS: u64 = 30_000;

/// Delay before retry number `attempt` (0-based): exponential, capped, plus
/// up to a quarter of jitter.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp_backoff_ms = BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(20));
    let capped_ms = exp_backoff_ms.min(MAX_DELAY_MS);
    let jitter_ms = random::<u64>() % (capped_ms / 4 + 1);
    Duration::from_millis((capped_ms + jitter_ms).min(MAX_DELAY_MS))
}
