//! Backoff delay computation for automatic retries.

use crate::node::BackoffConfig;
use rand::Rng;
use std::time::Duration;

/// Computes the capped exponential delay before the given retry attempt.
///
/// `attempt` is zero-based: the delay before the first retry uses attempt 0.
#[must_use]
pub fn backoff_delay(config: &BackoffConfig, attempt: u32) -> Duration {
    let exp = config
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(exp.min(config.max_delay_ms))
}

/// Applies full jitter: a uniform draw from 0 to the computed delay.
///
/// Prevents retry storms when many branches fail against the same backend.
#[must_use]
pub fn jittered_backoff_delay(config: &BackoffConfig, attempt: u32) -> Duration {
    let ceiling = backoff_delay(config, attempt).as_millis() as u64;
    if ceiling == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
}

/// Returns true if another attempt remains after `attempts_made` tries.
#[must_use]
pub fn attempts_remain(config: &BackoffConfig, attempts_made: u32) -> bool {
    attempts_made < config.max_attempts
}
