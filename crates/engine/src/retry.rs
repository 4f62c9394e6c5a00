//! Bounded exponential backoff for node retries.

use std::time::Duration;

use conflux_core::constants::{DEFAULT_MAX_RETRIES, RETRY_BASE_DELAY, RETRY_MAX_DELAY};
use rand::Rng;

/// Retry policy applied to transient node failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Default retry cap; nodes may override it in their record.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on the computed delay.
    pub max_delay: Duration,
    /// Apply equal jitter to spread retry storms. Off by default: the
    /// stock backoff is the exact `min(base * 2^n, cap)` schedule, and
    /// jitter is an explicit opt-in for large fleets.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: RETRY_BASE_DELAY,
            max_delay: RETRY_MAX_DELAY,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// A jitter-free policy with the given bounds (tests, local runs).
    #[must_use]
    pub fn fixed(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter: false,
        }
    }

    /// The retry cap for a node, honoring its per-node override.
    #[must_use]
    pub fn max_retries_for(&self, node_override: Option<u32>) -> u32 {
        node_override.unwrap_or(self.max_retries)
    }

    /// Backoff before the attempt following `retry_count` failures:
    /// `base * 2^retry_count`, capped, with optional equal jitter.
    #[must_use]
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count.min(16));
        let raw = self.base_delay.saturating_mul(factor);
        let capped = raw.min(self.max_delay);
        if !self.jitter || capped.is_zero() {
            return capped;
        }
        let half = capped / 2;
        let spread = rand::thread_rng().gen_range(0.0..=1.0);
        half + Duration::from_secs_f64(half.as_secs_f64() * spread)
    }
}
