//! Exponential backoff for failed reconciles.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy for failed reconciles. Retries never give up; only the delay
/// grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub use_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_backoff_ms: 5,
            max_backoff_ms: 1_000_000,
            use_jitter: true,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(base_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            base_backoff_ms,
            max_backoff_ms,
            use_jitter: true,
        }
    }

    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let exponential_delay = self
            .base_backoff_ms
            .saturating_mul(2_u64.saturating_pow(exponent));
        let capped_delay = exponential_delay.min(self.max_backoff_ms);

        if self.use_jitter {
            let jitter_range = (capped_delay / 4).max(1);
            let jitter = rand::random::<u64>() % (2 * jitter_range);
            Duration::from_millis(capped_delay.saturating_add(jitter))
        } else {
            Duration::from_millis(capped_delay)
        }
    }
}
