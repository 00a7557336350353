//! Retry policy for queued sync operations

use std::time::Duration;

/// Default attempt budget before an item is marked failed
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;
/// Default delay before the first retry
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1_000);
/// Default growth factor between retries
pub const DEFAULT_MULTIPLIER: u32 = 2;

/// Exponential backoff: `initial_delay * multiplier^(attempt - 1)`.
///
/// Failures on attempts `1..=max_attempts` are rescheduled; the failure of
/// attempt `max_attempts + 1` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the failure of `attempt` (1-based).
    /// Saturates instead of overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.multiplier
            .checked_pow(exponent)
            .and_then(|factor| self.initial_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    /// Whether a failure on `attempt` should be retried
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }

    /// Every delay this policy will ever produce, in order
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_attempts)
            .map(|attempt| self.delay_for(attempt))
            .collect()
    }
}
