//! Retry policy: decides backoff delays for failed deliveries.

use std::time::Duration;

/// Retry policy for failed alert deliveries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total delivery attempts, including the first one.
    pub max_attempts: u32,

    /// Base delay for the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Whether a delivery that just failed may be tried again.
    ///
    /// `failed_before` is the number of failed attempts recorded before this one.
    pub fn allows_retry(&self, failed_before: u32) -> bool {
        failed_before.saturating_add(1) < self.max_attempts
    }

    /// Delay before the next retry.
    ///
    /// `attempts` is the number of failed attempts so far (1-indexed):
    /// delay = base_delay * multiplier^(attempts - 1)
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX)
    }
}
