//! Retry schedule for backend calls.

use crate::error::BackendError;
use std::time::Duration;

/// Exponential backoff with bounded jitter.
///
/// The delay after the n-th failed attempt is `base_delay * 2^(n-1)`, capped
/// at `max_delay`, then scaled by a random factor in `[1 - jitter, 1 + jitter]`
/// and capped again. A rate-limit hint from the backend replaces the computed
/// delay but is still capped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per task, first try included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction in `[0, 1)`
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempt` failed with `err`.
    pub fn should_retry(&self, attempt: u32, err: &BackendError) -> bool {
        err.is_retryable() && attempt < self.max_attempts
    }

    /// How long to wait after `attempt` (1-based) failed with `err`.
    pub fn delay_for(&self, attempt: u32, err: &BackendError) -> Duration {
        match err.retry_after() {
            Some(hint) => hint.min(self.max_delay),
            None => self.backoff(attempt),
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let raw = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        if self.jitter <= 0.0 {
            return raw;
        }
        let factor = 1.0 + self.jitter * (fastrand::f64() * 2.0 - 1.0);
        raw.mul_f64(factor.max(0.0)).min(self.max_delay)
    }
}
