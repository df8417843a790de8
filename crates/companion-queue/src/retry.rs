//! Retry policy: exponential backoff with a dead-letter threshold.

use chrono::{DateTime, Duration, Utc};

/// Policy deciding whether and when a failed job runs again.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Backoff base; the delay after the first failure.
    pub base_delay: Duration,
    /// Dispatch attempts before a job dead-letters.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::seconds(60),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with explicit parameters.
    #[must_use]
    pub const fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
        }
    }

    /// Returns true if a job with this many attempts should be retried.
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Backoff delay after the given attempt count (1-based).
    ///
    /// `base_delay * 2^(attempts - 1)`, exponent capped at
    /// `max_attempts - 1`.
    #[must_use]
    pub fn delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(self.max_attempts.saturating_sub(1));
        self.base_delay * 2_i32.saturating_pow(exponent)
    }

    /// When a job failing its `attempts`-th dispatch should run next.
    #[must_use]
    pub fn next_run(&self, now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
        now + self.delay(attempts)
    }
}
