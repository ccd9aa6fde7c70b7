//! Fixed-delay retry policy.

use std::time::Duration;

/// How often and how patiently to retry.
///
/// Every attempt, the first included, is preceded by [`delay`](Self::delay).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy. At least one attempt is always made.
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: if max_attempts == 0 { 1 } else { max_attempts },
            delay,
        }
    }

    /// Number of attempts.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause before each attempt.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Attempt numbers, starting at 1.
    pub fn attempts(&self) -> impl Iterator<Item = u32> + use<> {
        1..=self.max_attempts
    }

    /// Sleeps for the configured delay.
    pub async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}
