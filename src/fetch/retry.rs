//! Exponential backoff shared by the fetch client and the media downloader.
//!
//! A [`RetryPolicy`] answers two questions after a failed attempt: may the
//! caller try again, and how long should it wait first. The delay for the
//! n-th retry is
//!
//! ```text
//! delay = min(base_delay * 2^(n-1), max_delay) + jitter
//! ```
//!
//! The fetch client runs with jitter disabled so retry timing is exact; the
//! media downloader adds up to 250 ms.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Default retry count (attempts after the first).
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Default first backoff delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default backoff cap.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(4);

/// Decision after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then make attempt number `attempt` (1-indexed).
    Retry { delay: Duration, attempt: u32 },
    /// Give up.
    DoNotRetry { reason: String },
}

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_COUNT, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl RetryPolicy {
    /// Creates a policy allowing `retry_count` retries after the first
    /// attempt. A `max_delay` below `base_delay` is raised to it.
    #[must_use]
    pub fn new(retry_count: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: retry_count.saturating_add(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            max_jitter: Duration::ZERO,
        }
    }

    /// Adds uniform random jitter in `[0, max_jitter)` to every delay.
    #[must_use]
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Total attempts including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether attempt number `attempt` (1-indexed) may be followed
    /// by another one.
    #[must_use]
    pub fn should_retry(&self, retryable: bool, attempt: u32) -> RetryDecision {
        if !retryable {
            return RetryDecision::DoNotRetry {
                reason: "failure is not retryable".to_string(),
            };
        }
        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }
        let delay = self.delay_for(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Backoff before the retry that follows attempt `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30);
        let delay = self
            .base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        delay + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== RetryPolicy Tests ====================

    #[test]
    fn test_default_policy_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(4));
    }

    #[test]
    fn test_zero_retries_allows_single_attempt() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10), Duration::from_millis(40));
        assert_eq!(policy.max_attempts(), 1);
        assert!(matches!(
            policy.should_retry(true, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    // ==================== Delay Calculation Tests ====================

    #[test]
    fn test_delay_doubles_until_cap() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10), Duration::from_millis(40));
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3), Duration::from_millis(40));
        assert_eq!(policy.delay_for(4), Duration::from_millis(40));
        assert_eq!(policy.delay_for(60), Duration::from_millis(40));
    }

    #[test]
    fn test_max_below_base_is_raised() {
        let policy = RetryPolicy::new(2, Duration::from_millis(100), Duration::from_millis(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(4))
            .with_jitter(Duration::from_millis(250));
        for _ in 0..50 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay < Duration::from_millis(750));
        }
    }

    // ==================== Decision Tests ====================

    #[test]
    fn test_should_retry_non_retryable() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.should_retry(false, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_should_retry_respects_budget() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(40));
        for attempt in 1..4 {
            assert_eq!(
                policy.should_retry(true, attempt),
                RetryDecision::Retry {
                    delay: policy.delay_for(attempt),
                    attempt: attempt + 1,
                }
            );
        }
        let RetryDecision::DoNotRetry { reason } = policy.should_retry(true, 4) else {
            panic!("expected give-up after budget");
        };
        assert!(reason.contains("exhausted"));
    }
}
