use std::time::Duration;

/// Bounded linear backoff for final submission.
///
/// After the `n`th failed attempt the caller waits `base + step * n` before
/// trying again, and stops once `max_attempts` attempts have failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_secs(10),
            step: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base: Duration, step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            step,
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt is allowed after `failed` consecutive failures.
    #[must_use]
    pub fn should_retry(&self, failed: u32) -> bool {
        failed < self.max_attempts
    }

    /// Wait before the attempt that follows `failed` failures, or `None` when
    /// the budget is spent.
    #[must_use]
    pub fn delay_after(&self, failed: u32) -> Option<Duration> {
        self.should_retry(failed)
            .then(|| self.base + self.step.saturating_mul(failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Some(Duration::from_secs(15)));
        assert_eq!(policy.delay_after(2), Some(Duration::from_secs(20)));
        assert_eq!(policy.delay_after(4), Some(Duration::from_secs(30)));
    }

    #[test]
    fn no_sixth_attempt() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
        assert_eq!(policy.delay_after(5), None);
    }

    #[test]
    fn at_least_one_attempt() {
        let policy = RetryPolicy::new(0, Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.max_attempts(), 1);
        assert!(policy.should_retry(0));
        assert!(!policy.should_retry(1));
    }
}
