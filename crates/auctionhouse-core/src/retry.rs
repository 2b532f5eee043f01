//! Exponential backoff policy shared by the outbox dispatcher and the bus.

use std::time::Duration;

/// Retry schedule with exponential backoff, a ceiling and a bounded number of
/// attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed before the work is dead-lettered.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound on the delay before jitter.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Maximum extra delay added by jitter, as a fraction of the delay.
    const JITTER_FRACTION: f64 = 0.2;

    /// Returns the delay to wait after `attempts` failed attempts.
    ///
    /// `jitter` is expected in `[0.0, 1.0)` and stretches the delay by up to 20%.
    #[must_use]
    pub fn delay_for(&self, attempts: u32, jitter: f64) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay);
        delay.mul_f64(1.0 + jitter.clamp(0.0, 1.0) * Self::JITTER_FRACTION)
    }

    /// Whether `attempts` failures exhaust this policy.
    #[must_use]
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = policy();
        assert_eq!(policy.delay_for(1, 0.0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, 0.0), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3, 0.0), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped_at_max_delay() {
        let policy = policy();
        assert_eq!(policy.delay_for(10, 0.0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(u32::MAX, 0.0), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stretches_delay_by_at_most_a_fifth() {
        let policy = policy();
        let delay = policy.delay_for(1, 0.5);
        assert_eq!(delay, Duration::from_millis(110));
        assert!(policy.delay_for(1, 0.999) < Duration::from_millis(121));
    }

    #[test]
    fn test_is_exhausted_after_max_attempts() {
        let policy = policy();
        assert!(!policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
    }
}
