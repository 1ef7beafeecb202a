//! Retry policy with exponential backoff and jitter.
//!
//! One policy value describes the whole budget: attempt count, base delay,
//! growth factor, cap and jitter fraction. Server-proposed waits (429
//! `Retry-After`) act as a floor on top of the computed delay.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Jitter fraction in `0.0..=1.0`; each delay is scaled by a random
    /// factor in `1.0 ± jitter`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Policy used for remote catalog requests.
    pub fn remote_api() -> Self {
        Self::default()
    }

    /// Single attempt, no waiting. Useful in tests.
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
            jitter: 0.0,
        }
    }

    /// Delay before the next attempt after `attempt` (1-based) failed.
    /// `server_hint` is the remote's own minimum wait, which is never
    /// undercut.
    pub fn delay_for(&self, attempt: u32, server_hint: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let unjittered = self
            .base_delay
            .mul_f64(self.backoff_factor.powi(exponent as i32))
            .min(self.max_delay);

        let spread = if self.jitter > 0.0 {
            1.0 + self.jitter * (fastrand::f64() * 2.0 - 1.0)
        } else {
            1.0
        };
        let jittered = unjittered.mul_f64(spread).min(self.max_delay);

        match server_hint {
            Some(hint) if hint > jittered => hint,
            _ => jittered,
        }
    }

    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn jitterless(base_ms: u64, max_ms: u64, factor: f64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            backoff_factor: factor,
            jitter: 0.0,
        }
    }

    #[rstest]
    #[case(1, 500)]
    #[case(2, 1_000)]
    #[case(3, 2_000)]
    #[case(4, 4_000)]
    fn backoff_doubles_per_attempt(#[case] attempt: u32, #[case] expected_ms: u64) {
        let policy = jitterless(500, 60_000, 2.0);
        assert_eq!(
            policy.delay_for(attempt, None),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn backoff_saturates_at_the_cap() {
        let policy = jitterless(500, 3_000, 2.0);
        assert_eq!(policy.delay_for(10, None), Duration::from_millis(3_000));
    }

    #[test]
    fn server_hint_floors_the_delay() {
        let policy = jitterless(500, 60_000, 2.0);
        let hint = Duration::from_secs(10);
        assert_eq!(policy.delay_for(1, Some(hint)), hint);
        // A hint below the computed delay changes nothing.
        assert_eq!(
            policy.delay_for(4, Some(Duration::from_millis(1))),
            Duration::from_millis(4_000)
        );
    }

    #[test]
    fn jitter_stays_inside_the_declared_band() {
        let policy = RetryPolicy {
            jitter: 0.2,
            ..jitterless(1_000, 60_000, 2.0)
        };
        for _ in 0..200 {
            let delay = policy.delay_for(1, None);
            assert!(delay >= Duration::from_millis(800), "too short: {delay:?}");
            assert!(delay <= Duration::from_millis(1_200), "too long: {delay:?}");
        }
    }

    #[test]
    fn attempt_budget_is_inclusive_of_the_first_try() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        assert!(policy.has_attempts_left(1));
        assert!(policy.has_attempts_left(2));
        assert!(!policy.has_attempts_left(3));
    }
}
