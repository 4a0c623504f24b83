//! Retry policy around agent invocations.
//!
//! Built from the spec's `failure_policy`; applies only to retryable errors
//! (5xx, rate limits, transport timeouts). Jittered backoff scales the
//! exponential delay by a factor in [0.5, 1.5).

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::time::Duration;

use crate::spec::{Backoff, FailurePolicy};

#[derive(Debug, Clone)]
pub enum RetryPolicy {
    None,
    Constant {
        max_attempts: u32,
        interval: Duration,
    },
    Exponential {
        max_attempts: u32,
        initial_interval: Duration,
        max_interval: Duration,
    },
    Jittered {
        max_attempts: u32,
        initial_interval: Duration,
        max_interval: Duration,
    },
}

impl RetryPolicy {
    /// True while `attempt` (0-based count of failures so far) may retry.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }

    pub fn max_attempts(&self) -> u32 {
        match self {
            RetryPolicy::None => 0,
            RetryPolicy::Constant { max_attempts, .. }
            | RetryPolicy::Exponential { max_attempts, .. }
            | RetryPolicy::Jittered { max_attempts, .. } => *max_attempts,
        }
    }

    /// Delay before retrying after the given failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            RetryPolicy::None => Duration::ZERO,
            RetryPolicy::Constant { interval, .. } => *interval,
            RetryPolicy::Exponential {
                initial_interval,
                max_interval,
                ..
            } => exponential(*initial_interval, *max_interval, attempt),
            RetryPolicy::Jittered {
                initial_interval,
                max_interval,
                ..
            } => {
                let base = exponential(*initial_interval, *max_interval, attempt);
                let factor = 0.5 + jitter_unit(attempt);
                base.mul_f64(factor).min(*max_interval)
            }
        }
    }
}

fn exponential(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = initial.as_secs_f64() * 2f64.powi(attempt as i32);
    Duration::from_secs_f64(exp).min(max)
}

/// Pseudo-random unit value in [0, 1) from the std hasher's per-process seed.
fn jitter_unit(attempt: u32) -> f64 {
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u32(attempt);
    (hasher.finish() % 1_000) as f64 / 1_000.0
}

impl From<&FailurePolicy> for RetryPolicy {
    fn from(policy: &FailurePolicy) -> Self {
        if policy.retries == 0 {
            return RetryPolicy::None;
        }
        let initial_interval = Duration::from_millis(policy.initial_interval_ms);
        let max_interval = Duration::from_millis(policy.max_interval_ms);
        match policy.backoff {
            Backoff::Constant => RetryPolicy::Constant {
                max_attempts: policy.retries,
                interval: initial_interval,
            },
            Backoff::Exponential => RetryPolicy::Exponential {
                max_attempts: policy.retries,
                initial_interval,
                max_interval,
            },
            Backoff::Jittered => RetryPolicy::Jittered {
                max_attempts: policy.retries,
                initial_interval,
                max_interval,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: zero retries never retry.
    #[test]
    fn none_policy() {
        let policy = RetryPolicy::from(&FailurePolicy {
            retries: 0,
            ..Default::default()
        });
        assert!(!policy.should_retry(0));
        assert_eq!(policy.delay(0), Duration::ZERO);
    }

    /// **Scenario**: constant backoff keeps a fixed interval up to the cap.
    #[test]
    fn constant_policy() {
        let policy = RetryPolicy::from(&FailurePolicy {
            retries: 3,
            backoff: Backoff::Constant,
            initial_interval_ms: 100,
            max_interval_ms: 10_000,
        });
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(100));
    }

    /// **Scenario**: exponential doubles and caps at max_interval.
    #[test]
    fn exponential_policy() {
        let policy = RetryPolicy::from(&FailurePolicy {
            retries: 5,
            backoff: Backoff::Exponential,
            initial_interval_ms: 100,
            max_interval_ms: 500,
        });
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(3), Duration::from_millis(500)); // capped
    }

    /// **Scenario**: jittered delays stay within [0.5, 1.5) of the base and
    /// under the cap.
    #[test]
    fn jittered_bounds() {
        let policy = RetryPolicy::from(&FailurePolicy {
            retries: 5,
            backoff: Backoff::Jittered,
            initial_interval_ms: 100,
            max_interval_ms: 10_000,
        });
        for attempt in 0..4 {
            let base = exponential(
                Duration::from_millis(100),
                Duration::from_millis(10_000),
                attempt,
            );
            let delay = policy.delay(attempt);
            assert!(delay >= base.mul_f64(0.5), "{delay:?} vs {base:?}");
            assert!(delay < base.mul_f64(1.5), "{delay:?} vs {base:?}");
        }
    }
}
