//! Retry decisions and backoff delays between task attempts.

use crate::tasks::{BaseTask, RunInfo};
use rand::Rng;
use std::time::Duration;

/// Jitter applied on top of the exponential delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JitterStrategy {
    /// No jitter.
    None,
    /// Half fixed, half random.
    #[default]
    Equal,
    /// Random from the lower bound to the delay.
    Full,
}

/// Exponential backoff (factor 2) bounded by a task's min and max backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    jitter: JitterStrategy,
}

impl Backoff {
    /// Creates a backoff between `min` and `max`. If `min > max` the bounds
    /// are swapped.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min: min.min(max),
            max: max.max(min),
            jitter: JitterStrategy::default(),
        }
    }

    /// Uses the bounds configured on a task.
    #[must_use]
    pub fn for_task(base: &BaseTask) -> Self {
        Self::new(base.min_backoff, base.max_backoff)
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the attempt following the `failures`-th failure.
    ///
    /// The result always lies within `[min, max]`.
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        let min = nanos(self.min);
        let max = nanos(self.max);
        let exp = 2u64.saturating_pow(failures.saturating_sub(1));
        let delay = min.saturating_mul(exp).clamp(min, max);

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Equal => {
                let lower = (delay / 2).max(min);
                random_between(lower, delay)
            }
            JitterStrategy::Full => random_between(min, delay),
        };

        Duration::from_nanos(jittered.clamp(min, max))
    }
}

fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

fn random_between(low: u64, high: u64) -> u64 {
    if low >= high {
        high
    } else {
        rand::thread_rng().gen_range(low..=high)
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more retries, give up.
    GiveUp,
    /// Don't retry, the error is not retryable.
    NotRetryable,
}

/// Decides what to do after a task's `failures`-th failed execution.
#[must_use]
pub fn should_retry(base: &BaseTask, failures: u32, info: &RunInfo) -> RetryDecision {
    if !info.is_retryable {
        return RetryDecision::NotRetryable;
    }
    if failures > base.retries {
        return RetryDecision::GiveUp;
    }
    RetryDecision::Retry(Backoff::for_task(base).delay(failures))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_exponential_without_jitter() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000))
            .with_jitter(JitterStrategy::None);

        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
        assert_eq!(backoff.delay(5), Duration::from_millis(1000));
        assert_eq!(backoff.delay(64), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let (min, max) = (Duration::from_millis(10), Duration::from_millis(50));
        for jitter in [JitterStrategy::Equal, JitterStrategy::Full] {
            let backoff = Backoff::new(min, max).with_jitter(jitter);
            for failures in 0..10 {
                for _ in 0..20 {
                    let d = backoff.delay(failures);
                    assert!(d >= min && d <= max, "{jitter:?} gave {d:?}");
                }
            }
        }
    }

    #[test]
    fn test_equal_bounds() {
        let us = Duration::from_micros(1);
        let backoff = Backoff::new(us, us);
        assert_eq!(backoff.delay(1), us);
        assert_eq!(backoff.delay(7), us);
    }

    #[test]
    fn test_should_retry() {
        let mut base = BaseTask::new(0, "a");
        base.retries = 2;
        base.min_backoff = Duration::from_micros(1);
        base.max_backoff = Duration::from_micros(1);

        assert_eq!(
            should_retry(&base, 1, &RunInfo::retryable()),
            RetryDecision::Retry(Duration::from_micros(1))
        );
        assert_eq!(
            should_retry(&base, 2, &RunInfo::retryable()),
            RetryDecision::Retry(Duration::from_micros(1))
        );
        assert_eq!(
            should_retry(&base, 3, &RunInfo::retryable()),
            RetryDecision::GiveUp
        );
        assert_eq!(
            should_retry(&base, 1, &RunInfo::default()),
            RetryDecision::NotRetryable
        );
    }
}
