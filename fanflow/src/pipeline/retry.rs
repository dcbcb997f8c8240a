//! Init stage retry policy with exponential backoff.
//!
//! Only transient failures are retried. The first attempt is not a retry,
//! so a policy with `max_retries = 3` makes at most four Init attempts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{ConfigError, ErrorClass};

/// Retry policy for the Init stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitRetryPolicy {
    /// Retries allowed after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_interval_ms")]
    pub base_interval_ms: u64,
    /// Multiplier applied to the delay for each further retry.
    #[serde(default = "default_backoff_rate")]
    pub backoff_rate: f64,
    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_interval_ms() -> u64 {
    2000
}

fn default_backoff_rate() -> f64 {
    2.0
}

fn default_max_interval_ms() -> u64 {
    60_000
}

impl Default for InitRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_interval_ms: default_base_interval_ms(),
            backoff_rate: default_backoff_rate(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

impl InitRetryPolicy {
    /// Creates the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the first retry delay.
    #[must_use]
    pub fn with_base_interval_ms(mut self, interval: u64) -> Self {
        self.base_interval_ms = interval;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_rate(mut self, rate: f64) -> Self {
        self.backoff_rate = rate;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_interval_ms(mut self, interval: u64) -> Self {
        self.max_interval_ms = interval;
        self
    }

    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_ms = self.base_interval_ms as f64 * self.backoff_rate.powi(exponent);
        let capped = delay_ms.min(self.max_interval_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Checks that every delay within the retry budget is strictly longer
    /// than the one before it.
    ///
    /// A rate of 1.0 or less, or a cap that is reached before the last
    /// retry, would repeat a delay and is rejected.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if !self.backoff_rate.is_finite() || self.backoff_rate <= 1.0 {
            return Err(ConfigError::invalid(
                "init_retry.backoff_rate",
                format!("{} must be a finite value > 1.0", self.backoff_rate),
            ));
        }
        if self.max_interval_ms < self.base_interval_ms {
            return Err(ConfigError::invalid(
                "init_retry.max_interval_ms",
                "must not be smaller than base_interval_ms",
            ));
        }
        for retry in 2..=self.max_retries {
            if self.delay_for_retry(retry) <= self.delay_for_retry(retry - 1) {
                return Err(ConfigError::invalid(
                    "init_retry.max_interval_ms",
                    format!("delay before retry {retry} does not grow past the previous one"),
                ));
            }
        }
        Ok(())
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// Retry budget exhausted.
    GiveUp,
    /// The error class is never retried.
    NotRetryable,
}

/// Retry bookkeeping for one run's Init stage.
#[derive(Debug, Default)]
pub struct RetryState {
    retries: u32,
    delays: Vec<Duration>,
}

impl RetryState {
    /// Creates a fresh state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Retries scheduled so far.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Attempts started so far, counting the one in progress.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Delays handed out so far, in order.
    #[must_use]
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Returns true if no retries remain.
    #[must_use]
    pub fn is_exhausted(&self, policy: &InitRetryPolicy) -> bool {
        self.retries >= policy.max_retries
    }

    /// Decides whether a failure of the given class should be retried and,
    /// if so, records the retry.
    pub fn decide(&mut self, policy: &InitRetryPolicy, class: ErrorClass) -> RetryDecision {
        if class != ErrorClass::Transient {
            return RetryDecision::NotRetryable;
        }
        if self.is_exhausted(policy) {
            return RetryDecision::GiveUp;
        }

        self.retries += 1;
        let delay = policy.delay_for_retry(self.retries);
        self.delays.push(delay);
        RetryDecision::Retry(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_default() {
        let policy = InitRetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_interval_ms, 2000);
        assert!((policy.backoff_rate - 2.0).abs() < f64::EPSILON);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_policy_builder() {
        let policy = InitRetryPolicy::new()
            .with_max_retries(5)
            .with_base_interval_ms(100)
            .with_backoff_rate(3.0)
            .with_max_interval_ms(1000);

        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(300));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(900));
        assert_eq!(policy.delay_for_retry(4), Duration::from_millis(1000));
    }

    #[test]
    fn test_exponential_delays() {
        let policy = InitRetryPolicy::default();
        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_retry(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_retry(3), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = InitRetryPolicy::default().with_max_interval_ms(5000);
        assert_eq!(policy.delay_for_retry(10), Duration::from_millis(5000));
    }

    #[test]
    fn test_decide_until_exhausted() {
        let policy = InitRetryPolicy::default();
        let mut state = RetryState::new();

        for _ in 0..3 {
            assert!(matches!(
                state.decide(&policy, ErrorClass::Transient),
                RetryDecision::Retry(_)
            ));
        }
        assert_eq!(state.decide(&policy, ErrorClass::Transient), RetryDecision::GiveUp);
        assert_eq!(state.retries(), 3);
        assert_eq!(state.attempts(), 4);

        let delays = state.delays();
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_decide_not_retryable() {
        let policy = InitRetryPolicy::default();
        let mut state = RetryState::new();

        assert_eq!(state.decide(&policy, ErrorClass::Fatal), RetryDecision::NotRetryable);
        assert_eq!(state.decide(&policy, ErrorClass::Worker), RetryDecision::NotRetryable);
        assert_eq!(state.retries(), 0);
    }

    #[test]
    fn test_no_retry_policy() {
        let mut state = RetryState::new();
        assert_eq!(
            state.decide(&InitRetryPolicy::no_retry(), ErrorClass::Transient),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_validate_rejects_shrinking_backoff() {
        let policy = InitRetryPolicy::default().with_backoff_rate(0.5);
        assert!(matches!(
            policy.validate(),
            Err(ConfigError::Invalid { field: "init_retry.backoff_rate", .. })
        ));

        let policy = InitRetryPolicy::default().with_max_interval_ms(10);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_flat_backoff() {
        let policy = InitRetryPolicy::default().with_backoff_rate(1.0);
        assert!(matches!(
            policy.validate(),
            Err(ConfigError::Invalid { field: "init_retry.backoff_rate", .. })
        ));

        // 2s, 4s, 8s, then 8s again under the cap
        let policy = InitRetryPolicy::default()
            .with_max_retries(4)
            .with_max_interval_ms(8000);
        assert!(matches!(
            policy.validate(),
            Err(ConfigError::Invalid { field: "init_retry.max_interval_ms", .. })
        ));

        // The cap only bites past the budget
        let policy = InitRetryPolicy::default().with_max_interval_ms(8000);
        assert!(policy.validate().is_ok());
    }
}
