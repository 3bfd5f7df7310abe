//! Retry policy: wraps the classifier's retry decision with configured
//! bounds. Grounded in `hook_common::retry::RetryPolicy`, generalized from a
//! single global backoff curve to the classifier's category-specific bases
//! (Timeout/Network base 1s, RateLimit 30s, Internal 5s).

use std::time::Duration;

use envconfig::Envconfig;

use crate::classify::{self, Classification, RetryDecision};
use crate::duration::EnvMsDuration;

/// Environment-driven bounds for a [`RetryPolicy`]. Grounded in
/// `hook-worker::config::RetryPolicyConfig`'s nested-Envconfig shape.
#[derive(Envconfig, Clone, Debug)]
pub struct RetryPolicyConfig {
    #[envconfig(default = "2")]
    pub backoff_coefficient: u32,

    #[envconfig(default = "300000")]
    pub maximum_interval: EnvMsDuration,

    #[envconfig(default = "3")]
    pub max_retries: u32,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            maximum_interval: EnvMsDuration(Duration::from_millis(300_000)),
            max_retries: 3,
        }
    }
}

impl RetryPolicyConfig {
    pub fn build(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.backoff_coefficient,
            self.maximum_interval.as_duration(),
            self.max_retries,
        )
    }
}

/// The retry policy a worker pool consults after a job fails.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Coefficient to multiply a category's base interval by for every past
    /// attempt.
    backoff_coefficient: u32,
    /// The maximum possible backoff between retries, regardless of category
    /// or attempt.
    maximum_interval: Duration,
    /// Maximum attempts for a retriable category before giving up.
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(backoff_coefficient: u32, maximum_interval: Duration, max_retries: u32) -> Self {
        Self {
            backoff_coefficient,
            maximum_interval,
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decide whether a job about to become attempt `next_attempt` (1-based)
    /// should be retried, given its failure was classified as
    /// `classification`.
    pub fn decide(&self, classification: Classification, next_attempt: u32) -> RetryDecision {
        classify::decide_retry(
            classification,
            next_attempt,
            self.max_retries,
            self.backoff_coefficient,
            self.maximum_interval,
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            maximum_interval: Duration::from_secs(300),
            max_retries: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;

    #[test]
    fn retries_up_to_configured_max() {
        let policy = RetryPolicy::new(2, Duration::from_secs(300), 3);
        let classification = classify("connection reset");

        assert!(matches!(
            policy.decide(classification, 1),
            RetryDecision::Retry(_)
        ));
        assert!(matches!(
            policy.decide(classification, 3),
            RetryDecision::Retry(_)
        ));
        assert_eq!(policy.decide(classification, 4), RetryDecision::GiveUp);
    }
}
