//! Error classification and retry decisions.
//!
//! Grounded in `hook-common::kafka_messages::app_metrics::ErrorType` (a closed,
//! serializable error taxonomy) and `hook-worker`'s `is_retryable_status` /
//! `From<&reqwest::Error> for WebhookJobError` pattern of turning an opaque
//! failure into a typed, stable category before anything downstream acts on
//! it.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// A closed taxonomy of causes for a job failure. Stable across releases:
/// persisted jobs reference these by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    RateLimit,
    Auth,
    NotFound,
    PermissionDenied,
    InvalidInput,
    QuotaExceeded,
    Internal,
    Unknown,
}

impl ErrorCategory {
    /// Whether this category is retried by default.
    pub fn default_retriable(self) -> bool {
        !matches!(
            self,
            ErrorCategory::InvalidInput
                | ErrorCategory::Auth
                | ErrorCategory::NotFound
                | ErrorCategory::PermissionDenied
        )
    }

    /// Base backoff interval before jitter, per category.
    pub fn base_backoff(self) -> Duration {
        match self {
            ErrorCategory::Timeout | ErrorCategory::Network => Duration::from_secs(1),
            ErrorCategory::RateLimit => Duration::from_secs(30),
            ErrorCategory::Internal => Duration::from_secs(5),
            ErrorCategory::QuotaExceeded => Duration::from_secs(30),
            ErrorCategory::Unknown => Duration::from_secs(2),
            // Non-retriable categories never consult backoff, but a value is
            // still required so callers don't need an Option.
            ErrorCategory::Auth
            | ErrorCategory::NotFound
            | ErrorCategory::PermissionDenied
            | ErrorCategory::InvalidInput => Duration::from_secs(0),
        }
    }
}

/// The outcome of classifying a raw error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: ErrorCategory,
    pub retriable: bool,
}

/// Classify a raw error message into a [`Classification`].
///
/// Uses a prioritised rule list over the error's message, the same style as
/// `is_retryable_status` classifying HTTP responses: specific signals are
/// checked before falling back to a catch-all. Message matching is
/// case-insensitive substring search, since the summarizer's underlying
/// errors (network libraries, third-party API clients) are not under this
/// crate's control and don't share a common error type.
pub fn classify(raw_message: &str) -> Classification {
    let lower = raw_message.to_ascii_lowercase();

    let category = if contains_any(&lower, &["401", "unauthorized", "invalid api key"]) {
        ErrorCategory::Auth
    } else if contains_any(&lower, &["403", "forbidden", "permission denied"]) {
        ErrorCategory::PermissionDenied
    } else if contains_any(&lower, &["404", "not found"]) {
        ErrorCategory::NotFound
    } else if contains_any(&lower, &["429", "rate limit", "too many requests"]) {
        ErrorCategory::RateLimit
    } else if contains_any(&lower, &["quota", "insufficient_quota"]) {
        ErrorCategory::QuotaExceeded
    } else if contains_any(&lower, &["timeout", "timed out"]) {
        ErrorCategory::Timeout
    } else if contains_any(
        &lower,
        &[
            "connection reset",
            "connection refused",
            "dns",
            "network",
            "broken pipe",
        ],
    ) {
        ErrorCategory::Network
    } else if contains_any(
        &lower,
        &[
            "transcript-disabled",
            "transcripts disabled",
            "invalid url",
            "unsupported",
        ],
    ) {
        ErrorCategory::InvalidInput
    } else if contains_any(&lower, &["internal", "panic", "unexpected"]) {
        ErrorCategory::Internal
    } else {
        ErrorCategory::Unknown
    };

    Classification {
        category,
        retriable: category.default_retriable(),
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// What a worker should do after a job fails, as decided by
/// [`decide_retry`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

/// Decide whether a job that failed with `classification` should be retried,
/// given it is about to become attempt number `next_attempt` (1-based) and
/// the policy's `max_retries` and backoff parameters.
pub fn decide_retry(
    classification: Classification,
    next_attempt: u32,
    max_retries: u32,
    backoff_coefficient: u32,
    maximum_interval: Duration,
) -> RetryDecision {
    if !classification.retriable || next_attempt > max_retries {
        return RetryDecision::GiveUp;
    }

    let base = classification.category.base_backoff();
    let exponent = next_attempt.saturating_sub(1);
    let candidate = base
        .checked_mul(backoff_coefficient.saturating_pow(exponent))
        .unwrap_or(maximum_interval);

    // Cap after jitter, not before: jitter can push an already-capped value
    // past `maximum_interval`, which is supposed to be a hard ceiling on the
    // delivered delay.
    let jittered = with_jitter(candidate);
    RetryDecision::Retry(std::cmp::min(jittered, maximum_interval))
}

/// Apply ±25% uniform jitter to a backoff duration.
fn with_jitter(duration: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let factor = rng.gen_range(0.75..=1.25);
    duration.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_auth_errors_as_non_retriable() {
        let c = classify("401 Unauthorized");
        assert_eq!(c.category, ErrorCategory::Auth);
        assert!(!c.retriable);
    }

    #[test]
    fn classifies_timeout_as_retriable() {
        let c = classify("request timed out after 30s");
        assert_eq!(c.category, ErrorCategory::Timeout);
        assert!(c.retriable);
    }

    #[test]
    fn classifies_rate_limit() {
        let c = classify("received 429 Too Many Requests from upstream");
        assert_eq!(c.category, ErrorCategory::RateLimit);
        assert!(c.retriable);
    }

    #[test]
    fn classifies_connection_reset_as_network() {
        let c = classify("connection reset by peer");
        assert_eq!(c.category, ErrorCategory::Network);
        assert!(c.retriable);
    }

    #[test]
    fn unknown_error_defaults_retriable() {
        let c = classify("something went sideways");
        assert_eq!(c.category, ErrorCategory::Unknown);
        assert!(c.retriable);
    }

    #[test]
    fn give_up_when_attempts_exhausted() {
        let classification = classify("connection reset");
        let decision = decide_retry(classification, 4, 3, 2, Duration::from_secs(300));
        assert_eq!(decision, RetryDecision::GiveUp);
    }

    #[test]
    fn give_up_for_non_retriable_category_regardless_of_attempt() {
        let classification = classify("401 unauthorized");
        let decision = decide_retry(classification, 1, 3, 2, Duration::from_secs(300));
        assert_eq!(decision, RetryDecision::GiveUp);
    }

    #[test]
    fn retry_backoff_is_capped() {
        let classification = classify("rate limit exceeded");
        let decision = decide_retry(classification, 5, 5, 2, Duration::from_secs(300));
        match decision {
            RetryDecision::Retry(delay) => assert!(delay <= Duration::from_secs(300)),
            RetryDecision::GiveUp => panic!("expected retry"),
        }
    }

    #[test]
    fn retry_backoff_grows_with_attempt() {
        let classification = classify("connection reset");
        let RetryDecision::Retry(first) =
            decide_retry(classification, 1, 5, 2, Duration::from_secs(300))
        else {
            panic!("expected retry");
        };
        let RetryDecision::Retry(third) =
            decide_retry(classification, 3, 5, 2, Duration::from_secs(300))
        else {
            panic!("expected retry");
        };
        // Jitter is +/-25%, so compare against the lower bound of the first
        // interval's jitter range to avoid flakiness.
        assert!(third.as_secs_f64() > first.as_secs_f64() * 0.75);
    }
}
