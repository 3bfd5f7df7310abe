//! A duration parsed from a plain millisecond integer in an environment
//! variable, e.g. `FLUSH_INTERVAL_MS=5000`.
//!
//! Grounded in `hook_worker::config::EnvMsDuration`: every one of this
//! crate's `_ms`-suffixed config fields used to be a bare `u64`, converted to
//! a real `Duration` by hand at every call site. Centralizing the parse here
//! means a malformed environment variable fails at startup, in `Envconfig`'s
//! own error path, rather than silently producing a zero or garbage
//! duration downstream.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub Duration);

impl EnvMsDuration {
    pub fn as_duration(self) -> Duration {
        self.0
    }

    /// Convert to a `chrono::Duration`, for the handful of call sites (the
    /// retention sweep) that compare against `chrono::DateTime` timestamps
    /// rather than `tokio::time::Instant`. Saturates at `chrono::Duration`'s
    /// max rather than panicking, since a misconfigured multi-millennium
    /// retention window should degrade, not crash the process.
    pub fn as_chrono(self) -> chrono::Duration {
        chrono::Duration::from_std(self.0).unwrap_or(chrono::Duration::MAX)
    }
}

impl From<EnvMsDuration> for Duration {
    fn from(value: EnvMsDuration) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl fmt::Display for ParseEnvMsDurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected an integer number of milliseconds")
    }
}

impl std::error::Error for ParseEnvMsDurationError {}

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms: u64 = s.parse().map_err(|_| ParseEnvMsDurationError)?;
        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_milliseconds() {
        let parsed: EnvMsDuration = "5000".parse().unwrap();
        assert_eq!(parsed.as_duration(), Duration::from_millis(5000));
    }

    #[test]
    fn rejects_non_numeric_input() {
        assert!("5s".parse::<EnvMsDuration>().is_err());
    }
}
