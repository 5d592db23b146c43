//! Bounded retry with increasing backoff.
//!
//! Collaborator and store errors carry a typed [`ErrorKind`]; only
//! transient kinds are retried, and only the final attempt's error is
//! surfaced to the caller.

use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

/// Classification of a failure, reported by the failing collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Worth retrying: timeouts, temporary unavailability, write conflicts.
    Transient,
    /// Not worth retrying: bad config, auth failure, malformed response.
    Permanent,
    /// Worth retrying after a longer pause.
    RateLimited,
}

impl ErrorKind {
    pub fn retryable(&self) -> bool {
        !matches!(self, ErrorKind::Permanent)
    }
}

/// Errors that know their own retry classification.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

/// Attempt bound and delay schedule for [`with_backoff`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before retrying after `attempt` (1-based) failed.
    fn delay(&self, attempt: u32, kind: ErrorKind) -> Duration {
        let factor = 1u64 << (attempt - 1).min(6);
        let mut ms = self.base_delay_ms.saturating_mul(factor);
        if kind == ErrorKind::RateLimited {
            ms = ms.saturating_mul(4);
        }
        Duration::from_millis(ms.min(self.max_delay_ms))
    }
}

/// Runs `op` up to `policy.max_attempts` times, sleeping between
/// retryable failures. Permanent errors are returned immediately.
pub fn with_backoff<T, E, F>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: Classify + std::fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) => {
                let kind = e.kind();
                if !kind.retryable() || attempt >= attempts {
                    return Err(e);
                }
                let delay = policy.delay(attempt, kind);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    what, attempt, attempts, delay, e
                );
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct TestError(ErrorKind);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test error ({:?})", self.0)
        }
    }

    impl Classify for TestError {
        fn kind(&self) -> ErrorKind {
            self.0
        }
    }

    #[test]
    fn test_succeeds_first_try() {
        let mut calls = 0;
        let result: Result<u32, TestError> =
            with_backoff(&RetryPolicy::immediate(3), "op", || {
                calls += 1;
                Ok(7)
            });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_transient_retried_until_success() {
        let mut calls = 0;
        let result: Result<u32, TestError> =
            with_backoff(&RetryPolicy::immediate(5), "op", || {
                calls += 1;
                if calls < 3 {
                    Err(TestError(ErrorKind::Transient))
                } else {
                    Ok(42)
                }
            });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_transient_exhausts_attempts() {
        let mut calls = 0;
        let result: Result<u32, TestError> =
            with_backoff(&RetryPolicy::immediate(3), "op", || {
                calls += 1;
                Err(TestError(ErrorKind::Transient))
            });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_permanent_not_retried() {
        let mut calls = 0;
        let result: Result<u32, TestError> =
            with_backoff(&RetryPolicy::immediate(5), "op", || {
                calls += 1;
                Err(TestError(ErrorKind::Permanent))
            });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_delay_schedule_increases() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
        };
        let d1 = policy.delay(1, ErrorKind::Transient);
        let d2 = policy.delay(2, ErrorKind::Transient);
        let d3 = policy.delay(3, ErrorKind::Transient);
        assert!(d1 < d2 && d2 < d3);
        // Rate limiting stretches the schedule.
        assert!(policy.delay(1, ErrorKind::RateLimited) > d1);
        // The cap holds.
        assert!(policy.delay(20, ErrorKind::Transient) <= Duration::from_millis(10_000));
    }
}
