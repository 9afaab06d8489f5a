//! Bounded retry with exponential backoff for transient failures.

use std::time::Duration;

use crate::error::{Error, Result};

/// Statuses worth retrying: rate limiting and server-side failures.
pub const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

const MAX_DELAY: Duration = Duration::from_secs(60);

/// Returns `true` if `status` is in [`TRANSIENT_STATUSES`].
#[must_use]
pub fn is_transient_status(status: u16) -> bool {
    TRANSIENT_STATUSES.contains(&status)
}

/// Returns `true` if retrying `err` may succeed.
#[must_use]
pub fn is_retryable(err: &Error) -> bool {
    match err {
        Error::Transient { .. } => true,
        Error::Http(e) => e.is_timeout() || e.is_connect(),
        _ => false,
    }
}

/// Retry policy: up to `max_retries` extra attempts, sleeping
/// `backoff_factor * 2^(n-1)` seconds before retry `n` (capped at 60s).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Base delay in seconds.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_factor: 0.6,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(max_retries: u32, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            backoff_factor,
        }
    }

    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(30);
        let secs = self.backoff_factor.max(0.0) * f64::from(1u32 << exponent);
        Duration::try_from_secs_f64(secs).map_or(MAX_DELAY, |d| d.min(MAX_DELAY))
    }

    /// Runs `op`, retrying retryable errors with real sleeps.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, or the last retryable one once
    /// the budget is spent (transient statuses carry the attempt count).
    pub fn run<T>(&self, op: impl FnMut() -> Result<T>) -> Result<T> {
        self.run_with_sleep(op, std::thread::sleep)
    }

    /// Same as [`run`](Self::run) with an injectable sleep.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub fn run_with_sleep<T>(
        &self,
        mut op: impl FnMut() -> Result<T>,
        mut sleep: impl FnMut(Duration),
    ) -> Result<T> {
        let mut retry = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if is_retryable(&err) && retry < self.max_retries => {
                    retry += 1;
                    let delay = self.delay(retry);
                    log::debug!(
                        "Transient failure ({err}), retry {retry}/{} in {delay:?}",
                        self.max_retries
                    );
                    sleep(delay);
                }
                Err(Error::Transient { status, .. }) => {
                    return Err(Error::Transient {
                        status,
                        attempts: retry + 1,
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn delays_grow_exponentially_and_cap() {
        let policy = RetryPolicy::new(5, 0.5);
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_secs(1));
        assert_eq!(policy.delay(3), Duration::from_secs(2));
        assert_eq!(policy.delay(20), Duration::from_secs(60));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let mut slept = Vec::new();
        let result = RetryPolicy::new(3, 1.0).run_with_sleep(
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(Error::Transient { status: 503, attempts: 1 })
                } else {
                    Ok("ok")
                }
            },
            |d| slept.push(d),
        );
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.get(), 3);
        assert_eq!(slept, vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[test]
    fn exhaustion_reports_attempts() {
        let result: Result<()> = RetryPolicy::new(2, 0.0)
            .run_with_sleep(|| Err(Error::Transient { status: 429, attempts: 1 }), |_| {});
        match result {
            Err(Error::Transient { status, attempts }) => {
                assert_eq!(status, 429);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_response_is_not_retried() {
        let calls = Cell::new(0);
        let result: Result<()> = RetryPolicy::default().run_with_sleep(
            || {
                calls.set(calls.get() + 1);
                Err(Error::malformed(200, "text/html", "<html>"))
            },
            |_| panic!("must not sleep"),
        );
        assert!(matches!(result, Err(Error::MalformedResponse { .. })));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn transient_status_set() {
        for status in [429, 500, 502, 503, 504] {
            assert!(is_transient_status(status));
        }
        assert!(!is_transient_status(404));
        assert!(!is_transient_status(200));
    }
}
