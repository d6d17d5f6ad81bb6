//! Bounded, fixed-interval retry

use crate::{Error, Result};
use std::time::Duration;

/// Attempt budget and pause between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Run `op` until it succeeds or the budget is spent, returning the last error
    pub fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        self.run_with_sleep(op, std::thread::sleep)
    }

    /// Like [`run`](Self::run) with an injectable sleep
    pub fn run_with_sleep<T, F, S>(&self, op: F, sleep: S) -> Result<T>
    where
        F: FnMut() -> Result<T>,
        S: FnMut(Duration),
    {
        self.run_while_with_sleep(op, |_| true, sleep)
    }

    /// Like [`run`](Self::run), but an error failing `retry_if` is returned at once
    pub fn run_while<T, F, P>(&self, op: F, retry_if: P) -> Result<T>
    where
        F: FnMut() -> Result<T>,
        P: FnMut(&Error) -> bool,
    {
        self.run_while_with_sleep(op, retry_if, std::thread::sleep)
    }

    pub fn run_while_with_sleep<T, F, P, S>(&self, mut op: F, mut retry_if: P, mut sleep: S) -> Result<T>
    where
        F: FnMut() -> Result<T>,
        P: FnMut(&Error) -> bool,
        S: FnMut(Duration),
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) if !retry_if(&e) => {
                    tracing::debug!(attempt, error = %e, "Attempt failed permanently");
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!(
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        retriable = e.is_retriable(),
                        "Attempt failed, retrying"
                    );
                    sleep(self.interval);
                    attempt += 1;
                }
            }
        }
    }
}

/// Call `op` up to `attempts` times, sleeping `interval` between failures
pub fn retry_after<T, F>(attempts: u32, op: F, interval: Duration) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    RetryPolicy::new(attempts, interval).run(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_succeeds_after_failures() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let mut calls = 0;
        let mut sleeps = Vec::new();

        let result = policy.run_with_sleep(
            || {
                calls += 1;
                if calls < 3 {
                    Err(Error::Command(format!("attempt {calls}")))
                } else {
                    Ok(calls)
                }
            },
            |d| sleeps.push(d),
        );

        assert_eq!(result.unwrap(), 3);
        assert_eq!(sleeps, vec![Duration::from_secs(1); 2]);
    }

    #[test]
    fn test_exhausted_returns_last_error() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let mut calls = 0;
        let mut sleeps = 0;

        let err = policy
            .run_with_sleep::<(), _, _>(
                || {
                    calls += 1;
                    Err(Error::Command(format!("attempt {calls}")))
                },
                |_| sleeps += 1,
            )
            .unwrap_err();

        assert_eq!(calls, 3);
        assert_eq!(sleeps, 2);
        assert_eq!(err.to_string(), "Command failed: attempt 3");
    }

    #[test]
    fn test_first_success_short_circuits() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        let mut sleeps = 0;
        let value = policy.run_with_sleep(|| Ok("up"), |_| sleeps += 1).unwrap();
        assert_eq!(value, "up");
        assert_eq!(sleeps, 0);
    }

    #[test]
    fn test_zero_attempts_runs_once() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1));
        let mut calls = 0;
        let _ = policy.run_with_sleep::<(), _, _>(
            || {
                calls += 1;
                Err(Error::NotReady("x".into()))
            },
            |_| {},
        );
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_retry_after_real_sleep() {
        let mut calls = 0;
        let value = retry_after(
            2,
            || {
                calls += 1;
                if calls == 1 {
                    Err(Error::NotReady("warming".into()))
                } else {
                    Ok(calls)
                }
            },
            Duration::from_millis(1),
        )
        .unwrap();
        assert_eq!(value, 2);
    }

    #[test]
    fn test_run_while_stops_on_permanent_error() {
        let policy = RetryPolicy::new(5, Duration::from_secs(2));
        let mut calls = 0;
        let mut sleeps = 0;

        let err = policy
            .run_while_with_sleep::<(), _, _, _>(
                || {
                    calls += 1;
                    Err(Error::Command("VBoxManage createvm: already exists".into()))
                },
                Error::is_retriable,
                |_| sleeps += 1,
            )
            .unwrap_err();

        assert_eq!(calls, 1);
        assert_eq!(sleeps, 0);
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_run_while_retries_retriable_errors() {
        let policy = RetryPolicy::new(5, Duration::from_secs(2));
        let mut calls = 0;

        let value = policy
            .run_while_with_sleep(
                || {
                    calls += 1;
                    if calls < 3 {
                        Err(Error::retriable(Error::Command("ssh: connection refused".into())))
                    } else {
                        Ok(calls)
                    }
                },
                Error::is_retriable,
                |_| {},
            )
            .unwrap();
        assert_eq!(value, 3);
    }
}
