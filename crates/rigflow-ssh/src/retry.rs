//! Bounded retry and unbounded polling
//!
//! Two loops that look alike but must not be confused:
//!
//! - [`RetryPolicy::perform`] gives up after `max_attempts` and hands back the
//!   last error.
//! - [`poll_until`] never gives up. It is meant for waiting on an external
//!   condition where stalling is preferable to reporting a false success.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// How a failed attempt should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Fatal,
}

impl ErrorClass {
    pub fn from_retryable(retryable: bool) -> Self {
        if retryable {
            ErrorClass::Retryable
        } else {
            ErrorClass::Fatal
        }
    }
}

/// Retry with a fixed delay between attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Delay between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `action` until it succeeds, fails fatally, or attempts run out
    ///
    /// `action` receives the 1-based attempt number. Errors are returned
    /// unchanged.
    pub async fn perform<T, E, F, Fut, C>(&self, classify: C, mut action: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> ErrorClass,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match action(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if classify(&err) == ErrorClass::Fatal || attempt >= self.max_attempts {
                        return Err(err);
                    }
                    tracing::debug!(
                        "attempt {}/{} failed, retrying in {:?}: {}",
                        attempt,
                        self.max_attempts,
                        self.delay,
                        err
                    );
                    sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Re-run `check` every `interval` until it reports `true`
///
/// There is no attempt cap. An `Err` from `check` ends the loop. Returns the
/// number of checks performed.
pub async fn poll_until<E, F, Fut>(interval: Duration, mut check: F) -> Result<u32, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let mut polls = 0;
    loop {
        polls += 1;
        if check().await? {
            return Ok(polls);
        }
        sleep(interval).await;
    }
}
