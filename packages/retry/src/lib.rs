#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Retry policy shared by every call to an external service.
//!
//! Geocoding lookups and generative chunk calls both go through
//! [`RetryPolicy::run`], which re-invokes an async operation until it
//! succeeds or the attempt budget runs out, sleeping between attempts.
//!
//! # Usage
//!
//! ```ignore
//! let policy = RetryPolicy::new(3, Duration::from_secs(2));
//! let text = policy.run("chunk 1/4", || provider.generate(&prompt)).await?;
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// A bounded number of attempts with a fixed pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    /// Three attempts, two seconds apart.
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is clamped to at least one.
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// A policy that calls the operation exactly once.
    #[must_use]
    pub const fn once() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    /// Total number of attempts, including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The pause after each failed attempt.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Runs `operation` until it succeeds or every attempt has failed.
    ///
    /// Each failure is logged with `label`. No delay follows the final
    /// attempt.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt if every attempt failed.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    let delay = self.delay;
                    log::warn!(
                        "{label}: attempt {attempt}/{} failed: {e}; retrying in {delay:?}",
                        self.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if self.max_attempts > 1 {
                        log::error!("{label}: giving up after {attempt} attempts: {e}");
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO)
    }

    #[tokio::test]
    async fn returns_first_success() {
        let calls = Cell::new(0);
        let result: Result<u32, String> = quick(3)
            .run("test", || {
                calls.set(calls.get() + 1);
                async { Ok(7) }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = Cell::new(0);
        let result: Result<u32, String> = quick(3)
            .run("test", || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move { if n < 3 { Err(format!("fail {n}")) } else { Ok(n) } }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn returns_last_error_when_exhausted() {
        let calls = Cell::new(0);
        let result: Result<u32, String> = quick(2)
            .run("test", || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move { Err(format!("fail {n}")) }
            })
            .await;

        assert_eq!(result, Err("fail 2".to_string()));
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn once_calls_exactly_once() {
        let calls = Cell::new(0);
        let result: Result<u32, String> = RetryPolicy::once()
            .run("test", || {
                calls.set(calls.get() + 1);
                async { Err("nope".to_string()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn zero_attempts_is_clamped() {
        assert_eq!(quick(0).max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_the_same_delay_between_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2));
        let start = tokio::time::Instant::now();
        let result: Result<u32, String> = policy
            .run("test", || async { Err("down".to_string()) })
            .await;

        assert!(result.is_err());
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }
}
