//! Retry loop for connection-level upstream failures.

use std::future::Future;
use std::time::Duration;

/// Retries after the first attempt before a request fails.
pub const MAX_RETRY: u32 = 20;

/// Pause between attempts.
pub const RETRY_TIMEOUT: Duration = Duration::from_millis(200);

/// How often and how fast a failed attempt is repeated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Fixed pause between attempts.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRY,
            interval: RETRY_TIMEOUT,
        }
    }
}

/// Last error of an exhausted or non-retryable attempt sequence.
#[derive(Debug)]
pub(crate) struct RetryFailure<E> {
    /// Retries performed before giving up.
    pub(crate) retries: u32,
    pub(crate) error: E,
}

/// Run `attempt` until it succeeds, fails with a non-retryable error, or
/// the policy is exhausted.
pub(crate) async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    mut attempt: F,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut retries = 0;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(error) if retries < policy.max_retries && is_retryable(&error) => {
                retries += 1;
                tracing::debug!(retries, "Upstream unavailable, retrying");
                tokio::time::sleep(policy.interval).await;
            }
            Err(error) => return Err(RetryFailure { retries, error }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    enum Failure {
        Refused,
        Status500,
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_is_retried_until_ceiling() {
        let calls = Cell::new(0);
        let start = Instant::now();

        let result: Result<(), _> = retry(
            RetryPolicy::default(),
            |e: &Failure| *e == Failure::Refused,
            || {
                calls.set(calls.get() + 1);
                async { Err(Failure::Refused) }
            },
        )
        .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.retries, MAX_RETRY);
        assert_eq!(calls.get(), MAX_RETRY + 1);
        let elapsed = start.elapsed();
        assert!(elapsed >= RETRY_TIMEOUT * MAX_RETRY);
        assert!(elapsed < RETRY_TIMEOUT * (MAX_RETRY + 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_at_once() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry(
            RetryPolicy::default(),
            |e: &Failure| *e == Failure::Refused,
            || {
                calls.set(calls.get() + 1);
                async { Err(Failure::Status500) }
            },
        )
        .await;

        assert_eq!(result.unwrap_err().error, Failure::Status500);
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = Cell::new(0);
        let result = retry(
            RetryPolicy::default(),
            |_: &Failure| true,
            || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 4 { Err(Failure::Refused) } else { Ok(n) }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 4);
    }
}
