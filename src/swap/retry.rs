//! Bounded retry on a fixed interval.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    /// Total time after the first attempt in which new attempts may start.
    pub max_duration: Duration,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_duration: Duration) -> Self {
        Self {
            interval,
            max_duration,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Outcome of one attempt.
#[derive(Debug)]
pub enum Attempt<T, E> {
    Done(T),
    /// Try again after the interval, if the budget allows.
    Retry(String),
    /// Stop immediately.
    Abort(E),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryError<E: fmt::Display> {
    #[error("{0}")]
    Aborted(E),

    #[error("gave up after {attempts} attempts: {last_err}")]
    Exhausted { attempts: u32, last_err: String },

    #[error("retry cancelled")]
    Cancelled,
}

/// Runs `attempt` until it is done or aborts, the policy is exhausted, or
/// `cancel` fires. The first attempt starts immediately.
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T, RetryError<E>>
where
    E: fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let deadline = Instant::now() + policy.max_duration;
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        attempts += 1;
        let last_err = match attempt(attempts).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Abort(err) => return Err(RetryError::Aborted(err)),
            Attempt::Retry(err) => err,
        };
        tracing::debug!(attempt = attempts, error = %last_err, "attempt failed");

        let out_of_attempts = policy.max_attempts.is_some_and(|max| attempts >= max);
        if out_of_attempts || Instant::now() + policy.interval > deadline {
            return Err(RetryError::Exhausted { attempts, last_err });
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stops_at_max_duration() {
        let policy = RetryPolicy::new(Duration::from_secs(10), Duration::from_secs(120));
        let res: Result<(), RetryError<String>> =
            retry(policy, &CancellationToken::new(), |n| async move {
                Attempt::Retry(format!("failure {n}"))
            })
            .await;
        assert_eq!(
            res,
            Err(RetryError::Exhausted {
                attempts: 13,
                last_err: "failure 13".to_string(),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn abort_and_done_end_the_loop() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(60));
        let res: Result<u32, RetryError<&str>> =
            retry(policy, &CancellationToken::new(), |n| async move {
                if n < 3 { Attempt::Retry("not yet".into()) } else { Attempt::Done(n) }
            })
            .await;
        assert_eq!(res, Ok(3));

        let res: Result<(), RetryError<&str>> =
            retry(policy, &CancellationToken::new(), |_| async { Attempt::Abort("fatal") }).await;
        assert_eq!(res, Err(RetryError::Aborted("fatal")));
    }

    #[tokio::test(start_paused = true)]
    async fn max_attempts_and_cancel() {
        let policy =
            RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(60)).with_max_attempts(2);
        let res: Result<(), RetryError<&str>> =
            retry(policy, &CancellationToken::new(), |_| async { Attempt::Retry("x".into()) })
                .await;
        assert!(matches!(res, Err(RetryError::Exhausted { attempts: 2, .. })));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let res: Result<(), RetryError<&str>> =
            retry(policy, &cancel, |_| async { Attempt::Done(()) }).await;
        assert_eq!(res, Err(RetryError::Cancelled));
    }
}
