//! Bounded retry loop shared by every polling operation in the agent.
//!
//! A worker reports one of three outcomes per attempt: `Ok(Some(value))` when
//! the work is done, `Ok(None)` when it should be tried again, or `Err(_)` to
//! abort immediately. Between attempts a sleeper decides whether to continue
//! and how long to wait.

use crate::{CbError, Result};
use std::future::Future;
use std::time::Duration;

/// Waiting schedule applied between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every attempt.
    Fixed(Duration),
    /// Delay grows by `step` after every attempt: `step`, `2 * step`, ...
    Linear(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    pub const fn linear(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Linear(step),
        }
    }

    /// Wait before the attempt following `attempt` (1-based), or `None` once
    /// the policy has run `max_attempts` attempts.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        match self.backoff {
            Backoff::Fixed(delay) => Some(delay),
            Backoff::Linear(step) => Some(step.saturating_mul(attempt)),
        }
    }

    pub async fn run<T, W, Fut>(&self, operation: &str, worker: W) -> Result<T>
    where
        W: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        retry_loop(operation, worker, |attempt| self.next_delay(attempt)).await
    }
}

pub async fn retry_loop<T, W, Fut, S>(operation: &str, mut worker: W, sleeper: S) -> Result<T>
where
    W: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
    S: Fn(u32) -> Option<Duration>,
{
    let mut attempt = 1u32;

    loop {
        if let Some(value) = worker().await? {
            return Ok(value);
        }

        let Some(delay) = sleeper(attempt) else {
            tracing::warn!("{} giving up after {} attempts", operation, attempt);
            return Err(CbError::RetriesExhausted {
                operation: operation.to_string(),
                attempts: attempt,
            });
        };

        tracing::info!(
            "{} not done after attempt {}, sleeping {:?}",
            operation,
            attempt,
            delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_linear_schedule() {
        let policy = RetryPolicy::linear(10, Duration::from_secs(10));
        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(10)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_secs(30)));
        assert_eq!(policy.next_delay(9), Some(Duration::from_secs(90)));
        assert_eq!(policy.next_delay(10), None);
    }

    #[test]
    fn test_fixed_schedule() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(10));
        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(10)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_secs(10)));
        assert_eq!(policy.next_delay(3), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_done() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let started = Instant::now();

        let value = RetryPolicy::linear(10, Duration::from_secs(10))
            .run("count to three", move || async move {
                let n = calls_ref.fetch_add(1, Ordering::SeqCst) + 1;
                Ok((n == 3).then_some(n))
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        // 10s after the first attempt, 20s after the second
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_distinct_error() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;

        let result: Result<()> = RetryPolicy::fixed(4, Duration::from_secs(10))
            .run("never done", move || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            })
            .await;

        match result {
            Err(CbError::RetriesExhausted {
                operation,
                attempts,
            }) => {
                assert_eq!(operation, "never done");
                assert_eq!(attempts, 4);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_skips_sleeper() {
        let consulted = AtomicU32::new(0);
        let consulted_ref = &consulted;

        let result: Result<()> = retry_loop(
            "fatal",
            || async { Err(CbError::Decode("bad shape".to_string())) },
            move |_| {
                consulted_ref.fetch_add(1, Ordering::SeqCst);
                Some(Duration::from_secs(1))
            },
        )
        .await;

        assert!(matches!(result, Err(CbError::Decode(_))));
        assert_eq!(consulted.load(Ordering::SeqCst), 0);
    }
}
