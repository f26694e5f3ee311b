//! Bounded retry with a fixed backoff table.

use std::future::Future;
use std::time::Duration;

/// Fixed backoff table. The number of attempts is one more than the number
/// of delays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    pub fn from_millis(delays_ms: &[u64]) -> Self {
        Self::new(delays_ms.iter().map(|ms| Duration::from_millis(*ms)).collect())
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }
}

impl Default for RetryPolicy {
    /// 1s, 3s, 5s: four attempts in total.
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(3),
            Duration::from_secs(5),
        ])
    }
}

/// Outcome of classifying a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    Retryable,
    NonRetryable,
}

/// Runs `op` until it succeeds, `classify` reports a non-retryable error, or
/// the policy's attempts are used up. The error of the last attempt is
/// returned unchanged.
///
/// Backoff sleeps happen inside this call.
///
/// # Errors
///
/// Returns the last error produced by `op`.
pub async fn with_retry<T, E, Op, Fut, C>(
    policy: &RetryPolicy,
    mut op: Op,
    classify: C,
) -> Result<T, E>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> Retryability,
    E: std::fmt::Display,
{
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if classify(&err) == Retryability::NonRetryable {
            tracing::debug!(attempt, error = %err, "Non-retryable failure");
            return Err(err);
        }
        let Some(delay) = policy.delays.get(attempt - 1).copied() else {
            tracing::warn!(attempts = attempt, error = %err, "Retries exhausted");
            return Err(err);
        };

        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
