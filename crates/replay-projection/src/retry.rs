//! Bounded retry around store I/O.
//!
//! Store failures are the only errors the engine recovers from. Every store
//! operation the engine issues is idempotent (reads, final-state overwrites,
//! deletes, and a position overwrite), so resubmitting one is always safe.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::StoreError;

/// How often and how patiently a store operation is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt.
    pub retries: u32,
    /// Base backoff; attempt `n` waits `n * backoff`.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub const fn none() -> Self {
        Self {
            retries: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Maximum number of attempts, including the first.
    pub const fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// A store failure that survived every retry.
#[derive(Debug)]
pub struct Exhausted {
    /// Attempts made.
    pub attempts: u32,
    /// The last failure.
    pub error: StoreError,
}

/// Run `op` until it succeeds or the policy is exhausted.
///
/// `on_retry` is invoked once per failed attempt that will be retried.
///
/// # Errors
///
/// Returns [`Exhausted`] carrying the last [`StoreError`] once
/// `policy.max_attempts()` attempts have failed.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation: &'static str,
    mut on_retry: impl FnMut(),
    mut op: F,
) -> Result<(T, u32), Exhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        match op().await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) if attempt < policy.max_attempts() => {
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts(),
                    error = %error,
                    "Store operation failed, retrying"
                );
                on_retry();
                tokio::time::sleep(policy.backoff.saturating_mul(attempt)).await;
            }
            Err(error) => {
                return Err(Exhausted {
                    attempts: attempt,
                    error,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn io_error() -> StoreError {
        StoreError::Io {
            operation: "commit",
            message: String::from("boom"),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let mut retried = 0u32;
        let policy = RetryPolicy {
            retries: 3,
            backoff: Duration::ZERO,
        };
        let result = with_retry(
            policy,
            "commit",
            || retried = retried.saturating_add(1),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err(io_error()) } else { Ok(n) } }
            },
        )
        .await;
        assert_eq!(result.ok(), Some((2, 3)));
        assert_eq!(retried, 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            retries: 2,
            backoff: Duration::ZERO,
        };
        let result: Result<((), u32), Exhausted> = with_retry(
            policy,
            "commit",
            || {},
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(io_error()) }
            },
        )
        .await;
        let exhausted = result.err();
        assert_eq!(exhausted.as_ref().map(|e| e.attempts), Some(3));
        assert_eq!(exhausted.map(|e| e.error), Some(io_error()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn none_policy_tries_once() {
        let calls = AtomicU32::new(0);
        let result: Result<((), u32), Exhausted> = with_retry(
            RetryPolicy::none(),
            "get",
            || {},
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(io_error()) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
