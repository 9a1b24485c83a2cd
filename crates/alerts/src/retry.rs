//! Bounded retry for store operations that hit lock contention.

use crate::db::DbError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Fixed-backoff retry policy.
///
/// Only errors for which [`DbError::is_contention`] holds are retried; every
/// other error is returned on the first attempt. When attempts run out the
/// last error is surfaced wrapped in [`DbError::RetriesExhausted`].
///
/// ## Example
///
/// ```rust
/// use std::time::Duration;
/// use watchlist_alerts::RetryPolicy;
///
/// let policy = RetryPolicy::new(3, Duration::from_millis(100));
/// assert_eq!(policy.max_attempts(), 3);
/// assert!(policy.should_retry(2));
/// assert!(!policy.should_retry(3));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Create a policy. `max_attempts` counts the first try and is at least 1.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Run `op` until it succeeds, fails with a non-contention error, or the
    /// attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T, DbError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DbError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_contention() => {
                    if !self.should_retry(attempt) {
                        return Err(DbError::RetriesExhausted {
                            operation,
                            attempts: attempt,
                            source: Box::new(e),
                        });
                    }
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Store busy, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    /// Five attempts, 200ms apart.
    fn default() -> Self {
        Self::new(5, Duration::from_millis(200))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn busy() -> DbError {
        DbError::Sqlx(sqlx::Error::PoolTimedOut)
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }

    #[tokio::test]
    async fn test_retries_contention_then_succeeds() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = policy
            .run("op", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(busy())
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_error() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<(), _> = policy
            .run("op", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(busy())
            })
            .await;

        match result {
            Err(DbError::RetriesExhausted {
                operation,
                attempts,
                ..
            }) => {
                assert_eq!(operation, "op");
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_contention_not_retried() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<(), _> = policy
            .run("op", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DbError::EntryNotFound(9))
            })
            .await;

        assert!(matches!(result, Err(DbError::EntryNotFound(9))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
