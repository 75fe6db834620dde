//! Bounded retry with fixed backoff for ledger calls.

use std::future::Future;
use std::time::Duration;

use super::LedgerError;

/// Retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (at least 1)
    pub attempts: u32,
    /// Pause between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up. Returns the last error.
    pub async fn run<T, F, Fut>(&self, name: &str, op: F) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        self.run_while(name, LedgerError::is_retryable, op).await
    }

    /// Like [`run`](Self::run), retrying only errors accepted by `retryable`.
    pub async fn run_while<T, F, Fut>(
        &self,
        name: &str,
        retryable: fn(&LedgerError) -> bool,
        mut op: F,
    ) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if retryable(&e) && attempt < attempts => {
                    tracing::warn!(
                        operation = name,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Ledger call failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => {
                    tracing::warn!(operation = name, attempt, error = %e, "Ledger call failed");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_recovers_from_transient_failure() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let result = policy
            .run("balance_of", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(LedgerError::Timeout)
                } else {
                    Ok(7u128)
                }
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        let result: Result<u128, _> = policy
            .run("transfer", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::Network("connection refused".into()))
            })
            .await;
        assert_eq!(
            result,
            Err(LedgerError::Network("connection refused".into()))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_while_uses_given_predicate() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_secs(10));
        let result: Result<u128, _> = policy
            .run_while("transfer", LedgerError::is_unapplied, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::Timeout)
            })
            .await;
        assert_eq!(result, Err(LedgerError::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_secs(10));
        let result: Result<u128, _> = policy
            .run("transfer", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::Reverted("nope".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
