// Fixed-interval retry around a single fallible operation.
//
// Only transient failures (RPC, database I/O) are retried; everything else is
// returned on first occurrence. Exhaustion surfaces as RetryExhausted carrying
// the last error.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{AppResult, DistributionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_millis(5000),
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

    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(DistributionError::RetryExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last_error: e.to_string(),
                    }
                    .into());
                }
                Err(e) => {
                    warn!(
                        "{} attempt {} failed: {}. Retrying in {}ms...",
                        operation,
                        attempt,
                        e,
                        self.delay.as_millis()
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, LedgerError};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);

        let result = policy(5)
            .run("fetch", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(LedgerError::Rpc("connection reset".into()).into())
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let calls = AtomicU32::new(0);

        let result: AppResult<()> = policy(5)
            .run("submit", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::Rejected("insufficient funds".into()).into())
            })
            .await;

        assert!(matches!(result, Err(AppError::Ledger(LedgerError::Rejected(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_carries_last_error() {
        let calls = AtomicU32::new(0);

        let result: AppResult<()> = policy(3)
            .run("confirm", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::Rpc(format!("timeout #{}", n)).into())
            })
            .await;

        match result {
            Err(AppError::Distribution(DistributionError::RetryExhausted {
                operation,
                attempts,
                last_error,
            })) => {
                assert_eq!(operation, "confirm");
                assert_eq!(attempts, 3);
                assert!(last_error.contains("timeout #2"));
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_attempts_is_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
