//! Bounded exponential backoff for store operations

use crate::error::{EngineError, EngineResult};
use hf_core::RetryConfig;
use hf_db::DbResult;
use std::future::Future;

/// Run `op` until it succeeds, fails permanently, or exhausts `config.max_attempts`.
///
/// Only errors with [`hf_db::DbError::is_transient`] are retried. Every store
/// operation the engine issues is either read-only or a single transaction
/// that rolls back on failure, so repeating it is safe.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &str, mut op: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    let mut attempt: u32 = 1;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    log::info!("{} succeeded on attempt {}", operation, attempt);
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() => {
                if attempt >= config.max_attempts {
                    return Err(EngineError::TransientStore {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source: e,
                    });
                }
                let delay = config.backoff_for(attempt);
                log::warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    operation,
                    attempt,
                    config.max_attempts,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hf_db::DbError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast(3), "load", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(DbError::Transient("locked".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&fast(2), "write", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(DbError::Transient("locked".to_string())) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::TransientStore { attempts: 2, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&fast(5), "write", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(DbError::ExecutionError("syntax".to_string())) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Store(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
