//! Retry manager with exponential backoff
//!
//! Bounded retry: `max_attempts` counts every try, the first one included,
//! so the number of calls never exceeds the configured maximum. Only
//! transient errors are retried; exhaustion is reported as
//! `RetriesExhausted` carrying the last error.

use crate::config::RetryConfig;
use crate::errors::{EngineError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Retry manager with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryManager {
    /// Total attempts allowed
    max_attempts: u32,

    /// Base delay in milliseconds
    base_delay_ms: u64,

    /// Maximum delay cap in milliseconds
    max_delay_ms: u64,

    /// Enable jitter
    enable_jitter: bool,
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryManager {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            enable_jitter: config.jitter,
        }
    }

    /// Create retry manager with custom settings
    pub fn with_config(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms: RetryConfig::default().max_delay_ms,
            enable_jitter: true,
        }
    }

    /// A manager that never retries
    pub fn single_attempt() -> Self {
        Self::with_config(1, 0)
    }

    /// Execute operation, retrying transient errors
    ///
    /// The operation receives the 1-based attempt number.
    pub async fn execute_with_retry<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_retry_if(EngineError::is_transient, operation)
            .await
    }

    /// Execute operation, retrying errors accepted by `retryable`
    pub async fn execute_with_retry_if<F, Fut, T, P>(
        &self,
        retryable: P,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&EngineError) -> bool,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation(attempt).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !retryable(&e) {
                        return Err(e);
                    }

                    if attempt >= self.max_attempts {
                        if self.max_attempts == 1 {
                            return Err(e);
                        }
                        return Err(EngineError::RetriesExhausted {
                            attempts: attempt,
                            last_error: Box::new(e),
                        });
                    }

                    let delay = self.calculate_delay(attempt - 1);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                    sleep(delay).await;
                }
            }
        }
    }

    /// Calculate delay before retry number `retry` (0-based)
    fn calculate_delay(&self, retry: u32) -> Duration {
        // Binary exponential backoff: 2^retry
        let exponential_delay = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(retry));

        let delay_ms = exponential_delay.min(self.max_delay_ms);

        // ±25% random variation
        let final_delay = if self.enable_jitter {
            let jitter = (delay_ms / 4) as i64;
            let random_jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter as f64;
            ((delay_ms as i64) + random_jitter as i64).max(0) as u64
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay)
    }

    /// Upper bound on time spent sleeping between attempts
    pub fn max_total_wait_time(&self) -> Duration {
        let total_ms: u64 = (0..self.max_attempts.saturating_sub(1))
            .map(|retry| {
                self.base_delay_ms
                    .saturating_mul(2u64.saturating_pow(retry))
                    .min(self.max_delay_ms)
            })
            .sum();

        Duration::from_millis(total_ms)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn no_jitter(max_attempts: u32) -> RetryManager {
        RetryManager {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 10,
            enable_jitter: false,
        }
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let retry_manager = no_jitter(3);

        let attempt_count = Arc::new(Mutex::new(0));
        let count_clone = attempt_count.clone();

        let result = retry_manager
            .execute_with_retry(move |_| {
                let count = count_clone.clone();
                async move {
                    *count.lock().unwrap() += 1;
                    Ok::<i32, EngineError>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(*attempt_count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let retry_manager = no_jitter(3);

        let result = retry_manager
            .execute_with_retry(|attempt| async move {
                if attempt < 3 {
                    Err(EngineError::Backend("transient".to_string()))
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_attempts_never_exceed_maximum() {
        let retry_manager = no_jitter(4);

        let attempt_count = Arc::new(Mutex::new(0));
        let count_clone = attempt_count.clone();

        let result = retry_manager
            .execute_with_retry(move |_| {
                let count = count_clone.clone();
                async move {
                    *count.lock().unwrap() += 1;
                    Err::<i32, _>(EngineError::ToolTimeout {
                        tool: "t".to_string(),
                        duration_ms: 1,
                    })
                }
            })
            .await;

        match result {
            Err(EngineError::RetriesExhausted {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last_error, EngineError::ToolTimeout { .. }));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(*attempt_count.lock().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_error() {
        let retry_manager = no_jitter(5);

        let attempt_count = Arc::new(Mutex::new(0));
        let count_clone = attempt_count.clone();

        let result = retry_manager
            .execute_with_retry(move |_| {
                let count = count_clone.clone();
                async move {
                    *count.lock().unwrap() += 1;
                    Err::<i32, _>(EngineError::Validation("permanent".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert_eq!(*attempt_count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_custom_predicate_blocks_retry() {
        let retry_manager = no_jitter(5);
        let result = retry_manager
            .execute_with_retry_if(
                |_| false,
                |_| async { Err::<(), _>(EngineError::Backend("down".to_string())) },
            )
            .await;
        assert!(matches!(result, Err(EngineError::Backend(_))));
    }

    #[test]
    fn test_calculate_delay() {
        let retry_manager = RetryManager {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 1600,
            enable_jitter: false,
        };

        assert_eq!(retry_manager.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(retry_manager.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(retry_manager.calculate_delay(3), Duration::from_millis(800));
        assert_eq!(retry_manager.calculate_delay(10), Duration::from_millis(1600));
    }

    #[test]
    fn test_max_total_wait_time() {
        let retry_manager = RetryManager {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            enable_jitter: true,
        };
        assert_eq!(
            retry_manager.max_total_wait_time(),
            Duration::from_millis(300)
        );
    }
}
