//! Fixed-delay retry for transient gateway errors.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{ProviderError, ProviderResult};

/// Retry settings shared by all gateway clients.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
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

    /// Read `API_RETRY_COUNT` / `API_RETRY_DELAY_SECS`, with defaults.
    pub fn from_env() -> Self {
        let max_attempts = std::env::var("API_RETRY_COUNT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3);
        let delay_secs = std::env::var("API_RETRY_DELAY_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);
        Self::new(max_attempts, Duration::from_secs(delay_secs))
    }

    /// Run `call` until it succeeds or exhausts the attempt budget.
    ///
    /// Only [`ProviderError::is_retryable`] errors are retried; moderation
    /// and account errors surface immediately so callers can react to them
    /// per item instead of burning the budget.
    pub async fn run<T, F, Fut>(&self, operation: &str, call: F) -> ProviderResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation, attempt, self.max_attempts, self.delay, e
                    );
                    tokio::time::sleep(self.delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::invalid_response("retry budget exhausted")))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = fast_policy()
            .run("op", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::Api {
                        status: 503,
                        code: None,
                        message: "unavailable".to_string(),
                    })
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.ok(), Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_moderation_not_retried() {
        let calls = AtomicU32::new(0);
        let result: ProviderResult<()> = fast_policy()
            .run("op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Moderation("unsafe prompt".to_string()))
            })
            .await;
        assert!(matches!(result, Err(ProviderError::Moderation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_exhausted_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: ProviderResult<()> = fast_policy()
            .run("op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Api {
                    status: 500,
                    code: None,
                    message: "still broken".to_string(),
                })
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(ProviderError::Api { status, .. }) => assert_eq!(status, 500),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
