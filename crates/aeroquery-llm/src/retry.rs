//! Exponential backoff for rate-limit and transient provider errors (§4.8):
//! base 1-2s, multiplier 2, capped at 60s, up to 3 attempts per call.

use crate::provider::LlmError;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY: Duration = Duration::from_millis(1500);
const MAX_DELAY: Duration = Duration::from_secs(60);

fn is_retryable(err: &LlmError) -> bool {
    matches!(err, LlmError::RateLimited { .. } | LlmError::NetworkError(_) | LlmError::StreamError(_))
}

/// Retries `f` up to `MAX_ATTEMPTS` times on a retryable error, sleeping
/// `BASE_DELAY * 2^attempt` (capped) between attempts. Non-retryable errors
/// and cancellation return immediately.
pub async fn with_backoff<F, Fut, T>(mut f: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < MAX_ATTEMPTS && is_retryable(&err) => {
                let delay = (BASE_DELAY * 2u32.pow(attempt)).min(MAX_DELAY);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying provider call");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_backoff(|| async {
            let n = calls.fetch_add(1, Ordering::Relaxed);
            if n < 1 {
                Err(LlmError::RateLimited { retry_after_ms: 10 })
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn does_not_retry_auth_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<(), LlmError> = with_backoff(|| async {
            calls.fetch_add(1, Ordering::Relaxed);
            Err(LlmError::AuthFailed("bad key".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
