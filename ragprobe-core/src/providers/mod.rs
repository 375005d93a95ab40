//! Model provider implementations and the shared retry wrapper.
//!
//! Use `create_provider()` to instantiate the OpenAI-compatible provider from config.

pub mod openai_compat;

use crate::brain::CompletionProvider;
use crate::config::LlmConfig;
use crate::error::LlmError;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use crate::config::RetryPolicy;
pub use openai_compat::OpenAiCompatibleProvider;

/// Execute an async operation with bounded attempts and exponential backoff.
///
/// Every failure is retried until `policy.max_attempts` attempts have been made;
/// the last failure is then returned unchanged. Between attempt `n` and `n + 1`
/// the task sleeps `base^n + 0.05 * n` seconds.
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, label: &str, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if attempt >= max_attempts {
                    tracing::error!(
                        call = label,
                        attempt,
                        max = max_attempts,
                        error = %e,
                        "Giving up after final attempt"
                    );
                    return Err(e);
                }
                let delay = backoff_delay(policy.base, attempt);
                tracing::warn!(
                    call = label,
                    attempt,
                    max = max_attempts,
                    backoff_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after failed attempt"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Upper bound on a single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Delay slept after the given 1-indexed failed attempt, capped at [`MAX_BACKOFF`].
pub fn backoff_delay(base: f64, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = base.powi(exponent) + 0.05 * attempt as f64;
    if secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).map_or(MAX_BACKOFF, |d| d.min(MAX_BACKOFF))
}

/// Total sleep a persistently failing operation accumulates under `policy`.
pub fn total_backoff(policy: &RetryPolicy) -> Duration {
    (1..policy.max_attempts.max(1))
        .map(|attempt| backoff_delay(policy.base, attempt))
        .fold(Duration::ZERO, Duration::saturating_add)
}

/// Create the completion provider described by `config`.
///
/// Local endpoints (localhost / 127.0.0.1) do not require an API key.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn CompletionProvider>, LlmError> {
    let provider = OpenAiCompatibleProvider::new(config)?;
    Ok(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_delay_formula() {
        // 0.8^1 + 0.05
        let d = backoff_delay(0.8, 1);
        assert!((d.as_secs_f64() - 0.85).abs() < 1e-9);
        // 0.7^2 + 0.1
        let d = backoff_delay(0.7, 2);
        assert!((d.as_secs_f64() - 0.59).abs() < 1e-9);
    }

    #[test]
    fn test_total_backoff_sums_all_but_last_attempt() {
        let policy = RetryPolicy::new(3, 2.0);
        // (2 + 0.05) + (4 + 0.10)
        assert!((total_backoff(&policy).as_secs_f64() - 6.15).abs() < 1e-9);
        assert_eq!(total_backoff(&RetryPolicy::once()), Duration::ZERO);
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        assert_eq!(backoff_delay(1e10, 40), MAX_BACKOFF);
        assert_eq!(backoff_delay(f64::INFINITY, 1), MAX_BACKOFF);
        assert_eq!(backoff_delay(f64::NAN, 1), MAX_BACKOFF);
        assert_eq!(backoff_delay(2.0, u32::MAX), MAX_BACKOFF);
        let huge = RetryPolicy::new(50, 1e6);
        assert_eq!(total_backoff(&huge), MAX_BACKOFF * 49);
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_first_try() {
        let policy = RetryPolicy::new(3, 0.8);
        let result = with_retry(&policy, "test", || async { Ok::<_, LlmError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_recovers_after_transient_failures() {
        let policy = RetryPolicy::new(3, 0.5);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = with_retry(&policy, "flaky", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(LlmError::ApiRequest {
                        message: "503".into(),
                    })
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_retries_every_error_kind() {
        // Auth failures are not special-cased; the caller picks the attempt budget.
        let policy = RetryPolicy::new(2, 0.5);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = with_retry(&policy, "auth", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(LlmError::AuthFailed {
                    provider: "test".into(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(LlmError::AuthFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_exhausted_returns_last_error_after_backoff() {
        let policy = RetryPolicy::new(3, 0.8);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let started = tokio::time::Instant::now();
        let result = with_retry(&policy, "down", || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                Err::<(), _>(LlmError::ApiRequest {
                    message: format!("attempt {n}"),
                })
            }
        })
        .await;
        let elapsed = started.elapsed();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(LlmError::ApiRequest { message }) => assert_eq!(message, "attempt 3"),
            other => panic!("unexpected result {other:?}"),
        }
        let expected = total_backoff(&policy);
        assert!(elapsed >= expected);
        assert!(elapsed - expected < Duration::from_millis(50));
    }
}
