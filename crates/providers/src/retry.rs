//! Provider retry: per-attempt timeouts with bounded exponential backoff.
//!
//! Transient failures (timeouts, rate limits, network errors, 5xx) are
//! retried up to `max_attempts` total attempts. Anything else is returned
//! immediately.

use repolens_core::error::ProviderError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy for provider calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier applied to each subsequent delay
    pub backoff_factor: f64,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(8),
        }
    }
}

impl From<&repolens_config::RetryConfig> for RetryPolicy {
    fn from(config: &repolens_config::RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            backoff_factor: config.backoff_factor,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-indexed).
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = self.backoff_factor.max(1.0).powi(retry as i32 - 1);
        let millis = (self.base_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Delay honoring a provider's `retry_after` hint, still capped by `max_delay`.
    fn delay_after(&self, retry: u32, error: &ProviderError) -> Duration {
        let backoff = self.delay_for(retry);
        match error {
            ProviderError::RateLimited { retry_after_secs } => backoff
                .max(Duration::from_secs(*retry_after_secs))
                .min(self.max_delay),
            _ => backoff,
        }
    }
}

/// Run `op` with a per-attempt `timeout`, retrying transient failures.
///
/// `label` identifies the call in logs (usually the provider name).
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    label: &str,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        debug!(provider = %label, attempt, max_attempts, "Calling provider");

        let error = match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => ProviderError::Timeout(format!(
                "Provider '{}' did not respond within {}s",
                label,
                timeout.as_secs()
            )),
        };

        if !error.is_transient() {
            warn!(provider = %label, error = %error, "Provider call failed (not retryable)");
            return Err(error);
        }

        if attempt >= max_attempts {
            warn!(provider = %label, attempts = attempt, error = %error, "Provider call failed, retries exhausted");
            return Err(error);
        }

        let delay = policy.delay_after(attempt, &error);
        warn!(
            provider = %label,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient provider error, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(1000),
        }
    }

    #[test]
    fn delays_grow_and_cap() {
        let policy = fast_policy(5);
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(10), Duration::from_millis(1000));
    }

    #[test]
    fn rate_limit_hint_is_capped() {
        let policy = fast_policy(3);
        let err = ProviderError::RateLimited { retry_after_secs: 60 };
        assert_eq!(policy.delay_after(1, &err), Duration::from_millis(1000));
    }

    #[test]
    fn policy_from_config() {
        let config = repolens_config::RetryConfig::default();
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = call_with_retry(&fast_policy(3), Duration::from_secs(5), "mock", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(ProviderError::ApiError {
                        status_code: 503,
                        message: "unavailable".into(),
                    })
                } else {
                    Ok("answer")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "answer");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            call_with_retry(&fast_policy(3), Duration::from_secs(5), "mock", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::Network("connection reset".into())) }
            })
            .await;

        assert!(matches!(result, Err(ProviderError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            call_with_retry(&fast_policy(5), Duration::from_secs(5), "mock", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::AuthenticationFailed("bad key".into())) }
            })
            .await;

        assert!(matches!(result, Err(ProviderError::AuthenticationFailed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out() {
        let result: Result<(), _> =
            call_with_retry(&RetryPolicy::no_retry(), Duration::from_secs(1), "slow", || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ProviderError::Timeout(_))));
    }
}
