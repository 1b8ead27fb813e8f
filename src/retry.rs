//! Retry helper for outbound HTTP calls.
//!
//! Each attempt runs under its own timeout.  Transport errors and timeouts
//! are always retried; responses are retried only when their status is in
//! the policy's retry set.  Backoff is linear: `base`, `2 * base`,
//! `3 * base`, ...

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::HttpConfig;
use crate::metrics::record_store_retry;

/// Bounded retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = `retries + 1`).
    pub retries: u32,
    /// Linear backoff base.
    pub backoff_base: Duration,
    /// Timeout applied to each attempt.
    pub timeout: Duration,
    /// Statuses worth retrying.
    pub retry_on: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&HttpConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            retries: config.retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            timeout: Duration::from_millis(config.timeout_ms),
            retry_on: config.retry_on.clone(),
        }
    }

    /// Delay after the failed attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_base * (attempt + 1)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retry_on.contains(&status)
    }
}

/// Run `attempt_fn` until it yields a non-retryable outcome or the policy
/// is exhausted.
///
/// `status_of` extracts the status of a successful attempt; a value in the
/// retry set triggers another attempt while any remain, after which the last
/// value is returned as-is.
pub async fn run_with_retry<T, F, Fut, S>(
    policy: &RetryPolicy,
    description: &str,
    mut attempt_fn: F,
    status_of: S,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
    S: Fn(&T) -> u16,
{
    let mut attempt = 0;
    loop {
        let outcome = tokio::time::timeout(policy.timeout, attempt_fn()).await;
        let last = attempt == policy.retries;

        match outcome {
            Ok(Ok(value)) => {
                let status = status_of(&value);
                if last || !policy.is_retryable_status(status) {
                    return Ok(value);
                }
                warn!(
                    attempt = attempt + 1,
                    retries = policy.retries,
                    status,
                    description,
                    "Retryable status, retrying"
                );
                record_store_retry(description);
            }
            Ok(Err(e)) => {
                if last {
                    return Err(e);
                }
                warn!(
                    attempt = attempt + 1,
                    retries = policy.retries,
                    description,
                    error = %e,
                    "Attempt failed, retrying"
                );
                record_store_retry(description);
            }
            Err(_) => {
                if last {
                    anyhow::bail!(
                        "{}: timed out after {} ms",
                        description,
                        policy.timeout.as_millis()
                    );
                }
                warn!(
                    attempt = attempt + 1,
                    retries = policy.retries,
                    description,
                    "Attempt timed out, retrying"
                );
                record_store_retry(description);
            }
        }

        tokio::time::sleep(policy.delay_for(attempt)).await;
        attempt += 1;
    }
}

/// Send a request built fresh by `build` for every attempt.
pub async fn send_with_retry<B>(
    policy: &RetryPolicy,
    description: &str,
    build: B,
) -> anyhow::Result<reqwest::Response>
where
    B: Fn() -> anyhow::Result<reqwest::RequestBuilder>,
{
    run_with_retry(
        policy,
        description,
        || {
            let request = build();
            async move {
                let response = request?
                    .send()
                    .await
                    .map_err(|e| anyhow::anyhow!("{} request failed: {}", description, e))?;
                Ok(response)
            }
        },
        |response: &reqwest::Response| response.status().as_u16(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            backoff_base: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
            retry_on: vec![500, 503],
        }
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(400));
        assert_eq!(policy.delay_for(1), Duration::from_millis(800));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1200));
    }

    #[test]
    fn test_default_retry_set() {
        let policy = RetryPolicy::default();
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(policy.is_retryable_status(status));
        }
        assert!(!policy.is_retryable_status(404));
        assert!(!policy.is_retryable_status(200));
    }

    #[tokio::test]
    async fn test_success_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result = run_with_retry(
            &fast_policy(2),
            "ok",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(200u16) }
            },
            |s| *s,
        )
        .await
        .unwrap();
        assert_eq!(result, 200);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retryable_status_then_success() {
        let calls = AtomicU32::new(0);
        let result = run_with_retry(
            &fast_policy(2),
            "flaky",
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(if n == 0 { 503u16 } else { 200u16 }) }
            },
            |s| *s,
        )
        .await
        .unwrap();
        assert_eq!(result, 200);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_status() {
        let calls = AtomicU32::new(0);
        let result = run_with_retry(
            &fast_policy(2),
            "down",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(500u16) }
            },
            |s| *s,
        )
        .await
        .unwrap();
        assert_eq!(result, 500);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_status_not_retried() {
        let calls = AtomicU32::new(0);
        let result = run_with_retry(
            &fast_policy(2),
            "missing",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(404u16) }
            },
            |s| *s,
        )
        .await
        .unwrap();
        assert_eq!(result, 404);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_propagate_after_last_attempt() {
        let calls = AtomicU32::new(0);
        let result: anyhow::Result<u16> = run_with_retry(
            &fast_policy(1),
            "broken",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::anyhow!("connection reset")) }
            },
            |s| *s,
        )
        .await;
        assert_eq!(result.unwrap_err().to_string(), "connection reset");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        let mut policy = fast_policy(0);
        policy.timeout = Duration::from_millis(10);
        let result: anyhow::Result<u16> = run_with_retry(
            &policy,
            "slow",
            || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(200u16)
            },
            |s| *s,
        )
        .await;
        assert!(result.unwrap_err().to_string().contains("timed out"));
    }
}
