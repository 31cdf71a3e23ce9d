//! Bounded retry with randomized exponential backoff for model calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::LlmError;

/// Retry policy for a single fallible model call.
///
/// The policy holds no state between runs; every call to [`RetryPolicy::run`]
/// starts from attempt one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Lower bound of every backoff and the base of the exponential window.
    pub base_delay: Duration,
    /// Upper bound of every backoff.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Upper edge of the jitter window after the given (1-based) failed attempt.
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let window = self.base_delay.saturating_mul(1u32 << exp);
        window.clamp(self.base_delay, self.max_delay.max(self.base_delay))
    }

    /// Random delay in `[base_delay, backoff_ceiling(attempt)]`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let low = self.base_delay.as_millis() as u64;
        let high = self.backoff_ceiling(attempt).as_millis() as u64;
        if high <= low {
            return Duration::from_millis(low);
        }
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }

    /// Moderation rejections are deterministic for the same input.
    pub fn is_retryable(err: &LlmError) -> bool {
        !err.is_content_filtered() && !matches!(err, LlmError::AuthFailed { .. })
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts || !Self::is_retryable(&e) => return Err(e),
                Err(e) => {
                    let delay = self.backoff(attempt);
                    debug!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn transient() -> LlmError {
        LlmError::RequestFailed {
            provider: "mock".into(),
            reason: "503 upstream unavailable".into(),
        }
    }

    fn instant(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    #[test]
    fn default_matches_summary_budget() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 6);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_ceiling(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_ceiling(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_ceiling(5), Duration::from_secs(16));
        assert_eq!(policy.backoff_ceiling(6), Duration::from_secs(30));
        assert_eq!(policy.backoff_ceiling(40), Duration::from_secs(30));

        for attempt in 1..=8 {
            let d = policy.backoff(attempt);
            assert!(d >= policy.base_delay);
            assert!(d <= policy.backoff_ceiling(attempt));
        }
    }

    #[tokio::test]
    async fn succeeds_on_last_attempt() {
        let calls = AtomicU32::new(0);
        let result = instant(6)
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { if n < 6 { Err(transient()) } else { Ok(n) } }
            })
            .await;
        assert_eq!(result.unwrap(), 6);
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn gives_up_after_budget_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = instant(6)
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;
        assert!(matches!(result, Err(LlmError::RequestFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn content_filter_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = instant(6)
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(LlmError::RequestFailed {
                        provider: "mock".into(),
                        reason: "content_filter triggered".into(),
                    })
                }
            })
            .await;
        assert!(result.unwrap_err().is_content_filtered());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = instant(6)
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(LlmError::AuthFailed {
                        provider: "mock".into(),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(LlmError::AuthFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
