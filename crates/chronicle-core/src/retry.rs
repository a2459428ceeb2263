// ABOUTME: Retry engine executing fallible store operations with configurable backoff.
// ABOUTME: Consults the error classifier to decide retryability; guarantees a bounded attempt count.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ClassifiedError, StoreError, classify};

/// Delay growth strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `initial_delay * attempt`
    Linear,
    /// `initial_delay * 2^(attempt - 1)`
    Exponential,
}

/// Callback invoked before each retry with the failed attempt number and
/// its classified error.
pub type RetryCallback = Arc<dyn Fn(u32, &ClassifiedError) + Send + Sync>;

/// Retry behavior for one logical operation.
#[derive(Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff: Backoff,
    pub max_delay: Duration,
    pub on_retry: Option<RetryCallback>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            backoff: Backoff::Exponential,
            max_delay: Duration::from_millis(30_000),
            on_retry: None,
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("backoff", &self.backoff)
            .field("max_delay", &self.max_delay)
            .field("on_retry", &self.on_retry.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl RetryConfig {
    /// Set the maximum number of attempts (including the first).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the backoff strategy.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the delay cap.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the retry notification callback.
    pub fn with_on_retry(mut self, callback: RetryCallback) -> Self {
        self.on_retry = Some(callback);
        self
    }

    /// A config with no sleeping between attempts, for tests.
    pub fn immediate() -> Self {
        Self::default()
            .with_initial_delay(Duration::ZERO)
            .with_max_delay(Duration::ZERO)
    }
}

/// Compute the sleep before the retry following `attempt` (1-based),
/// capped at `max_delay`.
pub fn delay_for_attempt(config: &RetryConfig, attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    let raw = match config.backoff {
        Backoff::Linear => config.initial_delay.saturating_mul(attempt),
        Backoff::Exponential => {
            let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
            config.initial_delay.saturating_mul(factor)
        }
    };
    raw.min(config.max_delay)
}

/// Execute `op`, retrying transient failures according to `config`.
///
/// Each failure is classified; a non-retryable classification or reaching
/// `max_attempts` propagates the final classified error. `op` is invoked
/// at most `max_attempts` times. The engine itself mutates no state:
/// callers are responsible for the idempotency of `op` under retry (a
/// retried write whose first attempt actually landed server-side can
/// still take effect twice).
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, ClassifiedError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(raw) => {
                let classified = classify(&raw);
                if !classified.retryable || attempt >= config.max_attempts.max(1) {
                    return Err(classified);
                }

                if let Some(on_retry) = &config.on_retry {
                    on_retry(attempt, &classified);
                }

                let delay = delay_for_attempt(config, attempt);
                tracing::debug!(
                    "attempt {}/{} failed with {}, retrying in {:?}",
                    attempt,
                    config.max_attempts,
                    classified.code,
                    delay
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn linear_delay_grows_per_attempt() {
        let config = RetryConfig::default()
            .with_backoff(Backoff::Linear)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(250));

        assert_eq!(delay_for_attempt(&config, 1), Duration::from_millis(100));
        assert_eq!(delay_for_attempt(&config, 2), Duration::from_millis(200));
        // Capped
        assert_eq!(delay_for_attempt(&config, 3), Duration::from_millis(250));
    }

    #[test]
    fn exponential_delay_doubles_and_caps() {
        let config = RetryConfig::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350));

        assert_eq!(delay_for_attempt(&config, 1), Duration::from_millis(100));
        assert_eq!(delay_for_attempt(&config, 2), Duration::from_millis(200));
        assert_eq!(delay_for_attempt(&config, 3), Duration::from_millis(350));
        assert_eq!(delay_for_attempt(&config, 30), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn success_on_first_attempt_invokes_once() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryConfig::immediate(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, StoreError>(7) }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_failure_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryConfig::immediate(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::other("connection reset by peer"))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn nonretryable_failure_invokes_exactly_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&RetryConfig::immediate(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::structured(StoreCode::UniqueViolation, "dup")) }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::AlreadyExists);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stops_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::immediate().with_max_attempts(4);
        let result: Result<(), _> = with_retry(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::other("network unreachable")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn unclassifiable_failures_get_their_extra_chances() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::immediate().with_max_attempts(3);
        let result: Result<(), _> = with_retry(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::other("wat")) }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::Unknown);
        assert!(err.retryable);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn on_retry_sees_each_failed_attempt() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let config = RetryConfig::immediate()
            .with_max_attempts(3)
            .with_on_retry(Arc::new(move |attempt, err| {
                seen_cb.lock().unwrap().push((attempt, err.code));
            }));

        let _: Result<(), _> = with_retry(&config, || async {
            Err(StoreError::other("request timed out"))
        })
        .await;

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (1, crate::error::ErrorCode::Timeout),
                (2, crate::error::ErrorCode::Timeout)
            ]
        );
    }
}
