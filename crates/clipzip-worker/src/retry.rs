//! Retry utilities with exponential backoff.
//!
//! Used around every call to an external collaborator (object store,
//! status store, notification stream) and by the dispatcher's receive loop.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff policy for one kind of external call.
///
/// Attempt `n` (counting from 0) waits `base_delay * 2^n`, capped at
/// `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Name used in log lines
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Wait before attempt `attempt`. Saturates instead of overflowing
    /// during long outages.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Outcome of a retried call.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    Success(T),
    /// Last error seen, after `attempts` calls in total
    Failed { error: E, attempts: u32 },
}

impl<T, E> RetryResult<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryResult::Success(_))
    }

    /// Drop the attempt count.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryResult::Success(v) => Ok(v),
            RetryResult::Failed { error, .. } => Err(error),
        }
    }
}

/// Call `operation` until it succeeds or `config.max_retries` retries are
/// used up.
pub async fn retry_async<F, Fut, T, E>(config: &RetryConfig, operation: F) -> RetryResult<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_async_if(config, operation, |_| true).await
}

/// Like [`retry_async`], but an error `should_retry` rejects ends the loop
/// at once.
///
/// ```ignore
/// let bytes = retry_async_if(
///     &settings.fetch,
///     || store.get("video/test.mp4"),
///     StorageError::is_transient,
/// )
/// .await
/// .into_result()?;
/// ```
pub async fn retry_async_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation: F,
    should_retry: P,
) -> RetryResult<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let error = match operation().await {
            Ok(value) => return RetryResult::Success(value),
            Err(e) => e,
        };

        let retries_used = attempts - 1;
        if retries_used >= config.max_retries || !should_retry(&error) {
            if retries_used > 0 {
                warn!(
                    "{} failed after {} attempts: {}",
                    config.operation_name, attempts, error
                );
            }
            return RetryResult::Failed { error, attempts };
        }

        let delay = config.delay_for_attempt(attempts);
        debug!(
            "{} attempt {} failed, retrying in {:?}: {}",
            config.operation_name, attempts, delay, error
        );
        tokio::time::sleep(delay).await;
    }
}

/// Rate-limits error logging in a loop that keeps hitting the same failure.
///
/// The first `log_limit` consecutive failures are reported, then the
/// tracker goes quiet until the next success.
#[derive(Debug, Default)]
pub struct FailureTracker {
    streak: u32,
    log_limit: u32,
}

impl FailureTracker {
    pub fn new(log_limit: u32) -> Self {
        Self {
            streak: 0,
            log_limit,
        }
    }

    pub fn record_success(&mut self) {
        if self.streak > self.log_limit {
            warn!("Recovered after {} consecutive failures", self.streak);
        }
        self.streak = 0;
    }

    /// Count a failure. Returns whether the caller should log it.
    pub fn record_failure(&mut self) -> bool {
        self.streak = self.streak.saturating_add(1);
        if self.streak == self.log_limit.saturating_add(1) {
            warn!(
                "{} consecutive failures, suppressing further reports",
                self.log_limit
            );
        }
        self.streak <= self.log_limit
    }

    pub fn failure_count(&self) -> u32 {
        self.streak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retry_config_delay_calculation() {
        let config = RetryConfig::new("test").with_base_delay(Duration::from_millis(100));

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_retry_config_max_delay() {
        let config = RetryConfig::new("test")
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5));

        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(5));
        // no overflow on a long outage
        assert_eq!(config.delay_for_attempt(200), Duration::from_secs(5));
    }

    #[test]
    fn test_failure_tracker_suppression() {
        let mut tracker = FailureTracker::new(3);

        assert!(tracker.record_failure());
        assert!(tracker.record_failure());
        assert!(tracker.record_failure());

        // 4th failure triggers suppression message (returns false)
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());

        tracker.record_success();
        assert_eq!(tracker.failure_count(), 0);
        assert!(tracker.record_failure());
    }

    #[tokio::test]
    async fn test_retry_async_eventual_success() {
        let config = RetryConfig::new("test").with_base_delay(Duration::from_millis(1));
        let call_count = AtomicU32::new(0);

        let result = retry_async(&config, || {
            let count = call_count.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err("transient error")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert!(result.is_success());
        assert_eq!(result.into_result().unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_async_gives_up() {
        let config = RetryConfig::new("test")
            .with_base_delay(Duration::from_millis(1))
            .with_max_retries(2);
        let call_count = AtomicU32::new(0);

        let result = retry_async(&config, || {
            call_count.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("still down") }
        })
        .await;

        match result {
            RetryResult::Failed { error, attempts } => {
                assert_eq!(error, "still down");
                assert_eq!(attempts, 3);
            }
            RetryResult::Success(_) => panic!("expected failure"),
        }
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_async_if_skips_permanent_errors() {
        let config = RetryConfig::new("test").with_base_delay(Duration::from_millis(1));
        let call_count = AtomicU32::new(0);

        let result = retry_async_if(
            &config,
            || {
                call_count.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("not found") }
            },
            |e| *e != "not found",
        )
        .await;

        assert!(!result.is_success());
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }
}
