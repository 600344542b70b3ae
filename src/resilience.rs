//! Resilience helpers for processor functions
//!
//! Provides the non-blocking delay primitive used for batch pacing, an
//! exponential-backoff retry helper and a timeout wrapper. The scheduler never
//! retries or times out on its own; callers wrap their processor with these.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{BatchError, Result};

/// Suspend the current task for `duration` without blocking other tasks.
///
/// A zero duration only yields to the scheduler once.
pub async fn delay(duration: Duration) {
    if duration.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(duration).await;
    }
}

/// Retry configuration with exponential backoff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,

    /// Wait before the second attempt; doubled for every later attempt
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,

    /// Add a random extra wait in `[0, base_delay)` on top of the backoff
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Create a validated policy
    pub fn new(max_attempts: u32, base_delay: Duration) -> Result<Self> {
        let policy = Self {
            max_attempts,
            base_delay,
            jitter: false,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Reject policies that could never run the operation
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(BatchError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Wait after failed attempt number `attempt` (1-based): `base_delay * 2^(attempt-1)`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        let backoff = self.base_delay.saturating_mul(factor);

        if self.jitter {
            let base_ms = self.base_delay.as_millis() as u64;
            if base_ms > 0 {
                let extra = rand::thread_rng().gen_range(0..base_ms);
                return backoff.saturating_add(Duration::from_millis(extra));
            }
        }

        backoff
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` attempts have failed.
///
/// Success returns immediately. After a failed attempt `n` that is not the
/// last, waits [`RetryPolicy::backoff_for`]`(n)` before trying again. The
/// failure of the last attempt is returned unchanged. A policy with zero
/// attempts is treated as a single attempt.
pub async fn retry<F, Fut, T, E>(
    mut operation: F,
    policy: &RetryPolicy,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if attempt >= max_attempts => {
                warn!(
                    attempts = attempt,
                    error = %err,
                    "Operation failed after all attempts"
                );
                return Err(err);
            }
            Err(err) => {
                let wait = policy.backoff_for(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    backoff_ms = wait.as_millis() as u64,
                    error = %err,
                    "Operation failed, retrying"
                );
                delay(wait).await;
                attempt += 1;
            }
        }
    }
}

/// [`retry`] with an ad-hoc attempt count and base delay
pub async fn retry_with<F, Fut, T, E>(
    operation: F,
    max_attempts: u32,
    base_delay: Duration,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let policy = RetryPolicy {
        max_attempts,
        base_delay,
        jitter: false,
    };
    retry(operation, &policy).await
}

/// Fail with [`BatchError::Timeout`] if `future` does not finish within `duration`.
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| BatchError::Timeout(duration))
}

pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(1000));
        assert!(!policy.jitter);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10)).unwrap();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(10));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(20));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(40));
    }

    #[test]
    fn test_backoff_with_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10))
            .unwrap()
            .with_jitter(true);
        for _ in 0..50 {
            let wait = policy.backoff_for(2);
            assert!(wait >= Duration::from_millis(20));
            assert!(wait < Duration::from_millis(30));
        }
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = RetryPolicy::new(0, Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, BatchError::Config(_)));
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result: std::result::Result<&str, String> = retry_with(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(format!("attempt {n} failed"))
                    } else {
                        Ok("done")
                    }
                }
            },
            3,
            Duration::from_millis(10),
        )
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);

        let result: std::result::Result<(), String> = retry_with(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("always".to_string()) }
            },
            3,
            Duration::from_millis(1),
        )
        .await;

        assert_eq!(result, Err("always".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result = with_timeout(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
        })
        .await;

        assert!(matches!(result, Err(BatchError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_delay_zero_returns() {
        let start = Instant::now();
        delay(Duration::ZERO).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_policy_deserializes_from_millis() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts": 5, "base_delay": 250}"#).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert!(!policy.jitter);
    }
}
