//! Retry policy for remote writes.
//!
//! Only transient failures are retried; a validation error ends the loop at
//! once.
//!
//! # Example
//!
//! ```ignore
//! let policy = RetryPolicy::exponential(5);
//! let result = retry_remote(ctx.as_ref(), &policy, "update_trip_status", || {
//!     store.update_trip_status(id, "in_progress")
//! }).await;
//! ```

use std::future::Future;
use std::time::Duration;

use tripwatch_env::{RemoteError, TripContext};

/// Default initial delay for exponential backoff (100ms).
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;

/// Default maximum delay for exponential backoff (30 seconds).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 30;

/// Default multiplier for exponential backoff.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default attempt budget for remote writes (initial + 4 retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// How a remote call handles transient failures.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    /// No retries - fail immediately on error.
    None,

    /// Exponential backoff with configurable parameters.
    ///
    /// The delay is multiplied after each failed attempt, up to a maximum delay.
    ExponentialBackoff {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Initial delay after the first failure.
        initial_delay: Duration,
        /// Maximum delay cap (delay won't exceed this).
        max_delay: Duration,
        /// Multiplier applied to delay after each failure (typically 2.0).
        multiplier: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// Exponential backoff with the default delays.
    pub fn exponential(max_attempts: u32) -> Self {
        Self::ExponentialBackoff {
            max_attempts,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    /// Maximum number of attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        match self {
            RetryPolicy::None => 1,
            RetryPolicy::ExponentialBackoff { max_attempts, .. } => (*max_attempts).max(1),
        }
    }

    /// Delay before retry number `attempt` (1 = first retry).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            RetryPolicy::None => Duration::ZERO,
            RetryPolicy::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let exponent = attempt.saturating_sub(1) as i32;
                let secs = initial_delay.as_secs_f64() * multiplier.powi(exponent);
                Duration::from_secs_f64(secs.min(max_delay.as_secs_f64()))
            }
        }
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts()
    }
}

/// Runs `op` until it succeeds, fails permanently, or the attempt budget is
/// spent. Backoff sleeps go through the context so simulation stays on the
/// virtual clock.
pub async fn retry_remote<Ctx, F, Fut, T>(
    ctx: &Ctx,
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, RemoteError>
where
    Ctx: TripContext,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match op().await {
            Ok(value) => {
                if attempts > 1 {
                    tracing::debug!(what, attempts, "Remote call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && policy.should_retry(attempts) => {
                let delay = policy.delay_for_attempt(attempts);
                tracing::debug!(what, attempts, ?delay, error = %err, "Retrying remote call");
                ctx.sleep(delay).await;
            }
            Err(err) => {
                tracing::warn!(what, attempts, error = %err, "Remote call failed");
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ManualContext;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::exponential(5);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(30));
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::exponential(4);
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));
        assert_eq!(RetryPolicy::None.max_attempts(), 1);
    }

    #[tokio::test]
    async fn test_retry_remote_recovers_from_transient() {
        let ctx = ManualContext::new();
        let calls = AtomicU32::new(0);

        let result = retry_remote(&ctx, &RetryPolicy::exponential(5), "test_op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(RemoteError::transient("reset"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 100 + 200 + 400 ms of backoff on the virtual clock
        assert_eq!(ctx.now(), Duration::from_millis(700));
    }

    #[tokio::test]
    async fn test_retry_remote_stops_on_validation() {
        let ctx = ManualContext::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_remote(&ctx, &RetryPolicy::exponential(5), "test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RemoteError::validation("bad column")) }
        })
        .await;

        assert!(matches!(result, Err(RemoteError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_remote_gives_up() {
        let ctx = ManualContext::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_remote(&ctx, &RetryPolicy::exponential(3), "test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RemoteError::Timeout(100)) }
        })
        .await;

        assert_eq!(result, Err(RemoteError::Timeout(100)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
