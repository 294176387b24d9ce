//! Bounded retry with pluggable backoff.
//!
//! # Example
//!
//! ```rust,ignore
//! use sitetrack::retry::{Backoff, RetryPolicy};
//!
//! let policy = RetryPolicy::new(2, Backoff::linear(Duration::from_millis(500)));
//! let subtasks = policy
//!     .run(&clock, "get_subtask", || tasks.get_subtask(task_id))
//!     .await?;
//! ```

use crate::clock::Clock;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

// ============================================================================
// Backoff Constants and Calculation
// ============================================================================

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Multiplier for exponential backoff.
pub const BACKOFF_MULTIPLIER: u64 = 2;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// No delay between attempts
    None,
    /// `attempt * step`
    Linear { step_ms: u64 },
    /// `base * 2^(attempt - 1)`, capped at [`MAX_BACKOFF_MS`]
    Exponential { base_ms: u64 },
}

impl Backoff {
    pub fn linear(step: Duration) -> Self {
        Self::Linear {
            step_ms: step.as_millis() as u64,
        }
    }

    pub fn exponential(base: Duration) -> Self {
        Self::Exponential {
            base_ms: base.as_millis() as u64,
        }
    }

    /// Delay before retry number `attempt` (1-indexed).
    ///
    /// ```
    /// use sitetrack::retry::Backoff;
    /// use std::time::Duration;
    ///
    /// let linear = Backoff::linear(Duration::from_millis(500));
    /// assert_eq!(linear.delay(1), Duration::from_millis(500));
    /// assert_eq!(linear.delay(2), Duration::from_millis(1000));
    /// ```
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let ms = match *self {
            Backoff::None => 0,
            Backoff::Linear { step_ms } => step_ms.saturating_mul(u64::from(attempt)),
            Backoff::Exponential { base_ms } => {
                let exponent = attempt.saturating_sub(1);
                let multiplier = BACKOFF_MULTIPLIER.saturating_pow(exponent);
                base_ms.saturating_mul(multiplier)
            }
        };
        Duration::from_millis(ms.min(MAX_BACKOFF_MS))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Linear { step_ms: 500 }
    }
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Maximum retries plus the backoff between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self::new(0, Backoff::None)
    }

    /// Run `op` until it succeeds or retries are exhausted.
    ///
    /// Only errors classified as recoverable are retried; anything else is
    /// returned immediately. The last error is returned on exhaustion.
    pub async fn run<T, F, Fut>(&self, clock: &dyn Clock, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{} succeeded after {} retries", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if attempt < self.max_retries && e.is_recoverable() => {
                    attempt += 1;
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        operation,
                        attempt,
                        self.max_retries + 1,
                        e,
                        delay
                    );
                    clock.sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::testing::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_linear_backoff() {
        let b = Backoff::linear(Duration::from_millis(500));
        assert_eq!(b.delay(1), Duration::from_millis(500));
        assert_eq!(b.delay(2), Duration::from_millis(1000));
        assert_eq!(b.delay(3), Duration::from_millis(1500));
    }

    #[test]
    fn test_exponential_backoff_capped() {
        let b = Backoff::exponential(Duration::from_millis(2000));
        assert_eq!(b.delay(1), Duration::from_millis(2000));
        assert_eq!(b.delay(2), Duration::from_millis(4000));
        assert_eq!(b.delay(3), Duration::from_millis(8000));
        assert_eq!(b.delay(10), Duration::from_millis(MAX_BACKOFF_MS));
    }

    #[test]
    fn test_none_backoff() {
        assert_eq!(Backoff::None.delay(5), Duration::ZERO);
    }

    #[test]
    fn test_backoff_serde_shape() {
        let json = serde_json::to_string(&Backoff::Linear { step_ms: 250 }).unwrap();
        assert_eq!(json, r#"{"kind":"linear","step_ms":250}"#);
    }

    #[tokio::test]
    async fn test_run_retries_then_succeeds() {
        let clock = ManualClock::new();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result = policy
            .run(&clock, "flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(EngineError::network("flaky", "reset"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(500), Duration::from_millis(1000)]
        );
    }

    #[tokio::test]
    async fn test_run_gives_up_after_max_retries() {
        let clock = ManualClock::new();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Backoff::linear(Duration::from_millis(500)));

        let result: Result<()> = policy
            .run(&clock, "down", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::network("down", "unreachable")) }
            })
            .await;

        assert!(result.unwrap_err().is_network());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn test_run_does_not_retry_unrecoverable_errors() {
        let clock = ManualClock::new();
        let calls = AtomicU32::new(0);

        let result: Result<()> = RetryPolicy::default()
            .run(&clock, "bad input", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::validation("percent", "not a number")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().is_empty());
    }
}
