//! Time source abstraction.
//!
//! The scheduler and the fetch coordinator never call `tokio::time`
//! directly; they go through [`Clock`] so tests can substitute a manual
//! clock or run under tokio's paused time.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Abstraction over the current time and timers.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Suspend for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by `tokio::time`.
///
/// Honors `tokio::time::pause()`, so tests running with
/// `#[tokio::test(start_paused = true)]` get deterministic virtual time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = TokioClock;
        let start = clock.now();
        clock.sleep(Duration::from_millis(750)).await;
        assert_eq!(clock.now() - start, Duration::from_millis(750));
    }
}
