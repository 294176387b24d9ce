//! Per-key throttle with drop semantics.
//!
//! A request for a key is admitted when nothing is in flight for that key
//! and the previous request for it completed at least one window ago.
//! Anything else is dropped, not queued.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

/// Result of asking the throttle for a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Go ahead; call [`Throttle::complete`] when done.
    Admitted,
    /// A request for this key has not completed yet.
    InFlight,
    /// The key completed recently; retry after `remaining`.
    Cooling { remaining: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    in_flight: bool,
    last_completed: Option<Instant>,
}

/// Throttle state for a set of keys.
#[derive(Debug)]
pub struct Throttle<K> {
    window: Duration,
    slots: HashMap<K, Slot>,
}

impl<K: Eq + Hash + Clone> Throttle<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slots: HashMap::new(),
        }
    }

    /// Ask for a slot at `now`. Admission marks the key in flight.
    pub fn try_acquire(&mut self, key: &K, now: Instant) -> Admission {
        let slot = self.slots.entry(key.clone()).or_default();
        if slot.in_flight {
            return Admission::InFlight;
        }
        if let Some(done) = slot.last_completed {
            let elapsed = now.saturating_duration_since(done);
            if elapsed < self.window {
                return Admission::Cooling {
                    remaining: self.window - elapsed,
                };
            }
        }
        slot.in_flight = true;
        Admission::Admitted
    }

    /// Mark the admitted request for `key` as finished at `now`, whether it
    /// succeeded or not.
    pub fn complete(&mut self, key: &K, now: Instant) {
        let slot = self.slots.entry(key.clone()).or_default();
        slot.in_flight = false;
        slot.last_completed = Some(now);
    }

    /// Forget all history for `key`.
    pub fn reset(&mut self, key: &K) {
        self.slots.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(1000);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_first_request_admitted() {
        let mut t = Throttle::new(WINDOW);
        assert_eq!(t.try_acquire(&1u64, Instant::now()), Admission::Admitted);
    }

    #[test]
    fn test_request_within_window_dropped_then_reopens() {
        let mut t = Throttle::new(WINDOW);
        let t0 = Instant::now();

        assert!(t.try_acquire(&1u64, t0).is_admitted());
        t.complete(&1, t0);

        assert_eq!(
            t.try_acquire(&1, t0 + ms(200)),
            Admission::Cooling {
                remaining: ms(800)
            }
        );
        assert!(t.try_acquire(&1, t0 + ms(1200)).is_admitted());
    }

    #[test]
    fn test_window_counts_from_completion() {
        let mut t = Throttle::new(WINDOW);
        let t0 = Instant::now();

        assert!(t.try_acquire(&1u64, t0).is_admitted());
        assert_eq!(t.try_acquire(&1, t0 + ms(100)), Admission::InFlight);
        t.complete(&1, t0 + ms(500));

        assert!(!t.try_acquire(&1, t0 + ms(1200)).is_admitted());
        assert!(t.try_acquire(&1, t0 + ms(1500)).is_admitted());
    }

    #[test]
    fn test_keys_are_independent() {
        let mut t = Throttle::new(WINDOW);
        let t0 = Instant::now();
        assert!(t.try_acquire(&1u64, t0).is_admitted());
        assert!(t.try_acquire(&2u64, t0).is_admitted());
    }

    #[test]
    fn test_reset_forgets_history() {
        let mut t = Throttle::new(WINDOW);
        let t0 = Instant::now();
        assert!(t.try_acquire(&1u64, t0).is_admitted());
        t.complete(&1, t0);
        t.reset(&1);
        assert!(t.try_acquire(&1, t0 + ms(10)).is_admitted());
    }
}
