//! Synchronization scheduler.
//!
//! Two independent policies bound how often the engine talks to the remote
//! authority:
//!
//! - [`Debouncer`]: dirty task ids are collected and processed in one pass
//!   after edits go quiet for the debounce window.
//! - [`Throttle`]: a rollup refresh for a project runs at most once per
//!   throttle window; extra requests are dropped and callers keep reading
//!   cached values.
//!
//! # Architecture
//!
//! ```text
//! register(task) ──> Debouncer ──(window quiet)──> pass handler
//!                                                    │  one task at a time,
//!                                                    │  inter-item delay
//!                                                    ▼
//!                         refresh(project) ──> Throttle ──admitted──> remote
//!                                                  └─────dropped────> cache as-is
//! ```

pub mod debounce;
pub mod throttle;

pub use debounce::{Debouncer, PassHandler};
pub use throttle::{Admission, Throttle};

use crate::clock::Clock;
use crate::model::{ProjectId, TaskId};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Debounce for dirty tasks plus a per-project throttle for rollup refreshes.
pub struct Scheduler {
    debouncer: Debouncer<TaskId>,
    throttle: Mutex<Throttle<ProjectId>>,
    clock: Arc<dyn Clock>,
    inter_item_delay: Duration,
}

impl Scheduler {
    pub fn new(
        debounce_window: Duration,
        throttle_window: Duration,
        inter_item_delay: Duration,
        clock: Arc<dyn Clock>,
        on_pass: PassHandler<TaskId>,
    ) -> Self {
        Self {
            debouncer: Debouncer::new(debounce_window, Arc::clone(&clock), on_pass),
            throttle: Mutex::new(Throttle::new(throttle_window)),
            clock,
            inter_item_delay,
        }
    }

    /// Mark a task dirty; it will be recomputed in the next pass.
    pub fn register(&self, task_id: TaskId) {
        self.debouncer.register(task_id);
    }

    /// Run the pending pass now.
    pub async fn flush(&self) {
        self.debouncer.flush().await;
    }

    /// Task ids waiting for the next pass.
    pub fn pending(&self) -> Vec<TaskId> {
        self.debouncer.pending()
    }

    /// Passes run so far.
    pub fn passes(&self) -> u64 {
        self.debouncer.passes()
    }

    /// Pause between two tasks of the same pass.
    pub async fn pace(&self) {
        if !self.inter_item_delay.is_zero() {
            self.clock.sleep(self.inter_item_delay).await;
        }
    }

    /// Run `op` for `project_id` unless the throttle drops it.
    ///
    /// Returns `None` when dropped. The window restarts when `op` finishes,
    /// regardless of its outcome, or when the returned future is cancelled
    /// before it does.
    pub async fn throttled<T, F, Fut>(&self, project_id: ProjectId, op: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let admission = self
            .lock_throttle()
            .try_acquire(&project_id, self.clock.now());
        if let Admission::Cooling { remaining } = admission {
            debug!(
                "Rollup refresh for project {} dropped ({:?} left in window)",
                project_id, remaining
            );
            return None;
        }
        if admission == Admission::InFlight {
            debug!(
                "Rollup refresh for project {} dropped (already in flight)",
                project_id
            );
            return None;
        }

        let permit = ThrottlePermit {
            scheduler: self,
            project_id,
        };
        let result = op().await;
        drop(permit);
        Some(result)
    }

    /// Forget throttle history for a project, e.g. after a full reload.
    pub fn reset_throttle(&self, project_id: ProjectId) {
        self.lock_throttle().reset(&project_id);
    }

    fn lock_throttle(&self) -> std::sync::MutexGuard<'_, Throttle<ProjectId>> {
        self.throttle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// An admitted throttle slot. Released on drop.
struct ThrottlePermit<'a> {
    scheduler: &'a Scheduler,
    project_id: ProjectId,
}

impl Drop for ThrottlePermit<'_> {
    fn drop(&mut self) {
        let now = self.scheduler.clock.now();
        self.scheduler
            .lock_throttle()
            .complete(&self.project_id, now);
    }
}
