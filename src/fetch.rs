//! Lazy subtask loading for expanded tasks.
//!
//! The coordinator only talks to the task service; deciding whether a fetch
//! is needed and caching the result is the engine's job.

use crate::clock::Clock;
use crate::error::Result;
use crate::model::{Subtask, TaskId};
use crate::remote::{ops, TaskService};
use crate::retry::RetryPolicy;
use std::sync::Arc;
use tracing::debug;

/// What `ensure_subtasks_loaded` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A non-empty list was already cached; no remote call was made.
    AlreadyLoaded,
    /// The listing was fetched; carries the number of subtasks kept.
    Loaded(usize),
}

/// Fetches subtask listings with retry.
pub struct FetchCoordinator {
    service: Arc<dyn TaskService>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl FetchCoordinator {
    pub fn new(service: Arc<dyn TaskService>, clock: Arc<dyn Clock>, policy: RetryPolicy) -> Self {
        Self {
            service,
            clock,
            policy,
        }
    }

    /// Fetch the subtasks of `task_id`, filtered to that owner and ordered.
    ///
    /// Network failures and `success = false` answers are retried per the
    /// policy; the last error is returned once retries run out.
    pub async fn fetch_subtasks(&self, task_id: TaskId) -> Result<Vec<Subtask>> {
        let listed = self
            .policy
            .run(self.clock.as_ref(), ops::GET_SUBTASK, move || async move {
                self.service
                    .get_subtask(task_id)
                    .await?
                    .into_value(ops::GET_SUBTASK)
            })
            .await?;
        let total = listed.len();
        let kept = order_subtasks(task_id, listed);
        if kept.len() != total {
            debug!(
                "Dropped {} subtask(s) not owned by task {}",
                total - kept.len(),
                task_id
            );
        }
        Ok(kept)
    }
}

/// Keep only subtasks owned by `task_id` and sort them for display.
///
/// Sorted by creation time with id as tie-break when every entry carries a
/// timestamp, by id otherwise.
pub fn order_subtasks(task_id: TaskId, listed: Vec<Subtask>) -> Vec<Subtask> {
    let mut owned: Vec<Subtask> = listed.into_iter().filter(|s| s.task_id == task_id).collect();
    if owned.iter().all(|s| s.created_at.is_some()) {
        owned.sort_by_key(|s| (s.created_at, s.id));
    } else {
        owned.sort_by_key(|s| s.id);
    }
    owned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::remote::InMemoryBackend;
    use crate::retry::Backoff;
    use crate::testing::fixtures::{project, subtask, task};
    use crate::testing::ManualClock;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn backend() -> Arc<InMemoryBackend> {
        Arc::new(
            InMemoryBackend::new()
                .with_project(project(1))
                .with_task(task(10, 1))
                .with_task(task(20, 1))
                .with_subtask(subtask(102, 10))
                .with_subtask(subtask(101, 10))
                .with_subtask(subtask(201, 20)),
        )
    }

    fn coordinator(backend: &Arc<InMemoryBackend>, clock: &Arc<ManualClock>) -> FetchCoordinator {
        FetchCoordinator::new(
            Arc::clone(backend) as Arc<dyn TaskService>,
            Arc::clone(clock) as Arc<dyn Clock>,
            RetryPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_fetch_orders_by_id_without_timestamps() {
        let backend = backend();
        let clock = Arc::new(ManualClock::new());
        let subs = coordinator(&backend, &clock).fetch_subtasks(10).await.unwrap();
        let ids: Vec<_> = subs.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![101, 102]);
    }

    #[tokio::test]
    async fn test_fetch_filters_foreign_subtasks() {
        let backend = Arc::new(
            InMemoryBackend::new()
                .with_task(task(10, 1))
                .with_task(task(20, 1))
                .with_subtask(subtask(101, 10))
                .with_subtask(subtask(201, 20))
                .with_unfiltered_subtask_listing(),
        );
        let clock = Arc::new(ManualClock::new());
        let subs = coordinator(&backend, &clock).fetch_subtasks(10).await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].id, 101);
    }

    #[tokio::test]
    async fn test_fetch_retries_with_linear_backoff() {
        let backend = backend();
        let clock = Arc::new(ManualClock::new());
        backend.fail_next(ops::GET_SUBTASK, 2);

        let subs = coordinator(&backend, &clock).fetch_subtasks(10).await.unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(backend.calls(ops::GET_SUBTASK), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(500), Duration::from_millis(1000)]
        );
    }

    #[tokio::test]
    async fn test_fetch_gives_up_after_retries() {
        let backend = backend();
        let clock = Arc::new(ManualClock::new());
        backend.fail_next(ops::GET_SUBTASK, 3);

        let err = coordinator(&backend, &clock)
            .fetch_subtasks(10)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Network { .. }));
        assert_eq!(backend.calls(ops::GET_SUBTASK), 3);
    }

    #[tokio::test]
    async fn test_rejected_listing_is_retried() {
        let backend = backend();
        let clock = Arc::new(ManualClock::new());
        backend.reject_next(ops::GET_SUBTASK, 1);

        let fetcher = FetchCoordinator::new(
            Arc::clone(&backend) as Arc<dyn TaskService>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            RetryPolicy::new(1, Backoff::None),
        );
        assert_eq!(fetcher.fetch_subtasks(10).await.unwrap().len(), 2);
        assert_eq!(clock.sleeps(), vec![Duration::ZERO]);
    }

    #[test]
    fn test_order_by_creation_time_when_all_stamped() {
        let mut late = subtask(1, 10);
        late.created_at = Some(Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap());
        let mut early = subtask(2, 10);
        early.created_at = Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());

        let ordered = order_subtasks(10, vec![late.clone(), early.clone()]);
        assert_eq!(ordered, vec![early.clone(), late.clone()]);

        // one missing timestamp falls back to id order for the whole list
        let unstamped = subtask(3, 10);
        let ordered = order_subtasks(10, vec![unstamped, late, early]);
        let ids: Vec<_> = ordered.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
