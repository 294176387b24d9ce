//! The progress and status aggregation engine.
//!
//! [`ProgressEngine`] is the only surface the presentation layer talks to.
//! It owns the session [`Store`], applies edits optimistically, and keeps the
//! store reconciled with the remote authority through the [`Scheduler`].
//!
//! # Architecture
//!
//! ```text
//! apply_progress(subtask) ──> cache.set_pending + status    (synchronous)
//!         │
//!         └─spawn─> create_progress ──> cache.settle
//!                                              │
//!                                              ▼
//!                                      scheduler.register(task)
//!                                              │ debounce window
//!                                              ▼
//!                               pass: settle_status per task, patch_task
//!                                              │
//!                                              ▼
//!                               throttled rollup refresh ──> cache.merge
//! ```
//!
//! Remote failures never roll back local state. They are logged, and the
//! next successful refresh reconciles the cache. Until its append settles, an
//! optimistic value is not replaced by a refresh.
//!
//! # Example
//!
//! ```rust,ignore
//! let backend = Arc::new(InMemoryBackend::from_fixture(fixture));
//! let engine = ProgressEngine::new(
//!     backend.clone(),
//!     backend.clone(),
//!     Arc::new(TokioClock),
//!     EngineConfig::default(),
//! );
//! engine.load_project(1).await?;
//! engine.ensure_subtasks_loaded(10).await?;
//! engine.apply_progress(EntityRef::subtask(101), 60, "formwork done")?;
//! engine.flush().await;
//! ```

use crate::cache::Sequence;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::fetch::{FetchCoordinator, LoadOutcome};
use crate::inference::settle_status;
use crate::model::{
    current_percent, EntityKind, EntityRef, ProgressRecord, ProjectId, Status, SubtaskId, TaskId,
};
use crate::remote::{ops, NewProgress, ProgressService, TaskPatch, TaskService};
use crate::scheduler::{PassHandler, Scheduler};
use crate::store::{EngineSnapshot, LoadState, Store};
use futures::FutureExt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of a rollup refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The authority answered and its values were merged.
    Applied {
        /// Entities whose cached value was replaced.
        updated: usize,
        /// Entities skipped because a newer value was already cached.
        discarded: usize,
    },
    /// The throttle dropped the request; cached values stay in use.
    Dropped,
}

/// Session engine. Construct with [`ProgressEngine::new`].
pub struct ProgressEngine {
    progress: Arc<dyn ProgressService>,
    tasks: Arc<dyn TaskService>,
    config: EngineConfig,
    store: Mutex<Store>,
    scheduler: Scheduler,
    fetcher: FetchCoordinator,
    /// Remote appends started by `apply_progress` and not yet awaited.
    in_flight: Mutex<Vec<JoinHandle<()>>>,
    me: Weak<ProgressEngine>,
}

impl ProgressEngine {
    /// Create an engine.
    pub fn new(
        progress: Arc<dyn ProgressService>,
        tasks: Arc<dyn TaskService>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Self>| {
            let weak = me.clone();
            let on_pass: PassHandler<TaskId> = Arc::new(move |batch: Vec<TaskId>| {
                let weak = weak.clone();
                async move {
                    if let Some(engine) = weak.upgrade() {
                        engine.run_pass(batch).await;
                    }
                }
                .boxed()
            });
            Self {
                scheduler: Scheduler::new(
                    config.debounce_window(),
                    config.throttle_window(),
                    config.inter_item_delay(),
                    Arc::clone(&clock),
                    on_pass,
                ),
                fetcher: FetchCoordinator::new(Arc::clone(&tasks), clock, config.fetch_policy()),
                progress,
                tasks,
                config,
                store: Mutex::new(Store::new()),
                in_flight: Mutex::new(Vec::new()),
                me: me.clone(),
            }
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Cached percent of a task or subtask, 0 if unknown.
    pub fn progress_of(&self, entity: EntityRef) -> u8 {
        self.lock_store().cache.get(entity)
    }

    /// Current status of a task.
    pub fn status_of(&self, task_id: TaskId) -> Option<Status> {
        self.lock_store().task(task_id).map(|t| t.status)
    }

    /// Current status of a loaded subtask.
    pub fn subtask_status(&self, subtask_id: SubtaskId) -> Option<Status> {
        self.lock_store().subtask(subtask_id).map(|s| s.status)
    }

    /// Id of the loaded project.
    pub fn project_id(&self) -> Result<ProjectId> {
        self.lock_store()
            .project()
            .map(|p| p.id)
            .ok_or(EngineError::NoProjectLoaded)
    }

    /// Project aggregate as last reported by the authority.
    pub fn project_progress(&self) -> f64 {
        self.lock_store().cache.project_progress()
    }

    /// Whether a task's subtask list was loaded or failed to load.
    pub fn load_state(&self, task_id: TaskId) -> Option<LoadState> {
        self.lock_store().load_state(task_id)
    }

    /// Read-only copy of the entity lists and cached progress.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.lock_store().snapshot()
    }

    /// Tasks waiting for the next recomputation pass.
    pub fn pending_tasks(&self) -> Vec<TaskId> {
        self.scheduler.pending()
    }

    /// Recomputation passes run so far.
    pub fn passes(&self) -> u64 {
        self.scheduler.passes()
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Replace the project and its task list from the task service, then
    /// request a rollup refresh.
    pub async fn load_project(&self, project_id: ProjectId) -> Result<()> {
        let snapshot = self.tasks.get_project(project_id).await?;
        info!(
            "Loaded project {} '{}' with {} task(s)",
            project_id,
            snapshot.project.name,
            snapshot.tasks.len()
        );
        {
            let mut store = self.lock_store();
            let sequence = store.cache.issue_sequence();
            store
                .cache
                .set_project_progress(snapshot.project.progress, sequence);
            store.replace_project(snapshot);
        }
        self.request_rollup_refresh(project_id).await;
        Ok(())
    }

    /// Load a task's subtasks unless a non-empty list is already cached.
    ///
    /// When every attempt fails an empty list is cached, the load state is
    /// set to [`LoadState::Failed`], and the last error is returned.
    pub async fn ensure_subtasks_loaded(&self, task_id: TaskId) -> Result<LoadOutcome> {
        {
            let store = self.lock_store();
            if store.task(task_id).is_none() {
                return Err(EngineError::UnknownTask { task_id });
            }
            if store.has_loaded_subtasks(task_id) {
                return Ok(LoadOutcome::AlreadyLoaded);
            }
        }

        match self.fetcher.fetch_subtasks(task_id).await {
            Ok(subtasks) => {
                let count = subtasks.len();
                debug!("Loaded {} subtask(s) for task {}", count, task_id);
                self.lock_store()
                    .set_subtasks(task_id, subtasks, LoadState::Loaded);
                Ok(LoadOutcome::Loaded(count))
            }
            Err(e) => {
                warn!(
                    "Giving up on subtasks for task {}: {}; showing none",
                    task_id, e
                );
                self.lock_store()
                    .set_subtasks(task_id, Vec::new(), LoadState::Failed);
                Err(e)
            }
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Record progress for a task or subtask.
    ///
    /// The cache (and, for a subtask, its status) is updated before this
    /// returns. Appending the record remotely and registering the owning task
    /// for recomputation happen in the background, so this must be called
    /// from within a tokio runtime. Returns the stored, clamped percent.
    pub fn apply_progress(
        &self,
        entity: EntityRef,
        percent: i64,
        note: impl Into<String>,
    ) -> Result<u8> {
        let (stored, written, owner) = {
            let mut store = self.lock_store();
            match entity.kind {
                EntityKind::Task => {
                    if store.task(entity.id).is_none() {
                        return Err(EngineError::UnknownTask { task_id: entity.id });
                    }
                    let (stored, written) = store.cache.set_pending(entity, percent);
                    (stored, written, None)
                }
                EntityKind::Subtask => {
                    let task_id = store
                        .owner_of(entity.id)
                        .ok_or(EngineError::UnknownSubtask {
                            subtask_id: entity.id,
                        })?;
                    let (stored, written) = store.cache.set_pending(entity, percent);
                    store.set_subtask_status(entity.id, Status::from_percent(stored));
                    (stored, written, Some(task_id))
                }
            }
        };
        debug!("Optimistic progress {} = {}%", entity, stored);

        let body = NewProgress::new(entity, stored, note);
        if let Some(engine) = self.me.upgrade() {
            let handle = tokio::spawn(async move {
                engine.persist_progress(entity, written, body, owner).await
            });
            let mut in_flight = self.lock_in_flight();
            in_flight.retain(|h| !h.is_finished());
            in_flight.push(handle);
        }
        Ok(stored)
    }

    /// Set a task's status explicitly.
    ///
    /// Applied locally first, then persisted. A task with loaded subtasks is
    /// registered again so the derived status is reasserted on the next pass.
    pub async fn set_task_status(&self, task_id: TaskId, status: Status) -> Result<()> {
        let derived = {
            let mut store = self.lock_store();
            let task = store
                .task_mut(task_id)
                .ok_or(EngineError::UnknownTask { task_id })?;
            task.status = status;
            store.has_loaded_subtasks(task_id)
        };
        info!("Task {} set to {} by user", task_id, status);

        let result = self
            .tasks
            .patch_task(TaskPatch::status(task_id, status))
            .await
            .and_then(|r| r.into_ack(ops::PATCH_TASK));
        if derived {
            self.scheduler.register(task_id);
        }
        if let Err(e) = &result {
            warn!("Persisting status of task {} failed: {}", task_id, e);
        }
        result
    }

    /// Run any pending recomputation now.
    ///
    /// Waits for background progress appends first so their registrations
    /// land in this pass.
    pub async fn flush(&self) {
        let handles = std::mem::take(&mut *self.lock_in_flight());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Progress append task aborted: {}", e);
            }
        }
        self.scheduler.flush().await;
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Refresh the cached rollup of a project from the authority.
    ///
    /// Subject to the per-project throttle. Values older than what is already
    /// cached are discarded individually.
    pub async fn refresh_rollup(&self, project_id: ProjectId) -> Result<RefreshOutcome> {
        let response = self
            .scheduler
            .throttled(project_id, || async {
                let sequence = self.lock_store().cache.issue_sequence();
                let detail = self
                    .progress
                    .get_detailed_project_progress(project_id)
                    .await;
                (sequence, detail)
            })
            .await;
        let Some((sequence, detail)) = response else {
            return Ok(RefreshOutcome::Dropped);
        };
        let detail = detail?;

        let mut store = self.lock_store();
        let merged = store.cache.merge(detail.entity_values(), sequence);
        store
            .cache
            .set_project_progress(detail.project_progress, sequence);
        debug!(
            "Rollup for project {}: {:.1}% ({} updated, {} stale)",
            project_id,
            detail.project_progress,
            merged.applied,
            merged.discarded.len()
        );
        Ok(RefreshOutcome::Applied {
            updated: merged.applied,
            discarded: merged.discarded.len(),
        })
    }

    /// [`refresh_rollup`](Self::refresh_rollup) with failures logged instead
    /// of returned.
    pub async fn request_rollup_refresh(&self, project_id: ProjectId) -> Option<RefreshOutcome> {
        match self.refresh_rollup(project_id).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(
                    "Rollup refresh for project {} failed: {}; keeping cached values",
                    project_id, e
                );
                None
            }
        }
    }

    /// Refresh the rollup now, ignoring any open throttle window.
    ///
    /// For explicit user-triggered reloads; the scheduler never calls this.
    pub async fn force_rollup_refresh(&self, project_id: ProjectId) -> Result<RefreshOutcome> {
        self.scheduler.reset_throttle(project_id);
        self.refresh_rollup(project_id).await
    }

    /// Re-read one entity's current progress from its record list.
    ///
    /// Returns [`EngineError::Stale`] if a newer value landed while the
    /// request was in flight.
    pub async fn refresh_entity_progress(&self, entity: EntityRef) -> Result<u8> {
        let sequence = self.lock_store().cache.issue_sequence();
        let records = self.fetch_records(entity).await?;
        let percent = current_percent(&records);
        self.lock_store()
            .cache
            .apply(entity, i64::from(percent), sequence)?;
        Ok(percent)
    }

    /// Every progress record of an entity, newest first.
    pub async fn progress_history(&self, entity: EntityRef) -> Result<Vec<ProgressRecord>> {
        self.fetch_records(entity).await
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn fetch_records(&self, entity: EntityRef) -> Result<Vec<ProgressRecord>> {
        match entity.kind {
            EntityKind::Task => self.progress.get_task_progress(entity.id).await,
            EntityKind::Subtask => self.progress.get_subtask_progress(entity.id).await,
        }
    }

    async fn persist_progress(
        &self,
        entity: EntityRef,
        written: Sequence,
        body: NewProgress,
        owner: Option<TaskId>,
    ) {
        let result = self
            .progress
            .create_progress(body)
            .await
            .and_then(|r| r.into_value(ops::CREATE_PROGRESS));
        let recorded = match result {
            Ok(record) => {
                debug!("Appended progress record {} for {}", record.id, record.owner);
                Some(record.percent)
            }
            Err(e) => {
                warn!(
                    "Appending progress for {} failed: {}; keeping local value",
                    entity, e
                );
                None
            }
        };
        self.lock_store().cache.settle(entity, written, recorded);
        if let Some(task_id) = owner {
            self.scheduler.register(task_id);
        }
    }

    /// One debounce pass: recompute each task in turn, then refresh the
    /// rollup of every project touched.
    async fn run_pass(&self, batch: Vec<TaskId>) {
        let mut projects: Vec<ProjectId> = Vec::new();
        for (i, task_id) in batch.into_iter().enumerate() {
            if i > 0 {
                self.scheduler.pace().await;
            }
            match self.recompute_task(task_id).await {
                Ok(project_id) => {
                    if !projects.contains(&project_id) {
                        projects.push(project_id);
                    }
                }
                Err(e) => warn!("Skipping task {} in recomputation: {}", task_id, e),
            }
        }
        for project_id in projects {
            self.request_rollup_refresh(project_id).await;
        }
    }

    /// Settle a task's status against its subtasks and persist any change.
    async fn recompute_task(&self, task_id: TaskId) -> Result<ProjectId> {
        let (project_id, before, after) = {
            let mut store = self.lock_store();
            let signals = store.signals(task_id);
            let task = store
                .task_mut(task_id)
                .ok_or(EngineError::UnknownTask { task_id })?;
            let before = task.status;
            let after = if signals.is_empty() {
                before
            } else {
                settle_status(before, &signals)
            };
            task.status = after;
            (task.project_id, before, after)
        };

        if before == after {
            debug!("Task {} stays {}", task_id, before);
            return Ok(project_id);
        }
        info!("Task {} status {} -> {}", task_id, before, after);
        let persisted = self
            .tasks
            .patch_task(TaskPatch::status(task_id, after))
            .await
            .and_then(|r| r.into_ack(ops::PATCH_TASK));
        if let Err(e) = persisted {
            warn!(
                "Persisting inferred status of task {} failed: {}; keeping local value",
                task_id, e
            );
        }
        Ok(project_id)
    }

    fn lock_store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::remote::InMemoryBackend;
    use crate::testing::depot_fixture;

    fn engine() -> (Arc<InMemoryBackend>, Arc<ProgressEngine>) {
        let backend = Arc::new(InMemoryBackend::from_fixture(depot_fixture()));
        let engine = ProgressEngine::new(
            backend.clone(),
            backend.clone(),
            Arc::new(TokioClock),
            EngineConfig::default(),
        );
        (backend, engine)
    }

    #[tokio::test]
    async fn test_fresh_engine_has_no_project() {
        let (_backend, engine) = engine();
        assert!(matches!(
            engine.project_id(),
            Err(EngineError::NoProjectLoaded)
        ));
        assert!(engine.snapshot().tasks.is_empty());
        assert_eq!(engine.status_of(10), None);
        assert_eq!(engine.progress_of(EntityRef::task(10)), 0);
    }

    #[tokio::test]
    async fn test_load_unknown_project_fails() {
        let (_backend, engine) = engine();
        let err = engine.load_project(7).await.unwrap_err();
        assert!(matches!(err, EngineError::Rejected { .. }));
        assert!(engine.project_id().is_err());
    }

    #[tokio::test]
    async fn test_apply_progress_to_unknown_task() {
        let (_backend, engine) = engine();
        engine.load_project(1).await.unwrap();
        assert!(matches!(
            engine.apply_progress(EntityRef::task(99), 10, ""),
            Err(EngineError::UnknownTask { task_id: 99 })
        ));
    }

    #[tokio::test]
    async fn test_set_status_of_unknown_task_makes_no_call() {
        let (backend, engine) = engine();
        engine.load_project(1).await.unwrap();
        assert!(engine.set_task_status(99, Status::Completed).await.is_err());
        assert_eq!(backend.calls(ops::PATCH_TASK), 0);
    }

    #[tokio::test]
    async fn test_rejected_user_status_is_returned_but_kept_locally() {
        let (backend, engine) = engine();
        engine.load_project(1).await.unwrap();
        backend.reject_next(ops::PATCH_TASK, 1);

        let err = engine
            .set_task_status(30, Status::Completed)
            .await
            .unwrap_err();
        assert!(err.is_network());
        assert_eq!(engine.status_of(30), Some(Status::Completed));
        assert_eq!(backend.task_status(30), Some(Status::InProgress));
    }

    #[tokio::test]
    async fn test_flush_without_edits_runs_no_pass() {
        let (_backend, engine) = engine();
        engine.load_project(1).await.unwrap();
        engine.flush().await;
        assert_eq!(engine.passes(), 0);
        assert!(engine.pending_tasks().is_empty());
    }
}
