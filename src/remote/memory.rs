//! In-memory implementation of both remote services.
//!
//! Acts as a self-contained authority: it stores entities and progress
//! records, computes the project rollup, applies the server-side
//! progress→status mapping, and counts every call. Faults and latency can be
//! injected per operation, which is what the engine tests and the `simulate`
//! command rely on.
//!
//! # Example
//!
//! ```rust,ignore
//! let backend = InMemoryBackend::new()
//!     .with_project(project)
//!     .with_task(task)
//!     .with_subtask(subtask)
//!     .with_latency(ops::GET_DETAILED_PROJECT_PROGRESS, Duration::from_millis(50));
//!
//! backend.fail_next(ops::GET_SUBTASK, 2);
//! assert_eq!(backend.calls(ops::GET_SUBTASK), 0);
//! ```

use super::{
    ops, DetailedProjectProgress, NewProgress, ProgressService, ProjectSnapshot, ServiceResponse,
    SubtaskPatch, TaskPatch, TaskService,
};
use crate::error::{EngineError, Result};
use crate::model::{
    clamp_percent, EntityKind, EntityRef, Project, ProgressRecord, ProjectId, Status, Subtask,
    SubtaskId, Task, TaskId,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Seed data for an [`InMemoryBackend`], loadable from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendFixture {
    pub project: Option<Project>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    /// Initial progress, one record per entry.
    #[serde(default)]
    pub progress: Vec<FixtureProgress>,
}

/// One seeded progress record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureProgress {
    pub entity: EntityRef,
    pub percent: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Network,
    Reject,
}

#[derive(Debug, Default)]
struct BackendState {
    project: Option<Project>,
    tasks: Vec<Task>,
    subtasks: Vec<Subtask>,
    /// Append-only, oldest first.
    records: Vec<ProgressRecord>,
    next_record_id: u64,
}

impl BackendState {
    fn records_newest_first(&self, owner: EntityRef) -> Vec<ProgressRecord> {
        self.records
            .iter()
            .rev()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect()
    }

    fn current(&self, owner: EntityRef) -> u8 {
        self.records
            .iter()
            .rev()
            .find(|r| r.owner == owner)
            .map_or(0, |r| r.percent)
    }

    fn task_progress(&self, task_id: TaskId) -> f64 {
        let children: Vec<f64> = self
            .subtasks
            .iter()
            .filter(|s| s.task_id == task_id)
            .map(|s| f64::from(self.current(EntityRef::subtask(s.id))))
            .collect();
        if children.is_empty() {
            f64::from(self.current(EntityRef::task(task_id)))
        } else {
            children.iter().sum::<f64>() / children.len() as f64
        }
    }

    fn rollup(&self, project_id: ProjectId) -> DetailedProjectProgress {
        let task_progress: HashMap<TaskId, f64> = self
            .tasks
            .iter()
            .filter(|t| t.project_id == project_id)
            .map(|t| (t.id, self.task_progress(t.id)))
            .collect();
        let subtask_progress: HashMap<SubtaskId, f64> = self
            .subtasks
            .iter()
            .filter(|s| task_progress.contains_key(&s.task_id))
            .map(|s| (s.id, f64::from(self.current(EntityRef::subtask(s.id)))))
            .collect();
        let project_progress = if task_progress.is_empty() {
            0.0
        } else {
            task_progress.values().sum::<f64>() / task_progress.len() as f64
        };
        DetailedProjectProgress {
            project_progress,
            task_progress,
            subtask_progress,
        }
    }

    fn append(&mut self, owner: EntityRef, percent: u8, description: String) -> ProgressRecord {
        self.next_record_id += 1;
        let record = ProgressRecord {
            id: self.next_record_id,
            owner,
            percent,
            description,
            created_at: Utc::now(),
        };
        self.records.push(record.clone());
        record
    }
}

/// In-memory progress and task service.
///
/// Thread-safe; every call is counted under its [`ops`] name.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<BackendState>,
    calls: Mutex<HashMap<&'static str, u32>>,
    faults: Mutex<HashMap<&'static str, Vec<Fault>>>,
    latency: Mutex<HashMap<&'static str, Duration>>,
    unfiltered_subtask_listing: bool,
}

impl InMemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a backend from fixture data.
    #[must_use]
    pub fn from_fixture(fixture: BackendFixture) -> Self {
        let mut backend = Self::new();
        if let Some(project) = fixture.project {
            backend = backend.with_project(project);
        }
        for task in fixture.tasks {
            backend = backend.with_task(task);
        }
        for subtask in fixture.subtasks {
            backend = backend.with_subtask(subtask);
        }
        for seed in fixture.progress {
            backend = backend.with_progress(seed.entity, seed.percent);
        }
        backend
    }

    /// Set the project.
    #[must_use]
    pub fn with_project(self, project: Project) -> Self {
        self.lock_state().project = Some(project);
        self
    }

    /// Add a task.
    #[must_use]
    pub fn with_task(self, task: Task) -> Self {
        self.lock_state().tasks.push(task);
        self
    }

    /// Add a subtask and link it into its parent's `subtask_ids`.
    #[must_use]
    pub fn with_subtask(self, subtask: Subtask) -> Self {
        {
            let mut state = self.lock_state();
            if let Some(task) = state.tasks.iter_mut().find(|t| t.id == subtask.task_id) {
                if !task.subtask_ids.contains(&subtask.id) {
                    task.subtask_ids.push(subtask.id);
                }
            }
            state.subtasks.push(subtask);
        }
        self
    }

    /// Seed a progress record.
    #[must_use]
    pub fn with_progress(self, entity: EntityRef, percent: u8) -> Self {
        self.lock_state()
            .append(entity, clamp_percent(i64::from(percent)), String::new());
        self
    }

    /// Add a fixed delay before an operation answers.
    #[must_use]
    pub fn with_latency(self, op: &'static str, delay: Duration) -> Self {
        self.set_latency(op, delay);
        self
    }

    /// Return every subtask from `get_subtask`, ignoring the owner filter.
    #[must_use]
    pub fn with_unfiltered_subtask_listing(mut self) -> Self {
        self.unfiltered_subtask_listing = true;
        self
    }

    /// Change the delay of an operation.
    pub fn set_latency(&self, op: &'static str, delay: Duration) {
        self.latency
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(op, delay);
    }

    /// Make the next `count` calls of `op` fail with a network error.
    pub fn fail_next(&self, op: &'static str, count: usize) {
        self.push_faults(op, Fault::Network, count);
    }

    /// Make the next `count` calls of `op` answer `success = false`.
    pub fn reject_next(&self, op: &'static str, count: usize) {
        self.push_faults(op, Fault::Reject, count);
    }

    /// Number of calls received for `op`.
    pub fn calls(&self, op: &str) -> u32 {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(op)
            .copied()
            .unwrap_or(0)
    }

    /// Total number of calls across all operations.
    pub fn total_calls(&self) -> u32 {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .sum()
    }

    /// Current status of a task as stored by the service.
    pub fn task_status(&self, task_id: TaskId) -> Option<Status> {
        self.lock_state()
            .tasks
            .iter()
            .find(|t| t.id == task_id)
            .map(|t| t.status)
    }

    /// Current status of a subtask as stored by the service.
    pub fn subtask_status(&self, subtask_id: SubtaskId) -> Option<Status> {
        self.lock_state()
            .subtasks
            .iter()
            .find(|s| s.id == subtask_id)
            .map(|s| s.status)
    }

    /// All records for an entity, newest first.
    pub fn records(&self, owner: EntityRef) -> Vec<ProgressRecord> {
        self.lock_state().records_newest_first(owner)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push_faults(&self, op: &'static str, fault: Fault, count: usize) {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(op)
            .or_default()
            .extend(std::iter::repeat(fault).take(count));
    }

    /// Count the call, wait out any latency, and pop a pending fault.
    async fn enter(&self, op: &'static str) -> Option<Fault> {
        *self
            .calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(op)
            .or_insert(0) += 1;

        let delay = self
            .latency
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(op)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        match faults.get_mut(op) {
            Some(queue) if !queue.is_empty() => Some(queue.remove(0)),
            _ => None,
        }
    }

    fn network_fault(op: &str) -> EngineError {
        EngineError::network(op, "injected network failure")
    }
}

#[async_trait]
impl ProgressService for InMemoryBackend {
    async fn get_detailed_project_progress(
        &self,
        project_id: ProjectId,
    ) -> Result<DetailedProjectProgress> {
        let op = ops::GET_DETAILED_PROJECT_PROGRESS;
        if self.enter(op).await.is_some() {
            return Err(Self::network_fault(op));
        }
        Ok(self.lock_state().rollup(project_id))
    }

    async fn get_task_progress(&self, task_id: TaskId) -> Result<Vec<ProgressRecord>> {
        let op = ops::GET_TASK_PROGRESS;
        if self.enter(op).await.is_some() {
            return Err(Self::network_fault(op));
        }
        Ok(self.lock_state().records_newest_first(EntityRef::task(task_id)))
    }

    async fn get_subtask_progress(&self, subtask_id: SubtaskId) -> Result<Vec<ProgressRecord>> {
        let op = ops::GET_SUBTASK_PROGRESS;
        if self.enter(op).await.is_some() {
            return Err(Self::network_fault(op));
        }
        Ok(self
            .lock_state()
            .records_newest_first(EntityRef::subtask(subtask_id)))
    }

    async fn create_progress(&self, body: NewProgress) -> Result<ServiceResponse<ProgressRecord>> {
        let op = ops::CREATE_PROGRESS;
        match self.enter(op).await {
            Some(Fault::Network) => return Err(Self::network_fault(op)),
            Some(Fault::Reject) => return Ok(ServiceResponse::failed("progress rejected")),
            None => {}
        }

        let Some(owner) = body.owner() else {
            return Ok(ServiceResponse::failed(
                "exactly one of task_id and subtask_id is required",
            ));
        };
        let percent = clamp_percent(i64::from(body.percent));

        let mut state = self.lock_state();
        let known = match owner.kind {
            EntityKind::Task => state.tasks.iter().any(|t| t.id == owner.id),
            EntityKind::Subtask => state.subtasks.iter().any(|s| s.id == owner.id),
        };
        if !known {
            return Ok(ServiceResponse::failed(format!("{owner} not found")));
        }

        let record = state.append(owner, percent, body.description);
        if owner.kind == EntityKind::Subtask {
            if let Some(subtask) = state.subtasks.iter_mut().find(|s| s.id == owner.id) {
                subtask.status = Status::from_percent(percent);
            }
        }
        Ok(ServiceResponse::ok(record))
    }
}

#[async_trait]
impl TaskService for InMemoryBackend {
    async fn get_project(&self, project_id: ProjectId) -> Result<ProjectSnapshot> {
        let op = ops::GET_PROJECT;
        if self.enter(op).await.is_some() {
            return Err(Self::network_fault(op));
        }
        let state = self.lock_state();
        let mut project = state
            .project
            .clone()
            .filter(|p| p.id == project_id)
            .ok_or_else(|| EngineError::rejected(op, format!("project {project_id} not found")))?;
        project.progress = state.rollup(project_id).project_progress;
        let tasks = state
            .tasks
            .iter()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect();
        Ok(ProjectSnapshot { project, tasks })
    }

    async fn patch_task(&self, patch: TaskPatch) -> Result<ServiceResponse<()>> {
        let op = ops::PATCH_TASK;
        match self.enter(op).await {
            Some(Fault::Network) => return Err(Self::network_fault(op)),
            Some(Fault::Reject) => return Ok(ServiceResponse::failed("patch rejected")),
            None => {}
        }
        let mut state = self.lock_state();
        let Some(task) = state.tasks.iter_mut().find(|t| t.id == patch.task_id) else {
            return Ok(ServiceResponse::failed(format!(
                "task {} not found",
                patch.task_id
            )));
        };
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(name) = patch.name {
            task.name = name;
        }
        if patch.budget.is_some() {
            task.budget = patch.budget;
        }
        if patch.start_date.is_some() {
            task.start_date = patch.start_date;
        }
        if patch.end_date.is_some() {
            task.end_date = patch.end_date;
        }
        Ok(ServiceResponse::ack())
    }

    async fn patch_subtask(&self, patch: SubtaskPatch) -> Result<ServiceResponse<()>> {
        let op = ops::PATCH_SUBTASK;
        match self.enter(op).await {
            Some(Fault::Network) => return Err(Self::network_fault(op)),
            Some(Fault::Reject) => return Ok(ServiceResponse::failed("patch rejected")),
            None => {}
        }
        let mut state = self.lock_state();
        let Some(subtask) = state
            .subtasks
            .iter_mut()
            .find(|s| s.id == patch.subtask_id)
        else {
            return Ok(ServiceResponse::failed(format!(
                "subtask {} not found",
                patch.subtask_id
            )));
        };
        if let Some(status) = patch.status {
            subtask.status = status;
        }
        if let Some(name) = patch.name {
            subtask.name = name;
        }
        if patch.budget.is_some() {
            subtask.budget = patch.budget;
        }
        if patch.start_date.is_some() {
            subtask.start_date = patch.start_date;
        }
        if patch.end_date.is_some() {
            subtask.end_date = patch.end_date;
        }
        Ok(ServiceResponse::ack())
    }

    async fn get_subtask(&self, task_id: TaskId) -> Result<ServiceResponse<Vec<Subtask>>> {
        let op = ops::GET_SUBTASK;
        match self.enter(op).await {
            Some(Fault::Network) => return Err(Self::network_fault(op)),
            Some(Fault::Reject) => return Ok(ServiceResponse::failed("listing rejected")),
            None => {}
        }
        let state = self.lock_state();
        let subtasks = state
            .subtasks
            .iter()
            .filter(|s| self.unfiltered_subtask_listing || s.task_id == task_id)
            .cloned()
            .collect();
        Ok(ServiceResponse::ok(subtasks))
    }
}
