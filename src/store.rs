//! Session-owned state: the entity lists and the progress cache.
//!
//! One [`Store`] per session holds everything the presentation layer reads.
//! The engine keeps it behind a single mutex and never holds that lock
//! across a remote call, so every local mutation is atomic with respect to
//! readers.

use crate::cache::ProgressCache;
use crate::inference::SubtaskSignal;
use crate::model::{EntityRef, Project, Status, Subtask, SubtaskId, Task, TaskId};
use crate::remote::ProjectSnapshot;
use serde::Serialize;
use std::collections::HashMap;

/// How a task's subtask list got into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    /// The listing succeeded (the list may still be empty).
    Loaded,
    /// Every fetch attempt failed; an empty list was cached in its place.
    Failed,
}

/// Entity lists plus the derived progress view.
#[derive(Debug, Default)]
pub struct Store {
    project: Option<Project>,
    tasks: Vec<Task>,
    subtasks: HashMap<TaskId, Vec<Subtask>>,
    load_state: HashMap<TaskId, LoadState>,
    pub cache: ProgressCache,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace project and task list wholesale.
    ///
    /// Subtask lists are kept for tasks that are still present so expanded
    /// tasks stay expanded; lists of removed tasks are dropped.
    pub fn replace_project(&mut self, snapshot: ProjectSnapshot) {
        let ProjectSnapshot { project, tasks } = snapshot;
        self.subtasks
            .retain(|id, _| tasks.iter().any(|t| t.id == *id));
        self.load_state
            .retain(|id, _| tasks.iter().any(|t| t.id == *id));
        self.project = Some(project);
        self.tasks = tasks;
    }

    pub fn project(&self) -> Option<&Project> {
        self.project.as_ref()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, task_id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn task_mut(&mut self, task_id: TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    /// Cached subtasks of a task, empty when not loaded.
    pub fn subtasks(&self, task_id: TaskId) -> &[Subtask] {
        self.subtasks
            .get(&task_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_loaded_subtasks(&self, task_id: TaskId) -> bool {
        !self.subtasks(task_id).is_empty()
    }

    pub fn load_state(&self, task_id: TaskId) -> Option<LoadState> {
        self.load_state.get(&task_id).copied()
    }

    /// Cache a subtask listing and keep the parent's id order in step.
    pub fn set_subtasks(&mut self, task_id: TaskId, subtasks: Vec<Subtask>, state: LoadState) {
        if state == LoadState::Loaded {
            if let Some(task) = self.task_mut(task_id) {
                task.subtask_ids = subtasks.iter().map(|s| s.id).collect();
            }
        }
        self.subtasks.insert(task_id, subtasks);
        self.load_state.insert(task_id, state);
    }

    /// Owning task of a loaded subtask.
    pub fn owner_of(&self, subtask_id: SubtaskId) -> Option<TaskId> {
        self.subtasks
            .iter()
            .find(|(_, list)| list.iter().any(|s| s.id == subtask_id))
            .map(|(&task_id, _)| task_id)
    }

    pub fn subtask(&self, subtask_id: SubtaskId) -> Option<&Subtask> {
        self.subtasks
            .values()
            .flat_map(|list| list.iter())
            .find(|s| s.id == subtask_id)
    }

    /// Set a subtask's status. Returns `false` if the subtask is not loaded.
    pub fn set_subtask_status(&mut self, subtask_id: SubtaskId, status: Status) -> bool {
        match self
            .subtasks
            .values_mut()
            .flat_map(|list| list.iter_mut())
            .find(|s| s.id == subtask_id)
        {
            Some(subtask) => {
                subtask.status = status;
                true
            }
            None => false,
        }
    }

    /// Status and cached percent of each loaded subtask of a task.
    pub fn signals(&self, task_id: TaskId) -> Vec<SubtaskSignal> {
        self.subtasks(task_id)
            .iter()
            .map(|s| SubtaskSignal::new(s.status, self.cache.get(EntityRef::subtask(s.id))))
            .collect()
    }

    /// Read-only copy for presentation.
    pub fn snapshot(&self) -> EngineSnapshot {
        let project = self.project.clone().map(|mut p| {
            p.progress = self.cache.project_progress();
            p
        });
        let tasks = self
            .tasks
            .iter()
            .map(|task| TaskSnapshot {
                task: task.clone(),
                progress: self.cache.get(EntityRef::task(task.id)),
                load_state: self.load_state(task.id),
                subtasks: self
                    .subtasks(task.id)
                    .iter()
                    .map(|s| SubtaskSnapshot {
                        subtask: s.clone(),
                        progress: self.cache.get(EntityRef::subtask(s.id)),
                    })
                    .collect(),
            })
            .collect();
        EngineSnapshot { project, tasks }
    }
}

/// Point-in-time view of the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    /// The project, with `progress` taken from the cache.
    pub project: Option<Project>,
    pub tasks: Vec<TaskSnapshot>,
}

impl EngineSnapshot {
    pub fn task(&self, task_id: TaskId) -> Option<&TaskSnapshot> {
        self.tasks.iter().find(|t| t.task.id == task_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    #[serde(flatten)]
    pub task: Task,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_state: Option<LoadState>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subtasks: Vec<SubtaskSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtaskSnapshot {
    #[serde(flatten)]
    pub subtask: Subtask,
    pub progress: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::{project, subtask, task};

    fn loaded_store() -> Store {
        let mut store = Store::new();
        store.replace_project(ProjectSnapshot {
            project: project(1),
            tasks: vec![task(10, 1), task(20, 1)],
        });
        store.set_subtasks(
            10,
            vec![subtask(101, 10), subtask(102, 10)],
            LoadState::Loaded,
        );
        store
    }

    #[test]
    fn test_set_subtasks_syncs_parent_ids() {
        let store = loaded_store();
        assert_eq!(store.task(10).unwrap().subtask_ids, vec![101, 102]);
        assert_eq!(store.load_state(10), Some(LoadState::Loaded));
        assert_eq!(store.load_state(20), None);
    }

    #[test]
    fn test_failed_load_caches_empty_list() {
        let mut store = loaded_store();
        store.set_subtasks(20, Vec::new(), LoadState::Failed);
        assert!(!store.has_loaded_subtasks(20));
        assert_eq!(store.load_state(20), Some(LoadState::Failed));
    }

    #[test]
    fn test_owner_lookup() {
        let store = loaded_store();
        assert_eq!(store.owner_of(102), Some(10));
        assert_eq!(store.owner_of(999), None);
    }

    #[test]
    fn test_signals_read_cache() {
        let mut store = loaded_store();
        store.cache.set(EntityRef::subtask(101), 40);
        store.set_subtask_status(101, Status::InProgress);
        assert_eq!(
            store.signals(10),
            vec![
                SubtaskSignal::new(Status::InProgress, 40),
                SubtaskSignal::new(Status::Pending, 0),
            ]
        );
        assert!(store.signals(20).is_empty());
    }

    #[test]
    fn test_replace_project_keeps_subtasks_of_surviving_tasks() {
        let mut store = loaded_store();
        store.set_subtasks(20, vec![subtask(201, 20)], LoadState::Loaded);
        store.replace_project(ProjectSnapshot {
            project: project(1),
            tasks: vec![task(10, 1)],
        });
        assert_eq!(store.subtasks(10).len(), 2);
        assert_eq!(store.owner_of(201), None);
        assert_eq!(store.load_state(20), None);
    }

    #[test]
    fn test_snapshot_reports_cached_progress() {
        let mut store = loaded_store();
        store.cache.set(EntityRef::subtask(102), 150);
        let seq = store.cache.issue_sequence();
        store.cache.set_project_progress(37.5, seq);

        let snap = store.snapshot();
        assert_eq!(snap.project.as_ref().unwrap().progress, 37.5);
        let t10 = snap.task(10).unwrap();
        assert_eq!(t10.subtasks[1].progress, 100);
        assert_eq!(t10.load_state, Some(LoadState::Loaded));
    }
}
