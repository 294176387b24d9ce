//! Contracts for the remote collaborators the engine consumes.
//!
//! Two services sit behind the engine:
//!
//! - [`ProgressService`] owns the append-only progress records and computes
//!   the authoritative rollup for a project.
//! - [`TaskService`] owns the task and subtask entities.
//!
//! Both traits are object-safe and `Send + Sync` so the engine can hold them
//! as `Arc<dyn ...>`. A transport failure is reported as `Err`, while a
//! response with `success = false` comes back as a [`ServiceResponse`] that
//! the caller converts with [`ServiceResponse::into_value`] or
//! [`ServiceResponse::into_ack`].

pub mod memory;

pub use memory::{BackendFixture, InMemoryBackend};

use crate::error::{EngineError, Result};
use crate::model::{
    EntityKind, EntityRef, Project, ProgressRecord, ProjectId, Status, Subtask, SubtaskId, Task,
    TaskId,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Operation names, used for logging and call accounting.
pub mod ops {
    pub const GET_DETAILED_PROJECT_PROGRESS: &str = "get_detailed_project_progress";
    pub const GET_TASK_PROGRESS: &str = "get_task_progress";
    pub const GET_SUBTASK_PROGRESS: &str = "get_subtask_progress";
    pub const CREATE_PROGRESS: &str = "create_progress";
    pub const GET_PROJECT: &str = "get_project";
    pub const PATCH_TASK: &str = "patch_task";
    pub const PATCH_SUBTASK: &str = "patch_subtask";
    pub const GET_SUBTASK: &str = "get_subtask";
}

// ============================================================================
// Wire types
// ============================================================================

/// Envelope used by every mutating or listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_object: Option<T>,
}

impl<T> ServiceResponse<T> {
    pub fn ok(value: T) -> Self {
        Self {
            success: true,
            message: None,
            response_object: Some(value),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            response_object: None,
        }
    }

    /// Unwrap the payload, treating `success = false` or a missing payload as
    /// a rejection.
    pub fn into_value(self, operation: &str) -> Result<T> {
        if !self.success {
            return Err(EngineError::rejected(
                operation,
                self.message.unwrap_or_else(|| "no message".to_string()),
            ));
        }
        self.response_object
            .ok_or_else(|| EngineError::rejected(operation, "response carried no payload"))
    }

    /// Check `success` and discard any payload.
    pub fn into_ack(self, operation: &str) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(EngineError::rejected(
                operation,
                self.message.unwrap_or_else(|| "no message".to_string()),
            ))
        }
    }
}

impl ServiceResponse<()> {
    pub fn ack() -> Self {
        Self::ok(())
    }
}

/// Authoritative rollup for one project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedProjectProgress {
    pub project_progress: f64,
    #[serde(default)]
    pub task_progress: HashMap<TaskId, f64>,
    #[serde(default)]
    pub subtask_progress: HashMap<SubtaskId, f64>,
}

impl DetailedProjectProgress {
    /// Task and subtask values as cache entries, rounded to whole percent.
    pub fn entity_values(&self) -> impl Iterator<Item = (EntityRef, i64)> + '_ {
        let tasks = self
            .task_progress
            .iter()
            .map(|(&id, &v)| (EntityRef::task(id), v.round() as i64));
        let subtasks = self
            .subtask_progress
            .iter()
            .map(|(&id, &v)| (EntityRef::subtask(id), v.round() as i64));
        tasks.chain(subtasks)
    }
}

/// Request body for appending a progress record.
///
/// Exactly one of `task_id` and `subtask_id` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<SubtaskId>,
    pub percent: u8,
    #[serde(default)]
    pub description: String,
}

impl NewProgress {
    pub fn new(owner: EntityRef, percent: u8, description: impl Into<String>) -> Self {
        let (task_id, subtask_id) = match owner.kind {
            EntityKind::Task => (Some(owner.id), None),
            EntityKind::Subtask => (None, Some(owner.id)),
        };
        Self {
            task_id,
            subtask_id,
            percent,
            description: description.into(),
        }
    }

    /// The entity the record belongs to, if the body is well formed.
    pub fn owner(&self) -> Option<EntityRef> {
        match (self.task_id, self.subtask_id) {
            (Some(id), None) => Some(EntityRef::task(id)),
            (None, Some(id)) => Some(EntityRef::subtask(id)),
            _ => None,
        }
    }
}

/// Partial update of a task. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

impl TaskPatch {
    pub fn status(task_id: TaskId, status: Status) -> Self {
        Self {
            task_id,
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Partial update of a subtask. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtaskPatch {
    pub subtask_id: SubtaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

impl SubtaskPatch {
    pub fn status(subtask_id: SubtaskId, status: Status) -> Self {
        Self {
            subtask_id,
            status: Some(status),
            ..Self::default()
        }
    }
}

/// A project with its ordered task list, as returned by a full refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub project: Project,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

// ============================================================================
// Service traits
// ============================================================================

/// Remote owner of progress records and the project rollup.
#[async_trait]
pub trait ProgressService: Send + Sync {
    /// Rollup for a project: project, per-task and per-subtask percentages.
    async fn get_detailed_project_progress(
        &self,
        project_id: ProjectId,
    ) -> Result<DetailedProjectProgress>;

    /// Records for a task, newest first.
    async fn get_task_progress(&self, task_id: TaskId) -> Result<Vec<ProgressRecord>>;

    /// Records for a subtask, newest first.
    async fn get_subtask_progress(&self, subtask_id: SubtaskId) -> Result<Vec<ProgressRecord>>;

    /// Append a record.
    async fn create_progress(&self, body: NewProgress) -> Result<ServiceResponse<ProgressRecord>>;
}

/// Remote owner of tasks and subtasks.
#[async_trait]
pub trait TaskService: Send + Sync {
    /// Project header and its ordered task list.
    async fn get_project(&self, project_id: ProjectId) -> Result<ProjectSnapshot>;

    async fn patch_task(&self, patch: TaskPatch) -> Result<ServiceResponse<()>>;

    async fn patch_subtask(&self, patch: SubtaskPatch) -> Result<ServiceResponse<()>>;

    /// Subtasks for a task. The server is not guaranteed to filter by owner.
    async fn get_subtask(&self, task_id: TaskId) -> Result<ServiceResponse<Vec<Subtask>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_response_into_value() {
        let ok = ServiceResponse::ok(5u8);
        assert_eq!(ok.into_value("op").unwrap(), 5);

        let failed: ServiceResponse<u8> = ServiceResponse::failed("nope");
        let err = failed.into_value("op").unwrap_err();
        assert!(matches!(err, EngineError::Rejected { .. }));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_service_response_missing_payload_is_rejected() {
        let empty: ServiceResponse<u8> = ServiceResponse {
            success: true,
            message: None,
            response_object: None,
        };
        assert!(empty.clone().into_ack("op").is_ok());
        assert!(empty.into_value("op").is_err());
    }

    #[test]
    fn test_service_response_wire_shape() {
        let json = r#"{"success": true, "responseObject": [1, 2]}"#;
        let parsed: ServiceResponse<Vec<u8>> = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.response_object, Some(vec![1, 2]));

        let json = r#"{"success": false, "message": "task not found"}"#;
        let parsed: ServiceResponse<()> = serde_json::from_str(json).unwrap();
        assert!(parsed.into_ack("patch_task").is_err());
    }

    #[test]
    fn test_new_progress_owner_exclusive() {
        let body = NewProgress::new(EntityRef::subtask(4), 50, "poured");
        assert_eq!(body.task_id, None);
        assert_eq!(body.subtask_id, Some(4));
        assert_eq!(body.owner(), Some(EntityRef::subtask(4)));

        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("\"task_id\""));
        assert!(json.contains("\"subtask_id\":4"));

        let malformed = NewProgress {
            task_id: Some(1),
            subtask_id: Some(2),
            percent: 0,
            description: String::new(),
        };
        assert_eq!(malformed.owner(), None);
    }

    #[test]
    fn test_detailed_progress_entity_values_round() {
        let mut detail = DetailedProjectProgress::default();
        detail.task_progress.insert(1, 33.4);
        detail.subtask_progress.insert(1, 66.6);
        let mut values: Vec<_> = detail.entity_values().collect();
        values.sort();
        assert_eq!(
            values,
            vec![(EntityRef::task(1), 33), (EntityRef::subtask(1), 67)]
        );
    }

    #[test]
    fn test_task_patch_serializes_only_set_fields() {
        let patch = TaskPatch::status(3, Status::Completed);
        let json = serde_json::to_string(&patch).unwrap();
        assert_eq!(json, r#"{"task_id":3,"status":"completed"}"#);
    }
}
