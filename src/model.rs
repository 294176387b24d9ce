//! Domain entities: projects, tasks, subtasks and progress records.
//!
//! Identifiers are plain integers assigned by the remote services. Tasks and
//! subtasks live in separate id spaces, so anything keyed across both levels
//! uses an [`EntityRef`].

use crate::error::EngineError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a project.
pub type ProjectId = u64;
/// Identifier of a task.
pub type TaskId = u64;
/// Identifier of a subtask.
pub type SubtaskId = u64;

// ============================================================================
// Status
// ============================================================================

/// Lifecycle status shared by tasks and subtasks.
///
/// Serialized in `snake_case` to match the wire format used by the task
/// service (`pending`, `in_progress`, `completed`, `suspended`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// No work recorded yet
    #[default]
    Pending,
    /// Work has started but is not finished
    InProgress,
    /// All work finished
    Completed,
    /// Work put on hold
    Suspended,
}

impl Status {
    /// All statuses, in display order.
    pub const ALL: [Status; 4] = [
        Status::Pending,
        Status::InProgress,
        Status::Completed,
        Status::Suspended,
    ];

    /// Map a progress percentage to a status the way the task service does
    /// when it records progress: 100 is completed, anything above zero is in
    /// progress, zero is pending.
    ///
    /// # Example
    ///
    /// ```
    /// use sitetrack::model::Status;
    ///
    /// assert_eq!(Status::from_percent(100), Status::Completed);
    /// assert_eq!(Status::from_percent(40), Status::InProgress);
    /// assert_eq!(Status::from_percent(0), Status::Pending);
    /// ```
    #[must_use]
    pub fn from_percent(percent: u8) -> Self {
        match percent {
            0 => Status::Pending,
            100.. => Status::Completed,
            _ => Status::InProgress,
        }
    }

    /// Wire name of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
            Status::Suspended => "suspended",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(Status::Pending),
            "in_progress" | "inprogress" => Ok(Status::InProgress),
            "completed" | "complete" | "done" => Ok(Status::Completed),
            "suspended" => Ok(Status::Suspended),
            other => Err(EngineError::validation(
                "status",
                format!("unknown status '{other}'"),
            )),
        }
    }
}

// ============================================================================
// Entity references
// ============================================================================

/// Which level of the hierarchy an entity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Subtask,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Task => write!(f, "task"),
            EntityKind::Subtask => write!(f, "subtask"),
        }
    }
}

/// A task or subtask, identified across both id spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: u64,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: u64) -> Self {
        Self { kind, id }
    }

    pub fn task(id: TaskId) -> Self {
        Self::new(EntityKind::Task, id)
    }

    pub fn subtask(id: SubtaskId) -> Self {
        Self::new(EntityKind::Subtask, id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

// ============================================================================
// Percentages
// ============================================================================

/// Clamp a raw percentage into `0..=100`.
///
/// Out-of-range input is not an error; it is clamped before storage and
/// logged at debug level.
#[must_use]
pub fn clamp_percent(raw: i64) -> u8 {
    let clamped = raw.clamp(0, 100);
    if clamped != raw {
        tracing::debug!("Clamped progress {} to {}", raw, clamped);
    }
    clamped as u8
}

// ============================================================================
// Entities
// ============================================================================

/// A construction project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub status: Status,
    /// Aggregate progress as last reported by the remote authority.
    #[serde(default)]
    pub progress: f64,
}

/// A task within a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    /// Child subtask ids in display order.
    #[serde(default)]
    pub subtask_ids: Vec<SubtaskId>,
}

/// A subtask belonging to one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: SubtaskId,
    pub task_id: TaskId,
    pub name: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Immutable percent-complete entry for a task or subtask.
///
/// Records are append-only; the newest record defines current progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub id: u64,
    pub owner: EntityRef,
    pub percent: u8,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Current progress given a newest-first record list.
#[must_use]
pub fn current_percent(records_newest_first: &[ProgressRecord]) -> u8 {
    records_newest_first.first().map_or(0, |r| r.percent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_percent_boundaries() {
        assert_eq!(Status::from_percent(0), Status::Pending);
        assert_eq!(Status::from_percent(1), Status::InProgress);
        assert_eq!(Status::from_percent(99), Status::InProgress);
        assert_eq!(Status::from_percent(100), Status::Completed);
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&Status::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let parsed: Status = serde_json::from_str("\"suspended\"").unwrap();
        assert_eq!(parsed, Status::Suspended);
    }

    #[test]
    fn test_status_from_str_accepts_aliases() {
        assert_eq!("in-progress".parse::<Status>().unwrap(), Status::InProgress);
        assert_eq!("Completed".parse::<Status>().unwrap(), Status::Completed);
        assert!("started".parse::<Status>().is_err());
    }

    #[test]
    fn test_clamp_percent() {
        assert_eq!(clamp_percent(-5), 0);
        assert_eq!(clamp_percent(150), 100);
        assert_eq!(clamp_percent(42), 42);
    }

    #[test]
    fn test_entity_ref_display() {
        assert_eq!(EntityRef::task(3).to_string(), "task#3");
        assert_eq!(EntityRef::subtask(3).to_string(), "subtask#3");
        assert_ne!(EntityRef::task(3), EntityRef::subtask(3));
    }

    #[test]
    fn test_current_percent_uses_newest_record() {
        let now = Utc::now();
        let records = vec![
            ProgressRecord {
                id: 2,
                owner: EntityRef::task(1),
                percent: 60,
                description: String::new(),
                created_at: now,
            },
            ProgressRecord {
                id: 1,
                owner: EntityRef::task(1),
                percent: 20,
                description: String::new(),
                created_at: now - chrono::Duration::hours(1),
            },
        ];
        assert_eq!(current_percent(&records), 60);
        assert_eq!(current_percent(&[]), 0);
    }

    #[test]
    fn test_task_deserializes_with_defaults() {
        let task: Task =
            serde_json::from_str(r#"{"id": 1, "project_id": 9, "name": "Foundations"}"#).unwrap();
        assert_eq!(task.status, Status::Pending);
        assert!(task.subtask_ids.is_empty());
        assert!(task.budget.is_none());
    }
}
