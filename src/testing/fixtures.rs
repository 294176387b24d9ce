//! Entity builders and seed data for tests and demos.
//!
//! Every builder fills only the fields the hierarchy needs; tests override
//! the rest with struct update syntax.

use crate::model::{EntityRef, Project, ProjectId, Status, Subtask, SubtaskId, Task, TaskId};
use crate::remote::memory::FixtureProgress;
use crate::remote::BackendFixture;

/// A pending project with no progress.
#[must_use]
pub fn project(id: ProjectId) -> Project {
    Project {
        id,
        name: format!("Project {id}"),
        status: Status::Pending,
        progress: 0.0,
    }
}

/// A pending task with no subtasks linked yet.
#[must_use]
pub fn task(id: TaskId, project_id: ProjectId) -> Task {
    Task {
        id,
        project_id,
        name: format!("Task {id}"),
        status: Status::Pending,
        budget: None,
        start_date: None,
        end_date: None,
        subtask_ids: Vec::new(),
    }
}

/// A pending subtask without a creation timestamp.
#[must_use]
pub fn subtask(id: SubtaskId, task_id: TaskId) -> Subtask {
    Subtask {
        id,
        task_id,
        name: format!("Subtask {id}"),
        status: Status::Pending,
        budget: None,
        start_date: None,
        end_date: None,
        created_at: None,
    }
}

/// Subtask with a status already set.
#[must_use]
pub fn subtask_with_status(id: SubtaskId, task_id: TaskId, status: Status) -> Subtask {
    Subtask {
        status,
        ..subtask(id, task_id)
    }
}

/// A small depot build used by demos and end-to-end tests.
///
/// Project 1 has three tasks:
/// - 10 "Foundations" with subtasks 101 (completed, 100%) and 102 (pending)
/// - 20 "Framing" with subtasks 201 and 202, both pending
/// - 30 "Permits" with no subtasks, at 40%
#[must_use]
pub fn depot_fixture() -> BackendFixture {
    let mut foundations = task(10, 1);
    foundations.name = "Foundations".to_string();
    let mut framing = task(20, 1);
    framing.name = "Framing".to_string();
    let mut permits = task(30, 1);
    permits.name = "Permits".to_string();
    permits.status = Status::InProgress;

    BackendFixture {
        project: Some(Project {
            name: "Depot".to_string(),
            ..project(1)
        }),
        tasks: vec![foundations, framing, permits],
        subtasks: vec![
            subtask_with_status(101, 10, Status::Completed),
            subtask(102, 10),
            subtask(201, 20),
            subtask(202, 20),
        ],
        progress: vec![
            FixtureProgress {
                entity: EntityRef::subtask(101),
                percent: 100,
            },
            FixtureProgress {
                entity: EntityRef::task(30),
                percent: 40,
            },
        ],
    }
}
