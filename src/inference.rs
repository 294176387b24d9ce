//! Task status inference from subtask state.
//!
//! A task with at least one subtask tracks its children automatically. The
//! rules are evaluated in priority order and the first match wins:
//!
//! | # | Condition                                                       | Result        |
//! |---|-----------------------------------------------------------------|---------------|
//! | 1 | every subtask completed                                         | `Completed`   |
//! | 2 | every subtask suspended                                         | `Suspended`   |
//! | 3 | any subtask in progress                                         | `InProgress`  |
//! | 4 | task completed (and rule 1 did not match)                       | `InProgress`  |
//! | 5 | task neither in progress nor completed, any subtask percent > 0 | `InProgress`  |
//! | 6 | task in progress, every percent 0, no subtask in progress       | `Pending`     |
//!
//! Otherwise the current status is kept. A task with no subtasks keeps its
//! status unchanged; it is only ever set by the user.

use crate::model::Status;

/// Status and current progress of one subtask, as seen by inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubtaskSignal {
    pub status: Status,
    pub percent: u8,
}

impl SubtaskSignal {
    pub fn new(status: Status, percent: u8) -> Self {
        Self { status, percent }
    }
}

/// Which rule produced an inference result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceRule {
    AllCompleted,
    AllSuspended,
    AnyInProgress,
    CompletedRegressed,
    WorkStarted,
    WorkReverted,
    /// No rule matched; the current status is kept.
    Unchanged,
}

/// Infer the next status of a task from its subtasks.
///
/// Deterministic and total. See the module docs for the rule table.
///
/// # Example
///
/// ```
/// use sitetrack::inference::{infer_status, SubtaskSignal};
/// use sitetrack::model::Status;
///
/// let subs = [
///     SubtaskSignal::new(Status::Pending, 0),
///     SubtaskSignal::new(Status::Completed, 100),
/// ];
/// assert_eq!(infer_status(Status::Pending, &subs), Status::InProgress);
/// ```
#[must_use]
pub fn infer_status(current: Status, subtasks: &[SubtaskSignal]) -> Status {
    match explain(current, subtasks) {
        InferenceRule::AllCompleted => Status::Completed,
        InferenceRule::AllSuspended => Status::Suspended,
        InferenceRule::AnyInProgress
        | InferenceRule::CompletedRegressed
        | InferenceRule::WorkStarted => Status::InProgress,
        InferenceRule::WorkReverted => Status::Pending,
        InferenceRule::Unchanged => current,
    }
}

/// Apply [`infer_status`] until the status stops changing.
///
/// A single inference step is not always a fixed point: a completed task
/// whose subtasks all sit at 0% moves to `InProgress` (rule 4) and then to
/// `Pending` (rule 6). Settling collapses that chain.
#[must_use]
pub fn settle_status(current: Status, subtasks: &[SubtaskSignal]) -> Status {
    let mut status = current;
    // each step either keeps the status or moves it along a chain of at most
    // two rules, so three steps always reach the fixed point
    for _ in 0..3 {
        let next = infer_status(status, subtasks);
        if next == status {
            break;
        }
        status = next;
    }
    status
}

/// Return the rule [`infer_status`] would apply.
#[must_use]
pub fn explain(current: Status, subtasks: &[SubtaskSignal]) -> InferenceRule {
    if subtasks.is_empty() {
        return InferenceRule::Unchanged;
    }

    let all = |status: Status| subtasks.iter().all(|s| s.status == status);
    let any_in_progress = subtasks.iter().any(|s| s.status == Status::InProgress);
    let any_started = subtasks.iter().any(|s| s.percent > 0);

    if all(Status::Completed) {
        InferenceRule::AllCompleted
    } else if all(Status::Suspended) {
        InferenceRule::AllSuspended
    } else if any_in_progress {
        InferenceRule::AnyInProgress
    } else if current == Status::Completed {
        InferenceRule::CompletedRegressed
    } else if current != Status::InProgress && any_started {
        InferenceRule::WorkStarted
    } else if current == Status::InProgress && !any_started {
        // any_in_progress is already false here
        InferenceRule::WorkReverted
    } else {
        InferenceRule::Unchanged
    }
}
