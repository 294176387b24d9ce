//! Custom assertions for domain-specific testing.

use crate::engine::ProgressEngine;
use crate::inference::{explain, InferenceRule, SubtaskSignal};
use crate::model::{EntityRef, Status, TaskId};

/// Assert that a task currently has the expected status.
///
/// # Panics
///
/// Panics if the task is unknown or its status differs.
///
/// # Example
///
/// ```rust,ignore
/// engine.flush().await;
/// assert_status(&engine, 10, Status::Completed);
/// ```
pub fn assert_status(engine: &ProgressEngine, task_id: TaskId, expected: Status) {
    match engine.status_of(task_id) {
        Some(actual) => assert_eq!(
            actual, expected,
            "Expected task {task_id} to be {expected}, but it is {actual}"
        ),
        None => panic!("Expected task {task_id} to be {expected}, but it is not in the store"),
    }
}

/// Assert the cached percent of a task or subtask.
///
/// # Panics
///
/// Panics if the cached percent differs.
pub fn assert_progress(engine: &ProgressEngine, entity: EntityRef, expected: u8) {
    let actual = engine.progress_of(entity);
    assert_eq!(
        actual, expected,
        "Expected {entity} at {expected}%, but the cache holds {actual}%"
    );
}

/// Assert which inference rule fires for the given inputs.
///
/// # Panics
///
/// Panics with the inputs if a different rule fires.
pub fn assert_rule(current: Status, subtasks: &[SubtaskSignal], expected: InferenceRule) {
    let actual = explain(current, subtasks);
    assert_eq!(
        actual, expected,
        "Expected rule {expected:?} for current={current}, subtasks={subtasks:?}; got {actual:?}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assert_rule_passes_on_match() {
        assert_rule(
            Status::Pending,
            &[SubtaskSignal::new(Status::Completed, 100)],
            InferenceRule::AllCompleted,
        );
    }

    #[test]
    #[should_panic(expected = "Expected rule")]
    fn test_assert_rule_panics_on_mismatch() {
        assert_rule(Status::Pending, &[], InferenceRule::AllCompleted);
    }
}
