//! Scripted edit sessions against the in-memory backend.
//!
//! A script is a JSON array of steps replayed in order through a
//! [`ProgressEngine`]; the `simulate` command uses it to show how a burst of
//! edits settles.
//!
//! ```json
//! [
//!   { "op": "expand", "task": 10 },
//!   { "op": "progress", "entity": { "kind": "subtask", "id": 101 }, "percent": 100 },
//!   { "op": "wait", "ms": 400 },
//!   { "op": "status", "task": 20, "status": "suspended" }
//! ]
//! ```

use crate::engine::ProgressEngine;
use crate::error::{EngineError, Result};
use crate::model::{EntityRef, Status, TaskId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// One scripted action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Load a task's subtasks.
    Expand { task: TaskId },
    /// Record progress for a task or subtask.
    Progress {
        entity: EntityRef,
        percent: i64,
        #[serde(default)]
        note: String,
    },
    /// Set a task's status explicitly.
    Status { task: TaskId, status: Status },
    /// Let time pass so timers can fire.
    Wait { ms: u64 },
    /// Run the pending recomputation pass now.
    Flush,
    /// Request a throttled rollup refresh.
    Refresh,
}

/// Read a script from a JSON file.
pub fn load_script(path: &Path) -> Result<Vec<Step>> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| {
        EngineError::validation("script", format!("{}: {}", path.display(), e))
    })
}

/// Summary of a replayed script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub steps: usize,
    /// Steps whose remote side failed; local state was kept.
    pub failed_steps: usize,
}

/// Replay `steps` against `engine`, then flush and force a final rollup so
/// the store reflects the authority.
///
/// Remote failures are counted and logged, not fatal. Lookups of unknown
/// entities abort the run, as does a missing project.
pub async fn run_script(engine: &ProgressEngine, steps: &[Step]) -> Result<RunReport> {
    let project_id = engine.project_id()?;
    let mut report = RunReport::default();
    for step in steps {
        report.steps += 1;
        let outcome = match step {
            Step::Expand { task } => engine.ensure_subtasks_loaded(*task).await.map(|_| ()),
            Step::Progress {
                entity,
                percent,
                note,
            } => engine
                .apply_progress(*entity, *percent, note.clone())
                .map(|_| ()),
            Step::Status { task, status } => engine.set_task_status(*task, *status).await,
            Step::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(())
            }
            Step::Flush => {
                engine.flush().await;
                Ok(())
            }
            Step::Refresh => engine.refresh_rollup(project_id).await.map(|_| ()),
        };
        match outcome {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                warn!("Step {} ({:?}) failed remotely: {}", report.steps, step, e);
                report.failed_steps += 1;
            }
            Err(e) => return Err(e),
        }
    }

    engine.flush().await;
    if let Err(e) = engine.force_rollup_refresh(project_id).await {
        warn!("Final rollup refresh failed: {}", e);
    }
    info!(
        "Replayed {} step(s), {} failed remotely",
        report.steps, report.failed_steps
    );
    Ok(report)
}
