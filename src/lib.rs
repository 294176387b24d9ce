//! sitetrack - progress and status aggregation for construction projects
//!
//! Projects contain tasks, tasks contain subtasks, and every level shows a
//! completion percentage and a status. This crate keeps that three-level
//! rollup consistent while the user edits subtasks in quick succession, and
//! bounds how often it talks to the remote authority that owns the records.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`model`] - Entities, statuses and percent clamping
//! - [`inference`] - Pure task status inference from subtask state
//! - [`cache`] - Versioned progress cache
//! - [`store`] - Session-owned entity lists plus the cache
//! - [`scheduler`] - Debounced recomputation and throttled rollup refresh
//! - [`fetch`] - Lazy subtask loading with retry
//! - [`engine`] - The optimistic mutation pipeline tying it all together
//! - [`remote`] - Service contracts and an in-memory implementation
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Custom error types and handling
//! - [`testing`] - Test doubles and assertions
//!
//! # Example
//!
//! ```rust,ignore
//! use sitetrack::{EngineConfig, EntityRef, InMemoryBackend, ProgressEngine, TokioClock};
//! use std::sync::Arc;
//!
//! let backend = Arc::new(InMemoryBackend::from_fixture(fixture));
//! let engine = ProgressEngine::new(
//!     backend.clone(),
//!     backend.clone(),
//!     Arc::new(TokioClock),
//!     EngineConfig::load(".")?,
//! );
//!
//! engine.load_project(1).await?;
//! engine.ensure_subtasks_loaded(10).await?;
//! engine.apply_progress(EntityRef::subtask(101), 100, "slab poured")?;
//! engine.flush().await;
//! println!("task 10 is {:?}", engine.status_of(10));
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod inference;
pub mod model;
pub mod remote;
pub mod retry;
pub mod scheduler;
pub mod simulate;
pub mod store;
pub mod testing;

// Re-export commonly used types
pub use error::{EngineError, Result};

pub use cache::{MergeOutcome, ProgressCache, Sequence};
pub use clock::{Clock, TokioClock};
pub use config::{ConfigIssue, EngineConfig, ValidationReport};
pub use engine::{ProgressEngine, RefreshOutcome};
pub use fetch::{FetchCoordinator, LoadOutcome};
pub use inference::{explain, infer_status, settle_status, InferenceRule, SubtaskSignal};
pub use model::{
    clamp_percent, EntityKind, EntityRef, ProgressRecord, Project, ProjectId, Status, Subtask,
    SubtaskId, Task, TaskId,
};
pub use remote::{
    BackendFixture, DetailedProjectProgress, InMemoryBackend, ProgressService, ServiceResponse,
    TaskService,
};
pub use retry::{Backoff, RetryPolicy};
pub use scheduler::Scheduler;
pub use store::{EngineSnapshot, LoadState, Store};
pub use testing::ManualClock;
