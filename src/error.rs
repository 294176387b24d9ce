//! Custom error types for sitetrack.
//!
//! Remote failures are caught close to the call site and degrade to cached
//! values, but every fallible operation still reports through [`EngineError`]
//! so callers can decide whether to surface, retry, or ignore.

use crate::model::EntityRef;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    // =========================================================================
    // Network Errors
    // =========================================================================
    /// A remote call failed before producing a response
    #[error("Remote call '{operation}' failed: {message}")]
    Network { operation: String, message: String },

    /// The remote service answered with `success = false`
    #[error("Remote call '{operation}' was rejected: {message}")]
    Rejected { operation: String, message: String },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// Input outside the accepted domain
    #[error("Invalid value for {field}: {reason}")]
    Validation { field: String, reason: String },

    // =========================================================================
    // Staleness Errors
    // =========================================================================
    /// A response arrived after newer state had already been applied
    #[error("Stale update for {entity}: sequence {sequence} superseded by {applied}")]
    Stale {
        entity: EntityRef,
        sequence: u64,
        applied: u64,
    },

    // =========================================================================
    // Lookup Errors
    // =========================================================================
    /// Task not present in the session store
    #[error("Unknown task: {task_id}")]
    UnknownTask { task_id: u64 },

    /// Subtask not present in the session store
    #[error("Unknown subtask: {subtask_id}")]
    UnknownSubtask { subtask_id: u64 },

    /// An operation needed a project but none has been loaded
    #[error("No project loaded")]
    NoProjectLoaded,

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a network error
    pub fn network(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a rejection error
    pub fn rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error came from a remote collaborator
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Rejected { .. })
    }

    /// Check if retrying or waiting for the next refresh may clear the error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Rejected { .. } | Self::Stale { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Network { .. } | Self::Rejected { .. } => 2,
            Self::Validation { .. } => 3,
            Self::UnknownTask { .. } | Self::UnknownSubtask { .. } | Self::NoProjectLoaded => 4,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            _ => 1,
        }
    }
}

/// Type alias for engine results
pub type Result<T> = std::result::Result<T, EngineError>;
