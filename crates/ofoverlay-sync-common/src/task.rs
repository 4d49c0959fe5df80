//! Task processing status and result types.

use serde::Serialize;
use thiserror::Error;

/// Result of processing a synchronization pass or a single desired record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task completed successfully
    Success,
    /// Task failed due to invalid input
    InvalidEntry,
    /// Task failed (generic)
    Failed,
    /// Task was ignored (unsupported or stubbed)
    Ignore,
    /// Task is waiting for a collaborator to resolve something
    WaitingForDependency,
}

impl TaskStatus {
    /// Returns true if the task completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Ignore)
    }

    /// Returns true if the task failed permanently.
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskStatus::InvalidEntry | TaskStatus::Failed)
    }
}

/// Error type for per-item processing failures.
///
/// None of these abort a pass: the item is logged and skipped.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// Input record is missing required data
    #[error("Invalid entry: {message}")]
    InvalidEntry { message: String },

    /// A collaborator could not resolve something the record depends on
    #[error("Unresolved {what}")]
    Unresolved { what: String },

    /// The record needs a feature that is not implemented
    #[error("Unsupported: {feature}")]
    Unsupported { feature: String },

    /// The device-state store rejected a read or a commit
    #[error("Store error: {message}")]
    Store { message: String },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TaskError {
    /// Creates an invalid entry error.
    pub fn invalid_entry(message: impl Into<String>) -> Self {
        TaskError::InvalidEntry {
            message: message.into(),
        }
    }

    /// Creates an unresolved-dependency error.
    pub fn unresolved(what: impl Into<String>) -> Self {
        TaskError::Unresolved { what: what.into() }
    }

    /// Creates an unsupported-feature error.
    pub fn unsupported(feature: impl Into<String>) -> Self {
        TaskError::Unsupported {
            feature: feature.into(),
        }
    }

    /// Creates a store error.
    pub fn store(message: impl Into<String>) -> Self {
        TaskError::Store {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        TaskError::Internal {
            message: message.into(),
        }
    }

    /// Converts this error to a TaskStatus.
    pub fn to_status(&self) -> TaskStatus {
        match self {
            TaskError::InvalidEntry { .. } => TaskStatus::InvalidEntry,
            TaskError::Unresolved { .. } => TaskStatus::WaitingForDependency,
            TaskError::Unsupported { .. } => TaskStatus::Ignore,
            TaskError::Store { .. } => TaskStatus::Failed,
            TaskError::Internal { .. } => TaskStatus::Failed,
        }
    }
}

/// Result type for task processing.
pub type TaskResult<T> = Result<T, TaskError>;

/// Extension trait for converting TaskResult to TaskStatus.
pub trait TaskResultExt {
    /// Converts this result to a TaskStatus.
    fn to_status(&self) -> TaskStatus;
}

impl<T> TaskResultExt for TaskResult<T> {
    fn to_status(&self) -> TaskStatus {
        match self {
            Ok(_) => TaskStatus::Success,
            Err(e) => e.to_status(),
        }
    }
}
