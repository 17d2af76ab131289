//! Persisted lifecycle state of an upload task
//!
//! Each variant maps to one status string in the task store, so a task is always
//! in exactly one of these states.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task created, no leg has started
    #[default]
    Pending,
    /// At least one leg is uploading
    Running,
    /// Every leg succeeded, the catalog commit is outstanding
    Uploaded,
    /// A leg or the catalog commit failed; the reason is kept verbatim
    Failed(String),
    /// Model committed to the catalog
    Finished,
    /// The process exited while the task was still active
    Interrupted,
}

impl TaskStatus {
    /// Returns true once nothing will change this task any more
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Failed(_) | TaskStatus::Finished)
    }

    /// Returns true while legs or the commit may still report
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::Uploaded)
    }

    /// Returns the failure reason, if any
    pub fn error(&self) -> Option<&str> {
        match self {
            TaskStatus::Failed(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        TaskStatus::Failed(reason.into())
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "Pending"),
            TaskStatus::Running => write!(f, "Running"),
            TaskStatus::Uploaded => write!(f, "Uploaded"),
            TaskStatus::Failed(msg) => write!(f, "Failed: {}", msg),
            TaskStatus::Finished => write!(f, "Finished"),
            TaskStatus::Interrupted => write!(f, "Interrupted"),
        }
    }
}
