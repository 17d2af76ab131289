//! Messages flowing from legs to their aggregator and from the aggregator to observers

use crate::model::error::{CatalogError, LegFailure};
use crate::model::leg::{CombinedResult, LegId, LegPayload};
use crate::model::task_id::TaskId;

/// One report from a running leg
#[derive(Debug, Clone, PartialEq)]
pub enum LegEvent {
    /// Leg-local progress in percent (0-100) with a status line
    Progress { percent: f64, message: String },
    /// Terminal: the leg stored everything
    Succeeded(LegPayload),
    /// Terminal: the leg gave up
    Failed(LegFailure),
}

impl LegEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LegEvent::Progress { .. })
    }
}

/// A leg event tagged with where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct LegEnvelope {
    pub task_id: TaskId,
    pub leg: LegId,
    pub event: LegEvent,
}

/// Events broadcast to every observer of the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// Combined progress over all legs that have reported so far
    Progress {
        task_id: TaskId,
        percent: u8,
        message: String,
    },
    /// Every leg succeeded
    Uploaded {
        task_id: TaskId,
        results: CombinedResult,
    },
    /// The first leg failure; the task is over
    Failed {
        task_id: TaskId,
        failure: LegFailure,
    },
    /// The catalog accepted the model
    Committed { task_id: TaskId, model_id: String },
    /// The catalog commit failed; uploads stay in place
    CommitFailed { task_id: TaskId, error: CatalogError },
    /// The aggregator of this task has stopped
    Finished { task_id: TaskId },
}

impl TaskEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskEvent::Progress { task_id, .. }
            | TaskEvent::Uploaded { task_id, .. }
            | TaskEvent::Failed { task_id, .. }
            | TaskEvent::Committed { task_id, .. }
            | TaskEvent::CommitFailed { task_id, .. }
            | TaskEvent::Finished { task_id } => *task_id,
        }
    }
}
