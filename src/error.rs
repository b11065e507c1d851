use thiserror::Error;

use crate::runtime::task::TaskId;

/// Errors raised by the flow API itself. Task failures never surface here;
/// they travel as values through the fail callbacks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("Task not found: {0}")]
    UnknownTask(TaskId),

    #[error("Duplicate task id: {0}")]
    DuplicateTask(TaskId),

    #[error("Action not registered: {0}")]
    UnknownAction(String),

    #[error("Invalid plan: {reason}")]
    InvalidPlan { reason: String },
}
