use pinup_core::types::TaskId;
use thiserror::Error;

/// Content tree mutations that were refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("cannot move {from} to {to}")]
    InvalidMove { from: String, to: String },

    #[error("{path} is a file, not a folder")]
    StructuralMismatch { path: String },

    #[error("invalid path {0:?}")]
    InvalidPath(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    #[error("{name}: no upload response to pin from")]
    MissingPrerequisite { id: TaskId, name: String },

    #[error("task {0} cannot enter the pin stage before its upload succeeded")]
    PinBeforeUpload(TaskId),

    #[error("task {0} is still in flight")]
    TaskActive(TaskId),
}

/// Returned by [`crate::pool::TaskPool::await_idle`] when jobs failed
/// since the previous call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("{} job(s) failed: {}", .0.len(), .0.join("; "))]
    JobsFailed(Vec<String>),
}
