//! Engine error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::SubtaskId;

/// Result type used across the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Invocation-level failure.
///
/// Every variant ends the episode in `Error`. Item-level failures are not
/// represented here: they are recorded inline as [`ItemError`] and never
/// abort a step. Running out of budget is not an error either.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A value failed validation (e.g. malformed job parameters).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The work manifest could not be loaded or built.
    #[error("manifest construction failed: {0}")]
    Manifest(String),

    /// A worker thread terminated abnormally (panic, failed to start).
    #[error("worker {worker} terminated abnormally: {reason}")]
    PoolFault { worker: String, reason: String },

    /// A heterogeneous subtask reported an internal error.
    #[error("subtask {subtask} failed: {reason}")]
    SubtaskFault { subtask: SubtaskId, reason: String },

    /// Durable storage rejected a write.
    #[error("store unavailable: {0}")]
    Store(String),

    /// The replayed episode state does not match the manifest.
    #[error("invalid episode state: {0}")]
    InvalidState(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest(msg.into())
    }

    pub fn pool_fault(worker: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PoolFault {
            worker: worker.into(),
            reason: reason.into(),
        }
    }

    pub fn subtask_fault(subtask: SubtaskId, reason: impl Into<String>) -> Self {
        Self::SubtaskFault {
            subtask,
            reason: reason.into(),
        }
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

/// Failure of a single work item.
///
/// Merged into the output next to successful results; the worker moves on to
/// the next item of its stride.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct ItemError {
    pub message: String,
}

impl ItemError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
