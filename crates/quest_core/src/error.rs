//! crates/quest_core/src/error.rs
//!
//! The error taxonomy returned by engine operations.

use crate::domain::{TaskId, UserId};
use crate::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The anti-abuse guard tripped. Carries a machine-readable flag for clients.
    #[error("Too many completions in a short time")]
    RateExceeded { cheating_detected: bool },

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A task flag combination the completion path never produces.
    #[error("Task {task_id} is in an inconsistent state")]
    InconsistentState { task_id: TaskId },

    #[error("User {user_id} has no character yet")]
    CharacterNotFound { user_id: UserId },

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Unauthorized")]
    Unauthorized,

    /// A store failure inside an operation. The transaction was rolled back.
    #[error("Operation failed")]
    OperationFailed(#[source] PortError),
}

impl From<PortError> for EngineError {
    fn from(e: PortError) -> Self {
        match e {
            PortError::NotFound(what) => EngineError::NotFound(what),
            PortError::Conflict(what) => EngineError::Conflict(what),
            PortError::Unauthorized => EngineError::Unauthorized,
            other => EngineError::OperationFailed(other),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
