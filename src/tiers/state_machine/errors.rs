use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateMachineError {
    #[error("Invalid transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run already registered: {0}")]
    DuplicateRun(String),

    #[error("Run persistence failed: {0}")]
    Persistence(String),

    #[error("Internal state machine error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for StateMachineError {
    fn from(error: serde_json::Error) -> Self {
        StateMachineError::Internal(format!("Run serialization failed: {error}"))
    }
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
