//! Shared store error types

use thiserror::Error;

/// Errors returned by [`AtomicStore`](super::AtomicStore) implementations
///
/// `Unavailable` and `Timeout` describe infrastructure that could not be
/// reached. Everything else is an unexpected fault in a reachable store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backend could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The operation exceeded its deadline
    #[error("Store operation timed out: {0}")]
    Timeout(String),

    /// The script hash is unknown to the backend (e.g. after a flush)
    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    /// The backend rejected or failed the operation
    #[error("Store backend error: {0}")]
    Backend(String),

    /// The backend answered with something the caller cannot interpret
    #[error("Malformed store response: {0}")]
    MalformedResponse(String),
}

impl StoreError {
    /// True for failures where the store itself could not be reached
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
