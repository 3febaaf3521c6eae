//! Error types for the agent runtime core.
//!

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("Store error: {0}")]
    StoreError(String),
    #[error("Event error: {0}")]
    EventError(String),
    #[error("Rate limit error: {0}")]
    RateLimitError(String),
    #[error("Resilience error: {0}")]
    ResilienceError(String),
    #[error("State transition error: {0}")]
    StateTransitionError(String),
    #[error("Tier execution error: {0}")]
    TierError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Timeout error: {0}")]
    Timeout(String),
    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for RuntimeError {
    fn from(error: serde_json::Error) -> Self {
        RuntimeError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

impl From<crate::store::StoreError> for RuntimeError {
    fn from(error: crate::store::StoreError) -> Self {
        RuntimeError::StoreError(error.to_string())
    }
}

impl From<crate::events::PublishError> for RuntimeError {
    fn from(error: crate::events::PublishError) -> Self {
        RuntimeError::EventError(error.to_string())
    }
}

impl From<crate::config::ConfigurationError> for RuntimeError {
    fn from(error: crate::config::ConfigurationError) -> Self {
        RuntimeError::ConfigurationError(error.to_string())
    }
}

impl From<crate::tiers::StateMachineError> for RuntimeError {
    fn from(error: crate::tiers::StateMachineError) -> Self {
        RuntimeError::StateTransitionError(error.to_string())
    }
}

impl From<crate::tiers::TierError> for RuntimeError {
    fn from(error: crate::tiers::TierError) -> Self {
        RuntimeError::TierError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
