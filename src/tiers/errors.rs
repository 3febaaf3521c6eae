use super::state_machine::StateMachineError;
use thiserror::Error;

/// Failure surfaced by a tier's `execute`
///
/// A delegate's error is propagated upward unchanged once recovery gives up,
/// so the message a caller sees is the one the failing tier produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TierError {
    /// The delegate reported a failure
    #[error("{message}")]
    DelegateFailed { tier: String, message: String },

    #[error("{tier} delegate timed out after {timeout_ms}ms")]
    Timeout { tier: String, timeout_ms: u64 },

    #[error("{tier} run exceeded {limit} in-progress continuations")]
    ContinuationLimit { tier: String, limit: u32 },

    #[error("{tier} tier is shutting down")]
    ShuttingDown { tier: String },

    #[error("Invalid execution request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    StateMachine(#[from] StateMachineError),
}

impl TierError {
    pub fn delegate_failed(tier: impl Into<String>, message: impl Into<String>) -> Self {
        TierError::DelegateFailed {
            tier: tier.into(),
            message: message.into(),
        }
    }
}

pub type TierResult<T> = Result<T, TierError>;
