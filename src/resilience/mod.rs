//! # Resilience Module
//!
//! Error classification, adaptive recovery selection and the façade the tiers
//! call when work fails.
//!
//! ## Architecture
//!
//! - **Classifier**: vocabulary scoring, severity escalation and learned patterns
//! - **Recovery selector**: ordered decision table informed by past outcomes
//! - **Effectiveness log**: lock-free outcome log folded into a read model
//! - **Circuit breaker**: isolates the shared store from repeated failures
//! - **Infrastructure**: façade publishing decisions on the event bus
//!
//! ## Usage
//!
//! ```rust,no_run
//! use agent_runtime::resilience::{ErrorContext, ResilienceInfrastructure};
//!
//! # async fn example(resilience: &ResilienceInfrastructure) {
//! let context = ErrorContext::new("llm_client", "complete").with_attempt(2);
//! let handled = resilience
//!     .handle_error(&"upstream request timed out", &context, "execution")
//!     .await;
//!
//! if handled.strategy.strategy_type.is_retryable() {
//!     // re-invoke the failed work
//! }
//! # }
//! ```

pub mod circuit_breaker;
pub mod effectiveness;
pub mod error_classifier;
pub mod infrastructure;
pub mod patterns;
pub mod recovery_selector;
pub mod types;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerMetrics,
    CircuitState,
};
pub use effectiveness::{
    ComponentStrategyStats, EffectivenessLog, EffectivenessStatistics, OutcomeRecord,
    OutcomeStats,
};
pub use error_classifier::{ErrorClassifier, StandardErrorClassifier};
pub use infrastructure::{ErrorHandlingResult, ResilienceInfrastructure, ResilienceStatistics};
pub use patterns::{effective_confidence, PatternLibrary, PatternMatch};
pub use recovery_selector::RecoverySelector;
pub use types::{
    ClassificationMetadata, ConditionOperator, ErrorCategory, ErrorClassification, ErrorContext,
    ErrorPattern, Recoverability, RecoveryOutcome, RecoveryStrategy, ResourceState, Severity,
    StrategyType, SystemState, TriggerCondition,
};
