#![allow(clippy::doc_markdown)] // Allow technical terms like EMERGENCY_STOP in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Agent Runtime Core
//!
//! Execution-coordination core for a three-tier agent runtime.
//!
//! ## Overview
//!
//! Tiers (coordination, process, execution) delegate opaque units of work one
//! level down. This crate supplies the infrastructure around that delegation:
//! an event bus gated by a multi-key token-bucket rate limiter, an error
//! classifier enriched by a learned pattern library, and a recovery selector
//! that learns from the outcomes it is fed.
//!
//! ## Module Organization
//!
//! - [`store`] - Shared atomic store boundary and in-process implementation
//! - [`events`] - Events, filters, subscriptions and the [`events::EventBus`]
//! - [`rate_limiter`] - Rule precedence, key derivation and token-bucket admission
//! - [`resilience`] - Classification, recovery selection and the resilience façade
//! - [`tiers`] - Run state machine and the generic tier executor
//! - [`architecture`] - Composition root with startup/shutdown order
//! - [`config`] - Configuration loading and validation
//! - [`telemetry`] - Telemetry sink boundary
//! - [`metrics`] - OpenTelemetry instruments
//! - [`logging`] - Structured `tracing` setup
//! - [`error`] - Crate-wide error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agent_runtime::config::RuntimeConfig;
//! use agent_runtime::resilience::{ErrorContext, ErrorClassifier, PatternLibrary, StandardErrorClassifier};
//! use std::sync::Arc;
//!
//! let config = RuntimeConfig::default();
//! let classifier = StandardErrorClassifier::new(config.resilience, Arc::new(PatternLibrary::new()));
//! let classification = classifier.classify(
//!     "connection reset by peer",
//!     &ErrorContext::new("execution_worker", "llm_call"),
//! );
//! println!("{} / {}", classification.category, classification.severity);
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit, integration and property tests
//! ```

pub mod architecture;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod rate_limiter;
pub mod resilience;
pub mod store;
pub mod telemetry;
pub mod tiers;

pub use architecture::{BootstrapOptions, ExecutionArchitecture, SystemStatus};
pub use config::{ConfigLoader, RuntimeConfig};
pub use error::{Result, RuntimeError};
pub use events::{Event, EventBus, EventFilter, Subscription};
pub use rate_limiter::{EventRateLimiter, RateLimitResult};
pub use resilience::{
    ErrorClassification, ErrorClassifier, ErrorContext, RecoveryStrategy, ResilienceInfrastructure,
    StrategyType,
};
pub use tiers::{
    ExecutionRequest, ExecutionResponse, ExecutionStatus, TierExecutor, TierLevel, TierStateMachine,
};
