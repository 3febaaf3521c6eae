//! # Tier State Machines
//!
//! The three-layer execution hierarchy: coordination delegates to process,
//! process delegates to execution, execution delegates to a leaf worker. Every
//! layer is the same [`TierStateMachine`] behind the [`TierExecutor`] trait,
//! so a tier never knows the concrete type beneath it.

pub mod communication;
pub mod errors;
pub mod registry;
pub mod state_machine;
pub mod tier;
pub mod types;

pub use communication::{FixedResourceProbe, ResourceProbe, TierExecutor};
pub use errors::{TierError, TierResult};
pub use registry::RunRegistry;
pub use state_machine::{
    Checkpoint, Run, RunEvent, RunState, RunTransition, StateMachineError, StateMachineResult,
};
pub use tier::TierStateMachine;
pub use types::{ExecutionRequest, ExecutionResponse, ExecutionStatus, TierLevel};
