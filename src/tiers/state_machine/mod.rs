// Run state machine shared by every tier
//
// Created -> Running -> {Completed | Failed}, with Running permitting
// re-entrant checkpoint saves.

pub mod errors;
pub mod events;
pub mod run;
pub mod states;

// Re-export main types for convenient access
pub use errors::{StateMachineError, StateMachineResult};
pub use events::RunEvent;
pub use run::{determine_target_state, Checkpoint, Run, RunTransition};
pub use states::RunState;
