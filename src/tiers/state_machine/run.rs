use super::{
    errors::{StateMachineError, StateMachineResult},
    events::RunEvent,
    states::RunState,
};
use crate::tiers::types::{ExecutionRequest, TierLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Latest checkpoint saved by a running tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Increments with every save within the run
    pub sequence: u64,
    pub data: Value,
    pub saved_at: DateTime<Utc>,
}

/// One applied transition, kept for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTransition {
    pub from: RunState,
    pub to: RunState,
    pub event: String,
    pub at: DateTime<Utc>,
}

/// A single execution of one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub execution_id: String,
    pub tier: TierLevel,
    pub request_type: String,
    pub user_id: Option<String>,
    pub state: RunState,
    /// Delegate invocations so far
    pub attempts: u32,
    /// Execution ids handed to the delegate, one per attempt
    pub child_execution_ids: Vec<String>,
    pub checkpoint: Option<Checkpoint>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub transitions: Vec<RunTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(tier: TierLevel, request: &ExecutionRequest) -> Self {
        let now = Utc::now();
        Self {
            execution_id: request.execution_id.clone(),
            tier,
            request_type: request.request_type.clone(),
            user_id: request.user_id.clone(),
            state: RunState::Created,
            attempts: 0,
            child_execution_ids: Vec::new(),
            checkpoint: None,
            result: None,
            error: None,
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Number of applied transitions; orders snapshots of the same run
    pub fn revision(&self) -> u64 {
        self.transitions.len() as u64
    }

    /// Apply `event`, returning the new state
    pub fn apply(&mut self, event: RunEvent) -> StateMachineResult<RunState> {
        let from = self.state;
        let to = determine_target_state(from, &event)?;
        let now = Utc::now();

        match &event {
            RunEvent::Checkpoint(data) => {
                let sequence = self.checkpoint.as_ref().map_or(1, |c| c.sequence + 1);
                self.checkpoint = Some(Checkpoint {
                    sequence,
                    data: data.clone(),
                    saved_at: now,
                });
            }
            RunEvent::Complete(result) => self.result = result.clone(),
            RunEvent::Fail(message) => self.error = Some(message.clone()),
            RunEvent::Start => {}
        }

        self.transitions.push(RunTransition {
            from,
            to,
            event: event.event_type().to_string(),
            at: now,
        });
        self.state = to;
        self.updated_at = now;
        Ok(to)
    }
}

/// Determine the target state based on current state and event
pub fn determine_target_state(current: RunState, event: &RunEvent) -> StateMachineResult<RunState> {
    let target = match (current, event) {
        (RunState::Created, RunEvent::Start) => RunState::Running,

        // Checkpoints are re-entrant while running
        (RunState::Running, RunEvent::Checkpoint(_)) => RunState::Running,

        (RunState::Running, RunEvent::Complete(_)) => RunState::Completed,

        (RunState::Running, RunEvent::Fail(_)) => RunState::Failed,
        (RunState::Created, RunEvent::Fail(_)) => RunState::Failed,

        (from, event) => {
            return Err(StateMachineError::InvalidTransition {
                from: from.to_string(),
                event: event.event_type().to_string(),
            })
        }
    };

    Ok(target)
}
