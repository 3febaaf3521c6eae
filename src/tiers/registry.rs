//! # Run Registry
//!
//! In-process registry of tier runs and their checkpoints.
//!
//! ## Key Features
//!
//! - **Concurrent access** through a sharded map; no guard is held across an await
//! - **Optional mirroring** of every run into the shared store with a TTL;
//!   writes for one run are serialized and never move the mirror backwards
//! - **Checkpoint recovery** from the store when a run is not held locally

use super::state_machine::{
    Checkpoint, Run, RunEvent, RunState, StateMachineError, StateMachineResult,
};
use super::types::{ExecutionRequest, TierLevel};
use crate::store::AtomicStore;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

#[derive(Clone)]
struct RunMirror {
    store: Arc<dyn AtomicStore>,
    namespace: String,
    ttl: Duration,
}

impl RunMirror {
    fn key(&self, execution_id: &str) -> String {
        format!("{}:run:{execution_id}", self.namespace)
    }
}

#[derive(Default)]
pub struct RunRegistry {
    runs: DashMap<String, Run>,
    mirror: Option<RunMirror>,
    /// Last revision written to the mirror, per run
    mirrored: DashMap<String, Arc<AsyncMutex<Option<u64>>>>,
}

impl std::fmt::Debug for RunRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRegistry")
            .field("runs", &self.runs.len())
            .field("mirrored", &self.mirror.is_some())
            .finish()
    }
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror every run into `store` under `namespace`, expiring after `ttl`
    pub fn with_store(
        mut self,
        store: Arc<dyn AtomicStore>,
        namespace: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        self.mirror = Some(RunMirror {
            store,
            namespace: namespace.into(),
            ttl,
        });
        self
    }

    /// Register a new run in `Created`
    pub async fn create(
        &self,
        tier: TierLevel,
        request: &ExecutionRequest,
    ) -> StateMachineResult<Run> {
        let run = Run::new(tier, request);
        match self.runs.entry(run.execution_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(StateMachineError::DuplicateRun(run.execution_id));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(run.clone());
            }
        }
        self.persist(&run).await;
        Ok(run)
    }

    /// Apply `event` to a run and return the updated snapshot
    pub async fn transition(&self, execution_id: &str, event: RunEvent) -> StateMachineResult<Run> {
        let run = {
            let mut entry = self
                .runs
                .get_mut(execution_id)
                .ok_or_else(|| StateMachineError::RunNotFound(execution_id.to_string()))?;
            entry.apply(event)?;
            entry.clone()
        };
        self.persist(&run).await;
        Ok(run)
    }

    /// Record a delegate invocation and the id the delegate received
    pub fn record_attempt(&self, execution_id: &str, child_execution_id: &str) -> StateMachineResult<u32> {
        let mut entry = self
            .runs
            .get_mut(execution_id)
            .ok_or_else(|| StateMachineError::RunNotFound(execution_id.to_string()))?;
        entry.attempts += 1;
        entry.child_execution_ids.push(child_execution_id.to_string());
        Ok(entry.attempts)
    }

    pub fn get(&self, execution_id: &str) -> Option<Run> {
        self.runs.get(execution_id).map(|run| run.clone())
    }

    pub fn state(&self, execution_id: &str) -> Option<RunState> {
        self.runs.get(execution_id).map(|run| run.state)
    }

    /// Latest checkpoint, falling back to the mirrored copy
    pub async fn get_checkpoint(&self, execution_id: &str) -> Option<Checkpoint> {
        if let Some(run) = self.runs.get(execution_id) {
            return run.checkpoint.clone();
        }

        let mirror = self.mirror.as_ref()?;
        match mirror.store.get(&mirror.key(execution_id)).await {
            Ok(Some(raw)) => match serde_json::from_str::<Run>(&raw) {
                Ok(run) => run.checkpoint,
                Err(e) => {
                    warn!(execution_id = %execution_id, error = %e, "Mirrored run is unreadable");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(execution_id = %execution_id, error = %e, "Mirrored run lookup failed");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn count_in_state(&self, state: RunState) -> usize {
        self.runs.iter().filter(|run| run.state == state).count()
    }

    /// Drop terminal runs from local memory; mirrored copies expire on their own
    pub fn evict_terminal(&self) -> usize {
        self.evict_terminal_older_than(Duration::ZERO)
    }

    /// Drop terminal runs last updated at least `retention` ago
    pub fn evict_terminal_older_than(&self, retention: Duration) -> usize {
        let now = Utc::now();
        let before = self.runs.len();
        self.runs.retain(|_, run| {
            let expired = run.state.is_terminal()
                && (now - run.updated_at)
                    .to_std()
                    .is_ok_and(|age| age >= retention);
            !expired
        });
        self.mirrored.retain(|execution_id, _| self.runs.contains_key(execution_id));

        let evicted = before - self.runs.len();
        if evicted > 0 {
            debug!(evicted = evicted, remaining = self.runs.len(), "🧹 TIER: Finished runs evicted");
        }
        evicted
    }

    async fn persist(&self, run: &Run) {
        let Some(mirror) = &self.mirror else {
            return;
        };

        let slot = self
            .mirrored
            .entry(run.execution_id.clone())
            .or_default()
            .clone();
        let mut written = slot.lock().await;
        if (*written).is_some_and(|revision| revision >= run.revision()) {
            debug!(
                execution_id = %run.execution_id,
                revision = run.revision(),
                "Stale run snapshot not mirrored"
            );
            return;
        }

        let raw = match serde_json::to_string(run) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(execution_id = %run.execution_id, error = %e, "Run serialization failed");
                return;
            }
        };

        // Mirroring is best effort; the local registry stays authoritative
        match mirror
            .store
            .set_with_ttl(&mirror.key(&run.execution_id), &raw, mirror.ttl)
            .await
        {
            Ok(()) => {
                *written = Some(run.revision());
                debug!(execution_id = %run.execution_id, state = %run.state, "Run mirrored");
            }
            Err(e) => warn!(
                execution_id = %run.execution_id,
                error = %e,
                "⚠️ TIER: Run mirroring failed"
            ),
        }
    }
}
