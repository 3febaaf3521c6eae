//! # Tier State Machine
//!
//! Mechanism-only orchestration shared by the coordination, process and
//! execution tiers. A tier registers a run, narrows the request, delegates it
//! to the executor beneath it and reports every lifecycle step on the event
//! bus. It holds no tier-specific heuristics: those belong to subscribers
//! reacting to the events it publishes.
//!
//! ```text
//! execute(request)
//!   ├─ Created ──start──▶ Running ──┬─ delegate ok ─────────▶ Completed
//!   │                               ├─ delegate in progress ─▶ checkpoint, resume
//!   │                               └─ delegate error ──▶ resilience.handle_error
//!   │                                     ├─ retryable, attempts left ─▶ retry
//!   │                                     └─ otherwise ────────────────▶ Failed
//! ```

use super::communication::{ResourceProbe, TierExecutor};
use super::errors::{TierError, TierResult};
use super::registry::RunRegistry;
use super::state_machine::{Checkpoint, Run, RunEvent};
use super::types::{ExecutionRequest, ExecutionResponse, ExecutionStatus, TierLevel};
use crate::config::TierConfig;
use crate::constants::events;
use crate::events::{Event, EventBus};
use crate::logging::log_tier_operation;
use crate::resilience::{
    ErrorContext, ErrorHandlingResult, RecoveryOutcome, ResilienceInfrastructure, ResourceState,
    StrategyType,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Recovery applied before the current attempt, settled once it resolves
struct PendingRecovery {
    handled: ErrorHandlingResult,
    context: ErrorContext,
    decided_at: Instant,
}

pub struct TierStateMachine {
    level: TierLevel,
    delegate: Arc<dyn TierExecutor>,
    resilience: Arc<ResilienceInfrastructure>,
    bus: Arc<EventBus>,
    registry: Arc<RunRegistry>,
    probe: Option<Arc<dyn ResourceProbe>>,
    config: TierConfig,
    accepting: AtomicBool,
}

impl std::fmt::Debug for TierStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierStateMachine")
            .field("level", &self.level)
            .field("delegate", &self.delegate.tier_name())
            .field("runs", &self.registry.len())
            .field("accepting", &self.is_accepting())
            .finish_non_exhaustive()
    }
}

impl TierStateMachine {
    pub fn new(
        level: TierLevel,
        delegate: Arc<dyn TierExecutor>,
        resilience: Arc<ResilienceInfrastructure>,
        bus: Arc<EventBus>,
        registry: Arc<RunRegistry>,
        config: TierConfig,
    ) -> Self {
        info!(
            tier = %level,
            delegate = %delegate.tier_name(),
            "🧭 TIER: State machine initialized"
        );
        Self {
            level,
            delegate,
            resilience,
            bus,
            registry,
            probe: None,
            config,
            accepting: AtomicBool::new(true),
        }
    }

    pub fn with_resource_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn level(&self) -> TierLevel {
        self.level
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    pub fn get_run(&self, execution_id: &str) -> Option<Run> {
        self.registry.get(execution_id)
    }

    pub async fn get_checkpoint(&self, execution_id: &str) -> Option<Checkpoint> {
        self.registry.get_checkpoint(execution_id).await
    }

    /// Save a checkpoint for a running execution and announce it
    pub async fn save_checkpoint(&self, execution_id: &str, data: Value) -> TierResult<Checkpoint> {
        let run = self
            .registry
            .transition(execution_id, RunEvent::Checkpoint(data))
            .await?;
        let checkpoint = run.checkpoint.ok_or_else(|| {
            TierError::InvalidRequest(format!("checkpoint missing after save for {execution_id}"))
        })?;

        self.publish(
            events::RUN_CHECKPOINT_SAVED,
            execution_id,
            json!({
                "execution_id": execution_id,
                "sequence": checkpoint.sequence,
                "checkpoint": checkpoint.data,
            }),
        )
        .await;
        Ok(checkpoint)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Refuse new executions; runs already in flight finish normally
    pub fn stop(&self) {
        self.accepting.store(false, Ordering::Release);
        info!(tier = %self.level, "🧭 TIER: Stopped accepting executions");
    }

    async fn run_execution(&self, request: ExecutionRequest) -> TierResult<ExecutionResponse> {
        let execution_id = request.execution_id.clone();
        self.registry.create(self.level, &request).await?;
        self.publish(
            events::RUN_CREATED,
            &execution_id,
            json!({
                "execution_id": execution_id,
                "type": request.request_type,
                "user_id": request.user_id,
            }),
        )
        .await;

        self.registry
            .transition(&execution_id, RunEvent::Start)
            .await?;
        self.publish(
            events::RUN_STARTED,
            &execution_id,
            json!({"execution_id": execution_id}),
        )
        .await;
        log_tier_operation(self.level.as_str(), "execute", Some(&execution_id), "running", None);

        let mut attempt: u32 = 1;
        let mut previous_strategies: Vec<StrategyType> = Vec::new();
        let mut pending: Option<PendingRecovery> = None;
        let mut resume_from: Option<Value> = None;
        let mut continuations: u32 = 0;

        loop {
            let resources = self.sample_resources(&execution_id).await;

            let mut child = request.narrow_for(self.level);
            if let (Some(checkpoint), Value::Object(payload)) = (&resume_from, &mut child.payload) {
                payload.insert("checkpoint".to_string(), checkpoint.clone());
            }
            self.registry
                .record_attempt(&execution_id, &child.execution_id)?;
            let child_execution_id = child.execution_id.clone();

            let error = match self.invoke_delegate(child).await {
                Ok(response) if response.status == ExecutionStatus::InProgress => {
                    continuations += 1;
                    if continuations > self.config.max_continuations {
                        let error = TierError::ContinuationLimit {
                            tier: self.level.as_str().to_string(),
                            limit: self.config.max_continuations,
                        };
                        return self.fail(&execution_id, error).await;
                    }

                    let checkpoint = response.data.unwrap_or(Value::Null);
                    self.save_checkpoint(&execution_id, checkpoint.clone())
                        .await?;
                    resume_from = Some(checkpoint);
                    continue;
                }
                Ok(response) if response.status == ExecutionStatus::Completed => {
                    self.settle_recovery(pending.take(), true).await;
                    return self
                        .complete(&execution_id, &child_execution_id, response)
                        .await;
                }
                Ok(response) => TierError::delegate_failed(
                    self.delegate.tier_name(),
                    response
                        .error
                        .unwrap_or_else(|| "delegate reported failure".to_string()),
                ),
                Err(error) => error,
            };

            self.settle_recovery(pending.take(), false).await;

            let context = ErrorContext::new(self.delegate.tier_name(), request.request_type.clone())
                .with_tier(self.level)
                .with_attempt(attempt)
                .with_previous_strategies(previous_strategies.clone())
                .with_resource_state(resources);
            let handled = self
                .resilience
                .handle_error(&error, &context, self.level.as_str())
                .await;
            let strategy = &handled.strategy;

            if !strategy.strategy_type.is_retryable() || attempt >= strategy.max_attempts {
                debug!(
                    tier = %self.level,
                    execution_id = %execution_id,
                    strategy = %strategy.strategy_type,
                    attempt = attempt,
                    "No further recovery for run"
                );
                return self.fail(&execution_id, error).await;
            }

            warn!(
                tier = %self.level,
                execution_id = %execution_id,
                attempt = attempt,
                max_attempts = strategy.max_attempts,
                strategy = %strategy.strategy_type,
                error = %error,
                "🔁 TIER: Delegate failed, retrying"
            );
            self.publish(
                events::RUN_RETRY_SCHEDULED,
                &execution_id,
                json!({
                    "execution_id": execution_id,
                    "attempt": attempt,
                    "strategy": strategy.strategy_type,
                    "retry_delay_ms": strategy.retry_delay.map(|d| d.as_millis() as u64),
                }),
            )
            .await;

            if let Some(delay) = strategy.retry_delay {
                sleep(delay).await;
            }

            previous_strategies.push(strategy.strategy_type);
            pending = Some(PendingRecovery {
                handled,
                context,
                decided_at: Instant::now(),
            });
            attempt += 1;
        }
    }

    async fn invoke_delegate(&self, request: ExecutionRequest) -> TierResult<ExecutionResponse> {
        match timeout(self.config.delegate_timeout(), self.delegate.execute(request)).await {
            Ok(result) => result,
            Err(_) => Err(TierError::Timeout {
                tier: self.delegate.tier_name().to_string(),
                timeout_ms: self.config.delegate_timeout_ms,
            }),
        }
    }

    async fn complete(
        &self,
        execution_id: &str,
        child_execution_id: &str,
        response: ExecutionResponse,
    ) -> TierResult<ExecutionResponse> {
        if let Some(checkpoint) = response
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.get("checkpoint"))
        {
            self.save_checkpoint(execution_id, checkpoint.clone())
                .await?;
        }

        let run = self
            .registry
            .transition(execution_id, RunEvent::Complete(response.data.clone()))
            .await?;
        self.publish(
            events::RUN_COMPLETED,
            execution_id,
            json!({
                "execution_id": execution_id,
                "attempts": run.attempts,
            }),
        )
        .await;
        log_tier_operation(self.level.as_str(), "execute", Some(execution_id), "completed", None);

        let mut result = ExecutionResponse {
            execution_id: execution_id.to_string(),
            status: ExecutionStatus::Completed,
            data: response.data,
            error: None,
            metadata: response.metadata,
        }
        .with_metadata("tier", json!(self.level))
        .with_metadata("attempts", json!(run.attempts))
        .with_metadata("child_execution_id", json!(child_execution_id));
        if let Some(checkpoint) = run.checkpoint {
            result = result.with_metadata("checkpoint", checkpoint.data);
        }
        Ok(result)
    }

    async fn fail(&self, execution_id: &str, error: TierError) -> TierResult<ExecutionResponse> {
        let message = error.to_string();
        if let Err(transition_error) = self
            .registry
            .transition(execution_id, RunEvent::Fail(message.clone()))
            .await
        {
            warn!(
                execution_id = %execution_id,
                error = %transition_error,
                "Run could not be marked failed"
            );
        }

        self.publish(
            events::RUN_FAILED,
            execution_id,
            json!({
                "execution_id": execution_id,
                "error": message,
            }),
        )
        .await;
        log_tier_operation(
            self.level.as_str(),
            "execute",
            Some(execution_id),
            "failed",
            Some(&message),
        );
        Err(error)
    }

    /// Record whether the recovery applied before this attempt worked
    async fn settle_recovery(&self, pending: Option<PendingRecovery>, success: bool) {
        let Some(pending) = pending else {
            return;
        };

        self.resilience
            .record_recovery_outcome(
                &pending.handled.classification,
                &pending.context,
                &pending.handled.strategy,
                RecoveryOutcome {
                    success,
                    duration_ms: pending.decided_at.elapsed().as_millis() as u64,
                    resource_cost: 1.0,
                },
                self.level.as_str(),
            )
            .await;
    }

    async fn sample_resources(&self, execution_id: &str) -> ResourceState {
        let Some(probe) = &self.probe else {
            return ResourceState::default();
        };

        let reading = probe.sample().await;
        self.publish(
            events::RESOURCE_READING,
            execution_id,
            json!({
                "execution_id": execution_id,
                "reading": reading,
            }),
        )
        .await;
        reading
    }

    async fn publish(&self, suffix: &str, execution_id: &str, data: Value) {
        let event = Event::for_tier(self.level, suffix, data).with_correlation_id(execution_id);
        if let Err(e) = self.bus.publish(event).await {
            warn!(
                tier = %self.level,
                event = %suffix,
                error = %e,
                "⚠️ TIER: Lifecycle event not published"
            );
        }
    }
}

#[async_trait]
impl TierExecutor for TierStateMachine {
    async fn execute(&self, request: ExecutionRequest) -> TierResult<ExecutionResponse> {
        if !self.is_accepting() {
            return Err(TierError::ShuttingDown {
                tier: self.level.as_str().to_string(),
            });
        }
        if request.execution_id.is_empty() {
            return Err(TierError::InvalidRequest(
                "execution id must not be empty".to_string(),
            ));
        }

        self.run_execution(request).await
    }

    fn tier_name(&self) -> &str {
        self.level.as_str()
    }
}
