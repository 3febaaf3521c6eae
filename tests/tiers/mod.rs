use crate::common::{
    fast_resilience_config, resilience_harness, settle, RecordingSubscriber, ResilienceHarness,
    ScriptedDelegate,
};
use agent_runtime::config::{ResilienceConfig, TierConfig};
use agent_runtime::constants::events;
use agent_runtime::resilience::{ErrorCategory, ErrorClassification, Severity};
use agent_runtime::store::InMemoryAtomicStore;
use agent_runtime::tiers::{
    ExecutionRequest, ExecutionResponse, ExecutionStatus, RunEvent, RunRegistry, RunState,
    TierError, TierExecutor, TierLevel, TierResult, TierStateMachine,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn tier_over(
    harness: &ResilienceHarness,
    level: TierLevel,
    delegate: Arc<dyn TierExecutor>,
) -> Arc<TierStateMachine> {
    Arc::new(TierStateMachine::new(
        level,
        delegate,
        Arc::clone(&harness.facade),
        Arc::clone(&harness.bus),
        Arc::new(RunRegistry::new()),
        TierConfig::default(),
    ))
}

/// coordination → process → execution → `worker`
fn chain(
    harness: &ResilienceHarness,
    worker: Arc<ScriptedDelegate>,
) -> (Arc<TierStateMachine>, Arc<TierStateMachine>) {
    let execution = tier_over(harness, TierLevel::Execution, worker);
    let process = tier_over(harness, TierLevel::Process, execution.clone());
    let coordination = tier_over(harness, TierLevel::Coordination, process);
    (coordination, execution)
}

#[tokio::test]
async fn test_network_timeout_retried_with_escalating_severity() {
    let harness = resilience_harness(ResilienceConfig {
        retry_same_max_attempts: 5,
        ..fast_resilience_config()
    });
    let classified = RecordingSubscriber::attach(
        &harness.bus,
        "classified",
        events::ERROR_CLASSIFIED,
    );
    let worker = Arc::new(ScriptedDelegate::failing(
        4,
        "Network timeout while calling completion endpoint",
    ));
    let tier = tier_over(&harness, TierLevel::Execution, worker.clone());

    let response = tier
        .execute(ExecutionRequest::new("llm_call", json!({"prompt": "hi"})))
        .await
        .unwrap();
    assert_eq!(response.status, ExecutionStatus::Completed);
    assert_eq!(worker.call_count(), 5);

    settle().await;
    let by_attempt: Vec<(u64, ErrorClassification)> = classified
        .events()
        .iter()
        .map(|event| {
            let data = event.data();
            (
                data["attempt_count"].as_u64().unwrap(),
                serde_json::from_value(data["classification"].clone()).unwrap(),
            )
        })
        .collect();
    assert_eq!(by_attempt.len(), 4);

    let (first_attempt, first) = &by_attempt[0];
    let (fourth_attempt, fourth) = &by_attempt[3];
    assert_eq!(*first_attempt, 1);
    assert_eq!(*fourth_attempt, 4);
    assert_eq!(first.category, ErrorCategory::Transient);
    assert_eq!(first.severity, Severity::Warning);
    assert_eq!(fourth.severity, Severity::Error);
    assert!(fourth.confidence_score < first.confidence_score);
}

#[tokio::test]
async fn test_request_narrows_through_every_tier() {
    let harness = resilience_harness(fast_resilience_config());
    let worker = Arc::new(ScriptedDelegate::default());
    let (coordination, _) = chain(&harness, worker.clone());

    let request = ExecutionRequest::new(
        "research",
        json!({
            "coordination": {"goal": "survey"},
            "process": {"plan": ["search", "summarize"]},
            "execution": {"tool": "web_search"},
            "query": "token buckets"
        }),
    )
    .with_execution_id("top-level")
    .with_user_id("user-7");

    let response = coordination.execute(request).await.unwrap();
    assert_eq!(response.execution_id, "top-level");
    assert_eq!(response.status, ExecutionStatus::Completed);

    let calls = worker.calls();
    assert_eq!(calls.len(), 1);
    let leaf = &calls[0];
    assert_ne!(leaf.execution_id, "top-level");
    assert_eq!(leaf.user_id.as_deref(), Some("user-7"));
    assert_eq!(leaf.payload["query"], json!("token buckets"));
    for private in ["coordination", "process", "execution"] {
        assert!(leaf.payload.get(private).is_none(), "{private} leaked");
    }
}

#[tokio::test]
async fn test_unrecoverable_leaf_error_propagates_unchanged() {
    let harness = resilience_harness(fast_resilience_config());
    let worker = Arc::new(ScriptedDelegate::failing(1, "403 Forbidden: api key revoked"));
    let (coordination, execution) = chain(&harness, worker.clone());

    let err = coordination
        .execute(ExecutionRequest::new("publish", json!({})).with_execution_id("job-1"))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "403 Forbidden: api key revoked");
    assert!(matches!(err, TierError::DelegateFailed { .. }));
    // Every tier escalates once and does not retry
    assert_eq!(worker.call_count(), 1);
    assert_eq!(execution.registry().count_in_state(RunState::Failed), 1);
    assert_eq!(
        coordination.get_run("job-1").map(|run| run.state),
        Some(RunState::Failed)
    );
    assert_eq!(harness.facade.get_statistics().escalations, 3);
}

#[tokio::test]
async fn test_run_round_trip_recovers_checkpoint_before_completion() {
    let store = Arc::new(InMemoryAtomicStore::new());
    let registry = RunRegistry::new().with_store(
        store.clone(),
        "agent_runtime",
        Duration::from_secs(60),
    );
    let request = ExecutionRequest::new("index", json!({})).with_execution_id("run-rt");

    registry.create(TierLevel::Process, &request).await.unwrap();
    registry.transition("run-rt", RunEvent::Start).await.unwrap();
    let saved = json!({"cursor": 42, "pending": ["a", "b"]});
    registry
        .transition("run-rt", RunEvent::Checkpoint(saved.clone()))
        .await
        .unwrap();

    assert_eq!(registry.get_checkpoint("run-rt").await.unwrap().data, saved);
    // A fresh registry over the same store sees the mirrored checkpoint
    let restarted = RunRegistry::new().with_store(store, "agent_runtime", Duration::from_secs(60));
    assert_eq!(restarted.get_checkpoint("run-rt").await.unwrap().data, saved);

    let run = registry
        .transition("run-rt", RunEvent::Complete(Some(json!({"indexed": 2}))))
        .await
        .unwrap();
    assert_eq!(run.state, RunState::Completed);
    let states: Vec<RunState> = run.transitions.iter().map(|t| t.to).collect();
    assert_eq!(
        states,
        vec![RunState::Running, RunState::Running, RunState::Completed]
    );
}

struct GatedDelegate {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl TierExecutor for GatedDelegate {
    async fn execute(&self, request: ExecutionRequest) -> TierResult<ExecutionResponse> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(ExecutionResponse::completed(request.execution_id, json!({})))
    }

    fn tier_name(&self) -> &str {
        "gated_worker"
    }
}

#[tokio::test]
async fn test_checkpoint_saved_while_delegate_runs() {
    let harness = resilience_harness(fast_resilience_config());
    let checkpoints = RecordingSubscriber::attach(&harness.bus, "checkpoints", "process/run/");
    let gate = Arc::new(GatedDelegate {
        entered: Notify::new(),
        release: Notify::new(),
    });
    let tier = tier_over(&harness, TierLevel::Process, gate.clone());

    let running = {
        let tier = Arc::clone(&tier);
        tokio::spawn(async move {
            tier.execute(ExecutionRequest::new("plan", json!({})).with_execution_id("run-mid"))
                .await
        })
    };

    gate.entered.notified().await;
    assert_eq!(tier.get_run("run-mid").unwrap().state, RunState::Running);
    tier.save_checkpoint("run-mid", json!({"step": 2}))
        .await
        .unwrap();
    assert_eq!(
        tier.get_checkpoint("run-mid").await.unwrap().data,
        json!({"step": 2})
    );

    gate.release.notify_one();
    let response = running.await.unwrap().unwrap();
    assert_eq!(response.status, ExecutionStatus::Completed);
    assert_eq!(tier.get_run("run-mid").unwrap().state, RunState::Completed);

    settle().await;
    assert_eq!(
        checkpoints.of_type("process/run/checkpoint_saved").len(),
        1
    );
}

#[tokio::test]
async fn test_checkpoint_rejected_outside_running() {
    let harness = resilience_harness(fast_resilience_config());
    let tier = tier_over(
        &harness,
        TierLevel::Execution,
        Arc::new(ScriptedDelegate::default()),
    );
    tier.execute(ExecutionRequest::new("summarize", json!({})).with_execution_id("done"))
        .await
        .unwrap();

    let err = tier
        .save_checkpoint("done", json!({"late": true}))
        .await
        .unwrap_err();
    assert!(matches!(err, TierError::StateMachine(_)));
}
