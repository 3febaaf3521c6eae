use crate::common::{fast_resilience_config, resilience_harness, settle, RecordingSubscriber};
use agent_runtime::config::ResilienceConfig;
use agent_runtime::constants::events;
use agent_runtime::resilience::{
    ClassificationMetadata, ErrorCategory, ErrorClassification, ErrorClassifier, ErrorContext,
    PatternLibrary, Recoverability, RecoveryOutcome, ResourceState, Severity,
    StandardErrorClassifier, StrategyType, SystemState,
};
use chrono::Utc;
use std::sync::Arc;

fn classification(category: ErrorCategory, severity: Severity) -> ErrorClassification {
    ErrorClassification {
        category,
        severity,
        recoverability: Recoverability::Manual,
        system_functional: true,
        multiple_components_affected: false,
        data_risk: false,
        security_risk: false,
        confidence_score: 0.8,
        timestamp: Utc::now(),
        metadata: ClassificationMetadata::default(),
    }
}

fn contended() -> ResourceState {
    ResourceState {
        memory_usage: Some(0.93),
        ..ResourceState::default()
    }
}

#[test]
fn test_fatal_non_functional_multi_component_always_stops() {
    let harness = resilience_harness(ResilienceConfig::default());
    let selector = harness.facade.selector();

    for category in [
        ErrorCategory::Transient,
        ErrorCategory::System,
        ErrorCategory::Resource,
        ErrorCategory::Logic,
    ] {
        let mut failure = classification(category, Severity::Fatal);
        failure.system_functional = false;
        failure.multiple_components_affected = true;

        let strategy = selector.select_strategy(&failure, &ErrorContext::new("db", "write"));
        assert_eq!(strategy.strategy_type, StrategyType::EmergencyStop);
        assert_eq!(strategy.max_attempts, 1);
    }
}

#[test]
fn test_security_risk_always_escalates() {
    let harness = resilience_harness(ResilienceConfig::default());
    let selector = harness.facade.selector();

    for category in [ErrorCategory::Security, ErrorCategory::Transient, ErrorCategory::Resource] {
        let mut failure = classification(category, Severity::Error);
        failure.security_risk = true;
        let context = ErrorContext::new("gateway", "call").with_resource_state(contended());

        let strategy = selector.select_strategy(&failure, &context);
        assert_eq!(strategy.strategy_type, StrategyType::EscalateToHuman);
        assert_eq!(strategy.max_attempts, 1);
    }
}

#[test]
fn test_repeated_attempts_escalate_and_lose_confidence() {
    let classifier = StandardErrorClassifier::new(
        ResilienceConfig::default(),
        Arc::new(PatternLibrary::new()),
    );
    let message = "Network timeout while calling upstream";

    let mut previous: Option<ErrorClassification> = None;
    for attempt in 1..=5 {
        let context = ErrorContext::new("llm_client", "complete").with_attempt(attempt);
        let current = classifier.classify(message, &context);
        if let Some(previous) = &previous {
            assert!(current.severity >= previous.severity);
            assert!(current.confidence_score <= previous.confidence_score);
        }
        previous = Some(current);
    }

    let first = classifier.classify(message, &ErrorContext::new("llm_client", "complete"));
    let fourth = classifier.classify(
        message,
        &ErrorContext::new("llm_client", "complete").with_attempt(4),
    );
    assert_eq!(first.severity, Severity::Warning);
    assert_eq!(fourth.severity, Severity::Error);
    assert!(fourth.confidence_score < first.confidence_score);
}

#[test]
fn test_cascading_outage_is_not_functional() {
    let classifier = StandardErrorClassifier::new(
        ResilienceConfig::default(),
        Arc::new(PatternLibrary::new()),
    );
    let context = ErrorContext::new("storage", "flush").with_system_state(SystemState {
        functional: false,
        affected_components: vec!["storage".into(), "index".into(), "cache".into()],
    });

    let result = classifier.classify("connection refused by primary database", &context);
    assert_eq!(result.category, ErrorCategory::System);
    assert!(!result.system_functional);
    assert!(result.multiple_components_affected);
    assert_eq!(result.recoverability, Recoverability::None);
}

#[tokio::test]
async fn test_contention_strategy_follows_recorded_outcomes() {
    let harness = resilience_harness(fast_resilience_config());
    let context = ErrorContext::new("embedding_worker", "batch").with_resource_state(contended());

    let first = harness
        .facade
        .handle_error(&"out of memory while batching", &context, "execution")
        .await;
    assert_eq!(first.classification.category, ErrorCategory::Resource);
    // Equal priors resolve to reducing scope
    assert_eq!(first.strategy.strategy_type, StrategyType::ReduceScope);

    for success in [false, false, false] {
        harness
            .facade
            .record_recovery_outcome(
                &first.classification,
                &context,
                &first.strategy,
                RecoveryOutcome {
                    success,
                    duration_ms: 40,
                    resource_cost: 1.0,
                },
                "execution",
            )
            .await;
    }

    let second = harness
        .facade
        .handle_error(&"out of memory while batching", &context, "execution")
        .await;
    assert_eq!(second.strategy.strategy_type, StrategyType::WaitAndRetry);
    assert!(second.strategy.retry_delay.is_some());

    let stats = harness.facade.get_statistics();
    assert_eq!(stats.effectiveness.total_outcomes, 3);
    assert_eq!(stats.outcomes_recorded, 3);
    assert_eq!(stats.errors_handled, 2);
}

#[tokio::test]
async fn test_facade_publishes_decisions_without_drops() {
    let harness = resilience_harness(fast_resilience_config());
    let decisions = RecordingSubscriber::attach(&harness.bus, "decisions", "resilience/");
    let safety = RecordingSubscriber::attach(&harness.bus, "safety", "safety/");

    let context = ErrorContext::new("auth_gateway", "exchange");
    let handled = harness
        .facade
        .handle_error(&"401 Unauthorized: expired token", &context, "coordination")
        .await;
    assert_eq!(handled.strategy.strategy_type, StrategyType::EscalateToHuman);

    settle().await;
    let classified = decisions.of_type(events::ERROR_CLASSIFIED);
    assert_eq!(classified.len(), 1);
    let published: ErrorClassification =
        serde_json::from_value(classified[0].data()["classification"].clone()).unwrap();
    assert_eq!(published.category, ErrorCategory::Security);
    assert_eq!(decisions.of_type(events::RECOVERY_SELECTED).len(), 1);
    assert_eq!(safety.types(), vec![events::ESCALATED_TO_HUMAN]);

    let stats = harness.facade.get_statistics();
    assert_eq!(stats.events_dropped, 0);
    assert_eq!(stats.publish_failures, 0);
    assert!(stats.average_publish_overhead_ms < 5.0);
    assert_eq!(harness.telemetry.errors().len(), 1);
}

#[tokio::test]
async fn test_injected_pattern_learns_from_outcomes() {
    use agent_runtime::resilience::{ConditionOperator, ErrorPattern, TriggerCondition};

    let harness = resilience_harness(fast_resilience_config());
    let added = RecordingSubscriber::attach(&harness.bus, "patterns", events::PATTERN_ADDED);
    harness
        .facade
        .add_error_pattern(ErrorPattern::new(
            "vector-index-stale",
            "Stale vector index",
            ErrorCategory::Logic,
            Severity::Error,
            vec![TriggerCondition::new(
                "message",
                ConditionOperator::Contains,
                serde_json::json!("stale index"),
                1.0,
            )],
            0.7,
        ))
        .await;

    let context = ErrorContext::new("retriever", "query");
    let handled = harness
        .facade
        .handle_error(&"stale index generation 41", &context, "execution")
        .await;
    assert_eq!(handled.classification.category, ErrorCategory::Logic);
    assert_eq!(
        handled.classification.metadata.matching_patterns,
        vec!["vector-index-stale".to_string()]
    );

    harness
        .facade
        .record_recovery_outcome(
            &handled.classification,
            &context,
            &handled.strategy,
            RecoveryOutcome {
                success: true,
                duration_ms: 300,
                resource_cost: 0.0,
            },
            "execution",
        )
        .await;

    let learned = harness.patterns.get("vector-index-stale").unwrap();
    assert_eq!(learned.frequency, 1);
    assert_eq!(learned.success_rate, 1.0);
    settle().await;
    assert_eq!(added.events().len(), 1);
    assert_eq!(harness.telemetry.completions().len(), 1);
}
