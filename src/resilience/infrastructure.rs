//! # Resilience Infrastructure
//!
//! Façade the tiers call when a delegate fails. It runs the classifier and the
//! recovery selector, publishes the decision on the event bus, and forwards an
//! error record to telemetry. Bus and telemetry failures are logged and
//! swallowed: they never reach the caller's error path.

use super::error_classifier::ErrorClassifier;
use super::effectiveness::EffectivenessStatistics;
use super::patterns::PatternLibrary;
use super::recovery_selector::RecoverySelector;
use super::types::{
    ErrorClassification, ErrorContext, ErrorPattern, RecoveryOutcome, RecoveryStrategy,
    StrategyType,
};
use crate::constants::events;
use crate::events::{DeliveryGuarantee, Event, EventBus, Priority};
use crate::logging::log_recovery_decision;
use crate::metrics;
use crate::telemetry::{ErrorRecord, TaskCompletionRecord, TelemetrySink};
use chrono::Utc;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// What `handle_error` hands back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorHandlingResult {
    pub classification: ErrorClassification,
    pub strategy: RecoveryStrategy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResilienceStatistics {
    pub events_published: u64,
    /// Must stay zero under normal operation
    pub events_dropped: u64,
    pub average_publish_overhead_ms: f64,
    pub errors_handled: u64,
    pub emergency_stops: u64,
    pub escalations: u64,
    /// Façade events the bus refused (rate limited, timed out or shutting down)
    pub publish_failures: u64,
    pub outcomes_recorded: u64,
    pub patterns: usize,
    pub effectiveness: EffectivenessStatistics,
}

#[derive(Debug, Default)]
struct FacadeCounters {
    errors_handled: AtomicU64,
    emergency_stops: AtomicU64,
    escalations: AtomicU64,
    publish_failures: AtomicU64,
    outcomes_recorded: AtomicU64,
}

pub struct ResilienceInfrastructure {
    classifier: Arc<dyn ErrorClassifier>,
    selector: Arc<RecoverySelector>,
    patterns: Arc<PatternLibrary>,
    bus: Arc<EventBus>,
    telemetry: Arc<dyn TelemetrySink>,
    counters: FacadeCounters,
}

impl fmt::Debug for ResilienceInfrastructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilienceInfrastructure")
            .field("classifier", &self.classifier.classifier_name())
            .field("patterns", &self.patterns.len())
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl ResilienceInfrastructure {
    pub fn new(
        classifier: Arc<dyn ErrorClassifier>,
        selector: Arc<RecoverySelector>,
        patterns: Arc<PatternLibrary>,
        bus: Arc<EventBus>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            classifier,
            selector,
            patterns,
            bus,
            telemetry,
            counters: FacadeCounters::default(),
        }
    }

    pub fn selector(&self) -> &Arc<RecoverySelector> {
        &self.selector
    }

    pub fn patterns(&self) -> &Arc<PatternLibrary> {
        &self.patterns
    }

    /// Classify `error`, pick a recovery strategy and announce both
    pub async fn handle_error(
        &self,
        error: &(dyn fmt::Display + Sync),
        context: &ErrorContext,
        source: &str,
    ) -> ErrorHandlingResult {
        let message = error.to_string();
        let classification = self.classifier.classify(&message, context);
        let strategy = self.selector.select_strategy(&classification, context);
        self.counters.errors_handled.fetch_add(1, Ordering::Relaxed);

        metrics::errors_classified_total().add(
            1,
            &[
                KeyValue::new("category", classification.category.as_str()),
                KeyValue::new("severity", classification.severity.as_str()),
            ],
        );
        log_recovery_decision(
            &context.component,
            classification.category.as_str(),
            classification.severity.as_str(),
            strategy.strategy_type.as_str(),
            &strategy.rationale,
        );

        let emergency = strategy.strategy_type == StrategyType::EmergencyStop;
        if emergency {
            self.counters.emergency_stops.fetch_add(1, Ordering::Relaxed);
            error!(
                source = %source,
                component = %context.component,
                operation = %context.operation,
                category = %classification.category,
                severity = %classification.severity,
                error = %message,
                "🚨 EMERGENCY_STOP: Automatic recovery halted"
            );
        } else if strategy.strategy_type == StrategyType::EscalateToHuman {
            self.counters.escalations.fetch_add(1, Ordering::Relaxed);
            warn!(
                source = %source,
                component = %context.component,
                category = %classification.category,
                "🙋 ESCALATE_TO_HUMAN: Manual intervention requested"
            );
        }

        let payload = json!({
            "source": source,
            "component": context.component,
            "operation": context.operation,
            "tier": context.tier.map(|t| t.as_str()),
            "attempt_count": context.attempt_count,
            "message": message,
            "classification": classification,
            "strategy": strategy,
        });

        let mut batch = vec![
            Event::new(events::ERROR_CLASSIFIED, payload.clone()).with_source(source),
            Event::new(events::RECOVERY_SELECTED, payload.clone()).with_source(source),
        ];
        let safety_type = match strategy.strategy_type {
            StrategyType::EmergencyStop => Some(events::EMERGENCY_STOP),
            StrategyType::EscalateToHuman => Some(events::ESCALATED_TO_HUMAN),
            _ => None,
        };
        if let Some(event_type) = safety_type {
            batch.push(
                Event::new(event_type, payload)
                    .with_source(source)
                    .with_priority(Priority::Critical)
                    .with_delivery_guarantee(DeliveryGuarantee::AtLeastOnce),
            );
        }
        self.publish_all(batch).await;

        self.emit_error_record(ErrorRecord {
            source: source.to_string(),
            component: context.component.clone(),
            operation: context.operation.clone(),
            message,
            category: classification.category.as_str().to_string(),
            severity: classification.severity.as_str().to_string(),
            strategy: strategy.strategy_type.as_str().to_string(),
            emergency,
            timestamp: Utc::now(),
        });

        ErrorHandlingResult {
            classification,
            strategy,
        }
    }

    /// Record what happened after the caller applied `strategy`
    pub async fn record_recovery_outcome(
        &self,
        classification: &ErrorClassification,
        context: &ErrorContext,
        strategy: &RecoveryStrategy,
        outcome: RecoveryOutcome,
        source: &str,
    ) {
        self.selector.record_outcome(
            strategy.strategy_type,
            classification,
            context,
            outcome.success,
            outcome.duration_ms,
            outcome.resource_cost,
        );
        self.patterns.record_observation(
            &classification.metadata.matching_patterns,
            outcome.success,
            outcome.duration_ms,
        );
        self.counters
            .outcomes_recorded
            .fetch_add(1, Ordering::Relaxed);
        metrics::recovery_outcomes_total().add(
            1,
            &[
                KeyValue::new("strategy", strategy.strategy_type.as_str()),
                KeyValue::new("success", outcome.success),
            ],
        );

        let event = Event::new(
            events::RECOVERY_COMPLETED,
            json!({
                "source": source,
                "component": context.component,
                "operation": context.operation,
                "category": classification.category,
                "strategy": strategy.strategy_type,
                "success": outcome.success,
                "duration_ms": outcome.duration_ms,
                "resource_cost": outcome.resource_cost,
            }),
        )
        .with_source(source);
        self.publish_all(vec![event]).await;

        let sink = Arc::clone(&self.telemetry);
        let record = TaskCompletionRecord {
            source: source.to_string(),
            task: format!("recovery:{}:{}", context.component, strategy.strategy_type),
            success: outcome.success,
            duration_ms: outcome.duration_ms,
            timestamp: Utc::now(),
        };
        tokio::spawn(async move {
            if let Err(e) = sink.emit_task_completion(record).await {
                warn!(error = %e, "📡 TELEMETRY: Task completion emit failed");
            }
        });
    }

    /// Register a learned pattern for subsequent classifications
    pub async fn add_error_pattern(&self, pattern: ErrorPattern) {
        let event = Event::new(
            events::PATTERN_ADDED,
            json!({
                "pattern_id": pattern.id,
                "name": pattern.name,
                "category": pattern.category,
                "severity": pattern.severity,
            }),
        )
        .with_source("resilience");
        self.patterns.add_pattern(pattern);
        self.publish_all(vec![event]).await;
    }

    pub fn get_statistics(&self) -> ResilienceStatistics {
        let bus = self.bus.stats();
        ResilienceStatistics {
            events_published: bus.published,
            events_dropped: bus.dropped,
            average_publish_overhead_ms: bus.average_publish_overhead_ms,
            errors_handled: self.counters.errors_handled.load(Ordering::Relaxed),
            emergency_stops: self.counters.emergency_stops.load(Ordering::Relaxed),
            escalations: self.counters.escalations.load(Ordering::Relaxed),
            publish_failures: self.counters.publish_failures.load(Ordering::Relaxed),
            outcomes_recorded: self.counters.outcomes_recorded.load(Ordering::Relaxed),
            patterns: self.patterns.len(),
            effectiveness: self.selector.get_effectiveness_statistics(),
        }
    }

    async fn publish_all(&self, batch: Vec<Event>) {
        let event_types: Vec<String> = batch.iter().map(|e| e.event_type().to_string()).collect();
        let results = self.bus.publish_batch(batch).await;

        for (event_type, result) in event_types.iter().zip(results) {
            match result {
                Ok(receipt) => debug!(
                    event_type = %event_type,
                    matched = receipt.matched,
                    "Resilience event published"
                ),
                Err(e) => {
                    self.counters.publish_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        event_type = %event_type,
                        error = %e,
                        "⚠️ RESILIENCE: Event could not be published"
                    );
                }
            }
        }
    }

    fn emit_error_record(&self, record: ErrorRecord) {
        let sink = Arc::clone(&self.telemetry);
        tokio::spawn(async move {
            if let Err(e) = sink.emit_error(record).await {
                warn!(error = %e, "📡 TELEMETRY: Error record emit failed");
            }
        });
    }
}
