//! # Error Pattern Library
//!
//! Learned error patterns matched by weighted trigger-condition scoring.
//!
//! Pattern definitions live behind a read-mostly lock. Recovery observations
//! are appended to a lock-free queue and folded into the pattern aggregates
//! when the library is read, so concurrent writers never contend on the
//! definitions the classifier is scoring against.

use super::types::{
    ConditionOperator, ErrorCategory, ErrorContext, ErrorPattern, Severity, TriggerCondition,
};
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

/// A pattern whose weighted score reached the match threshold
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub pattern_id: String,
    /// Satisfied weight over total weight, in `[0, 1]`
    pub score: f64,
    pub confidence: f64,
    pub category: ErrorCategory,
    pub severity: Severity,
}

#[derive(Debug, Clone)]
struct PatternObservation {
    pattern_id: String,
    success: bool,
    duration_ms: u64,
    observed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct PatternLibrary {
    patterns: RwLock<HashMap<String, ErrorPattern>>,
    observations: SegQueue<PatternObservation>,
    regex_cache: DashMap<String, Option<Regex>>,
}

impl PatternLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a pattern by id
    pub fn add_pattern(&self, pattern: ErrorPattern) {
        info!(
            pattern_id = %pattern.id,
            category = %pattern.category,
            conditions = pattern.trigger_conditions.len(),
            "🧠 PATTERNS: Error pattern registered"
        );
        self.patterns.write().insert(pattern.id.clone(), pattern);
    }

    pub fn remove_pattern(&self, pattern_id: &str) -> bool {
        self.patterns.write().remove(pattern_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.patterns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.read().is_empty()
    }

    /// Patterns scoring at or above `threshold`, best first
    pub fn match_patterns(
        &self,
        message: &str,
        context: &ErrorContext,
        threshold: f64,
    ) -> Vec<PatternMatch> {
        self.fold_observations();
        let patterns = self.patterns.read();
        let mut matches: Vec<PatternMatch> = patterns
            .values()
            .filter_map(|pattern| {
                let score = self.score(pattern, message, context);
                (score >= threshold && score > 0.0).then(|| PatternMatch {
                    pattern_id: pattern.id.clone(),
                    score,
                    confidence: effective_confidence(pattern),
                    category: pattern.category,
                    severity: pattern.severity,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
                .then_with(|| a.pattern_id.cmp(&b.pattern_id))
        });
        matches
    }

    /// Queue a recovery observation for every pattern in `pattern_ids`
    pub fn record_observation(&self, pattern_ids: &[String], success: bool, duration_ms: u64) {
        let observed_at = Utc::now();
        for pattern_id in pattern_ids {
            self.observations.push(PatternObservation {
                pattern_id: pattern_id.clone(),
                success,
                duration_ms,
                observed_at,
            });
        }
    }

    /// Fold queued observations into the pattern aggregates
    pub fn fold_observations(&self) -> usize {
        if self.observations.is_empty() {
            return 0;
        }

        let mut patterns = self.patterns.write();
        let mut folded = 0;
        while let Some(observation) = self.observations.pop() {
            folded += 1;
            // Observations for removed patterns are discarded
            let Some(pattern) = patterns.get_mut(&observation.pattern_id) else {
                continue;
            };

            let previous = pattern.frequency as f64;
            pattern.frequency += 1;
            let n = pattern.frequency as f64;
            let success = if observation.success { 1.0 } else { 0.0 };
            pattern.success_rate = (pattern.success_rate * previous + success) / n;
            pattern.average_resolution_time_ms = (pattern.average_resolution_time_ms * previous
                + observation.duration_ms as f64)
                / n;
            if observation.observed_at > pattern.last_seen {
                pattern.last_seen = observation.observed_at;
            }
        }

        debug!(folded = folded, "Pattern observations folded");
        folded
    }

    /// Current patterns with all queued observations applied
    pub fn snapshot(&self) -> Vec<ErrorPattern> {
        self.fold_observations();
        let mut patterns: Vec<ErrorPattern> = self.patterns.read().values().cloned().collect();
        patterns.sort_by(|a, b| a.id.cmp(&b.id));
        patterns
    }

    pub fn get(&self, pattern_id: &str) -> Option<ErrorPattern> {
        self.fold_observations();
        self.patterns.read().get(pattern_id).cloned()
    }

    fn score(&self, pattern: &ErrorPattern, message: &str, context: &ErrorContext) -> f64 {
        let total: f64 = pattern
            .trigger_conditions
            .iter()
            .map(|c| c.weight.max(0.0))
            .sum();
        if total <= 0.0 {
            return 0.0;
        }

        let satisfied: f64 = pattern
            .trigger_conditions
            .iter()
            .filter(|c| self.condition_holds(c, message, context))
            .map(|c| c.weight.max(0.0))
            .sum();

        satisfied / total
    }

    fn condition_holds(
        &self,
        condition: &TriggerCondition,
        message: &str,
        context: &ErrorContext,
    ) -> bool {
        let Some(actual) = resolve_field(&condition.field, message, context) else {
            return false;
        };

        match condition.operator {
            ConditionOperator::Equals => match (&actual, &condition.value) {
                (Value::String(a), Value::String(e)) => a.eq_ignore_ascii_case(e),
                (Value::Number(_), Value::Number(_)) => as_f64(&actual) == as_f64(&condition.value),
                (a, e) => a == e,
            },
            ConditionOperator::Contains => match (&actual, &condition.value) {
                (Value::String(a), Value::String(e)) => {
                    a.to_lowercase().contains(&e.to_lowercase())
                }
                (Value::Array(items), expected) => items.contains(expected),
                _ => false,
            },
            ConditionOperator::Matches => match (&actual, &condition.value) {
                (Value::String(a), Value::String(pattern)) => {
                    self.regex(pattern).is_some_and(|re| re.is_match(a))
                }
                _ => false,
            },
            ConditionOperator::GreaterThan => match (as_f64(&actual), as_f64(&condition.value)) {
                (Some(a), Some(e)) => a > e,
                _ => false,
            },
            ConditionOperator::LessThan => match (as_f64(&actual), as_f64(&condition.value)) {
                (Some(a), Some(e)) => a < e,
                _ => false,
            },
        }
    }

    fn regex(&self, pattern: &str) -> Option<Regex> {
        if let Some(cached) = self.regex_cache.get(pattern) {
            return cached.clone();
        }

        let compiled = match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                debug!(pattern = %pattern, error = %e, "Invalid trigger regex never matches");
                None
            }
        };
        self.regex_cache
            .insert(pattern.to_string(), compiled.clone());
        compiled
    }
}

/// Observations needed before the success rate outweighs the seeded confidence
const OBSERVATION_PRIOR: f64 = 5.0;

/// Seeded confidence shifted toward the observed recovery success rate
///
/// With `n` observations the success rate carries weight `n / (n + 5)`.
pub fn effective_confidence(pattern: &ErrorPattern) -> f64 {
    if pattern.frequency == 0 {
        return pattern.confidence.clamp(0.0, 1.0);
    }
    let observed = pattern.frequency as f64;
    let weight = observed / (observed + OBSERVATION_PRIOR);
    (pattern.confidence * (1.0 - weight) + pattern.success_rate * weight).clamp(0.0, 1.0)
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn resolve_field(field: &str, message: &str, context: &ErrorContext) -> Option<Value> {
    match field {
        "message" => Some(Value::String(message.to_string())),
        "component" => Some(Value::String(context.component.clone())),
        "operation" => Some(Value::String(context.operation.clone())),
        "tier" => context
            .tier
            .map(|tier| Value::String(tier.as_str().to_string())),
        "attempt_count" => Some(Value::from(context.attempt_count)),
        "previous_strategies" => Some(Value::Array(
            context
                .previous_strategies
                .iter()
                .map(|s| Value::String(s.as_str().to_string()))
                .collect(),
        )),
        "system_functional" => Some(Value::Bool(context.system_state.functional)),
        _ => {
            let (scope, name) = field.split_once('.')?;
            match scope {
                "resource" => match name {
                    "memory_usage" => context.resource_state.memory_usage.map(Value::from),
                    "cpu_usage" => context.resource_state.cpu_usage.map(Value::from),
                    other => context
                        .resource_state
                        .other
                        .get(other)
                        .copied()
                        .map(Value::from),
                },
                "metrics" => context
                    .performance_metrics
                    .get(name)
                    .copied()
                    .map(Value::from),
                "user" => context.user_context.get(name).cloned(),
                _ => None,
            }
        }
    }
}
