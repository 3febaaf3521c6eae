//! # Resilience Types
//!
//! Inputs and outputs of error classification and recovery selection.
//! Classifications and strategies are produced fresh per call and never held
//! as shared mutable state.

use crate::tiers::TierLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Retry-worthy, usually network or timing related
    Transient,
    /// Infrastructure failure that may leave the system non-functional
    System,
    /// Authentication or authorization failure; always escalated
    Security,
    /// Validation or programmer error
    Logic,
    /// Contention for memory, CPU or quota
    Resource,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "TRANSIENT",
            ErrorCategory::System => "SYSTEM",
            ErrorCategory::Security => "SECURITY",
            ErrorCategory::Logic => "LOGIC",
            ErrorCategory::Resource => "RESOURCE",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Warning,
    Error,
    Critical,
    Fatal,
}

impl Severity {
    /// One level worse, saturating at `Fatal`
    pub fn escalate(self) -> Self {
        match self {
            Severity::Warning => Severity::Error,
            Severity::Error => Severity::Critical,
            Severity::Critical | Severity::Fatal => Severity::Fatal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
            Severity::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recoverability {
    Automatic,
    Manual,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyType {
    RetrySame,
    WaitAndRetry,
    ReduceScope,
    EscalateToHuman,
    EmergencyStop,
}

impl StrategyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::RetrySame => "RETRY_SAME",
            StrategyType::WaitAndRetry => "WAIT_AND_RETRY",
            StrategyType::ReduceScope => "REDUCE_SCOPE",
            StrategyType::EscalateToHuman => "ESCALATE_TO_HUMAN",
            StrategyType::EmergencyStop => "EMERGENCY_STOP",
        }
    }

    /// Strategies under which the caller re-invokes the failed work
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StrategyType::RetrySame | StrategyType::WaitAndRetry | StrategyType::ReduceScope
        )
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemState {
    pub functional: bool,
    /// Components currently reporting failures
    pub affected_components: Vec<String>,
}

impl Default for SystemState {
    fn default() -> Self {
        Self {
            functional: true,
            affected_components: Vec::new(),
        }
    }
}

/// Usage ratios in `[0, 1]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceState {
    pub memory_usage: Option<f64>,
    pub cpu_usage: Option<f64>,
    pub other: HashMap<String, f64>,
}

impl ResourceState {
    pub fn is_contended(&self, threshold: f64) -> bool {
        self.memory_usage.is_some_and(|m| m >= threshold)
            || self.cpu_usage.is_some_and(|c| c >= threshold)
            || self.other.values().any(|v| *v >= threshold)
    }
}

/// Caller-supplied context for one failure; never mutated by the classifier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorContext {
    pub tier: Option<TierLevel>,
    pub component: String,
    pub operation: String,
    /// 1-based attempt that just failed
    pub attempt_count: u32,
    /// Strategies already applied in this context chain, oldest first
    pub previous_strategies: Vec<StrategyType>,
    pub system_state: SystemState,
    pub resource_state: ResourceState,
    pub performance_metrics: HashMap<String, f64>,
    pub user_context: HashMap<String, Value>,
}

impl ErrorContext {
    pub fn new(component: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
            attempt_count: 1,
            ..Self::default()
        }
    }

    pub fn with_tier(mut self, tier: TierLevel) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_attempt(mut self, attempt_count: u32) -> Self {
        self.attempt_count = attempt_count;
        self
    }

    pub fn with_previous_strategies(mut self, strategies: Vec<StrategyType>) -> Self {
        self.previous_strategies = strategies;
        self
    }

    pub fn with_system_state(mut self, system_state: SystemState) -> Self {
        self.system_state = system_state;
        self
    }

    pub fn with_resource_state(mut self, resource_state: ResourceState) -> Self {
        self.resource_state = resource_state;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetadata {
    /// Ids of learned patterns that matched above the threshold
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub matching_patterns: Vec<String>,
    /// Vocabulary terms that decided the category
    pub matched_keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub recoverability: Recoverability,
    pub system_functional: bool,
    pub multiple_components_affected: bool,
    pub data_risk: bool,
    pub security_risk: bool,
    /// In `[0, 1]`
    pub confidence_score: f64,
    pub timestamp: DateTime<Utc>,
    pub metadata: ClassificationMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    Contains,
    /// Regular expression match
    Matches,
    GreaterThan,
    LessThan,
}

/// One weighted condition of a learned pattern
///
/// `field` addresses `message`, `component`, `operation`, `tier`,
/// `attempt_count`, `resource.<name>`, `metrics.<name>` or `user.<key>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerCondition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: Value,
    pub weight: f64,
}

impl TriggerCondition {
    pub fn new(
        field: impl Into<String>,
        operator: ConditionOperator,
        value: Value,
        weight: f64,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
            weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub id: String,
    pub name: String,
    pub frequency: u64,
    pub severity: Severity,
    pub category: ErrorCategory,
    pub trigger_conditions: Vec<TriggerCondition>,
    pub success_rate: f64,
    pub average_resolution_time_ms: f64,
    pub last_seen: DateTime<Utc>,
    /// In `[0, 1]`; scales the confidence boost a match gives
    pub confidence: f64,
}

impl ErrorPattern {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: ErrorCategory,
        severity: Severity,
        trigger_conditions: Vec<TriggerCondition>,
        confidence: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            frequency: 0,
            severity,
            category,
            trigger_conditions,
            success_rate: 0.0,
            average_resolution_time_ms: 0.0,
            last_seen: Utc::now(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStrategy {
    pub strategy_type: StrategyType,
    pub max_attempts: u32,
    pub estimated_success_rate: f64,
    /// Delay before the next attempt, set for backoff strategies
    pub retry_delay: Option<Duration>,
    /// Decision-table row that produced this strategy
    pub rationale: String,
    pub decided_at: DateTime<Utc>,
}

/// What actually happened after a strategy was applied
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub success: bool,
    pub duration_ms: u64,
    pub resource_cost: f64,
}
