//! # Recovery Strategy Selection
//!
//! Maps an [`ErrorClassification`] and its [`ErrorContext`] to a
//! [`RecoveryStrategy`] through an ordered decision table; the first matching
//! row wins:
//!
//! 0. An `EMERGENCY_STOP` already applied in this context chain stays in force
//! 1. `FATAL`, or a non-functional system with several components affected ⇒ `EMERGENCY_STOP`
//! 2. Security risk ⇒ `ESCALATE_TO_HUMAN`
//! 3. Resource contention ⇒ `REDUCE_SCOPE` or `WAIT_AND_RETRY`, whichever this
//!    component has recovered with more often
//! 4. Automatically recoverable transient failure ⇒ `RETRY_SAME`
//! 5. Anything else ⇒ conservative `WAIT_AND_RETRY`
//!
//! Outcomes recorded through [`RecoverySelector::record_outcome`] feed the
//! success-rate estimates of later decisions.

use super::effectiveness::{EffectivenessLog, EffectivenessStatistics, OutcomeRecord};
use super::types::{
    ErrorCategory, ErrorClassification, ErrorContext, Recoverability, RecoveryStrategy,
    Severity, StrategyType,
};
use crate::config::ResilienceConfig;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
pub struct RecoverySelector {
    config: ResilienceConfig,
    effectiveness: Arc<EffectivenessLog>,
}

impl RecoverySelector {
    pub fn new(config: ResilienceConfig, effectiveness: Arc<EffectivenessLog>) -> Self {
        Self {
            config,
            effectiveness,
        }
    }

    pub fn effectiveness(&self) -> &Arc<EffectivenessLog> {
        &self.effectiveness
    }

    pub fn select_strategy(
        &self,
        classification: &ErrorClassification,
        context: &ErrorContext,
    ) -> RecoveryStrategy {
        if context
            .previous_strategies
            .contains(&StrategyType::EmergencyStop)
        {
            return self.strategy(
                StrategyType::EmergencyStop,
                1,
                None,
                "emergency stop already issued in this context chain",
            );
        }

        if classification.severity == Severity::Fatal
            || (!classification.system_functional && classification.multiple_components_affected)
        {
            return self.strategy(
                StrategyType::EmergencyStop,
                1,
                None,
                "fatal severity or non-functional system with multiple components affected",
            );
        }

        if classification.security_risk {
            return self.strategy(
                StrategyType::EscalateToHuman,
                1,
                None,
                "security risk requires human review",
            );
        }

        if classification.category == ErrorCategory::Resource
            && context
                .resource_state
                .is_contended(self.config.resource_contention_threshold)
        {
            let reduce = self.component_estimate(&context.component, StrategyType::ReduceScope);
            let wait = self.component_estimate(&context.component, StrategyType::WaitAndRetry);
            debug!(
                component = %context.component,
                reduce_scope_rate = reduce,
                wait_and_retry_rate = wait,
                "Resource contention strategy comparison"
            );

            return if wait > reduce {
                self.strategy(
                    StrategyType::WaitAndRetry,
                    self.config.wait_and_retry_max_attempts,
                    Some(self.calculate_backoff(context.attempt_count)),
                    "resource contention; waiting has recovered this component more often",
                )
            } else {
                self.strategy(
                    StrategyType::ReduceScope,
                    self.config.reduce_scope_max_attempts,
                    None,
                    "resource contention; reducing scope has recovered this component at least as often",
                )
            };
        }

        if classification.category == ErrorCategory::Transient
            && classification.recoverability == Recoverability::Automatic
        {
            return self.strategy(
                StrategyType::RetrySame,
                self.config.retry_same_max_attempts.max(2),
                None,
                "transient failure with automatic recoverability",
            );
        }

        self.strategy(
            StrategyType::WaitAndRetry,
            self.config.wait_and_retry_max_attempts,
            Some(self.calculate_backoff(context.attempt_count)),
            "no specific rule matched; conservative backoff",
        )
    }

    /// Append an outcome; never blocks the decision path
    pub fn record_outcome(
        &self,
        strategy: StrategyType,
        classification: &ErrorClassification,
        context: &ErrorContext,
        success: bool,
        duration_ms: u64,
        resource_cost: f64,
    ) {
        self.effectiveness.record(OutcomeRecord {
            strategy,
            category: classification.category,
            severity: classification.severity,
            component: context.component.clone(),
            success,
            duration_ms,
            resource_cost,
            recorded_at: Utc::now(),
        });
    }

    pub fn get_effectiveness_statistics(&self) -> EffectivenessStatistics {
        self.effectiveness.statistics()
    }

    /// Exponential backoff with jitter for the given 1-based attempt
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.config.base_retry_delay_ms);
        let max = Duration::from_millis(self.config.max_retry_delay_ms);
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay = base.mul_f64(self.config.backoff_multiplier.max(1.0).powi(exponent));
        let delay = delay.min(max);

        let jitter = delay.mul_f64(fastrand::f64() * self.config.jitter_factor);
        (delay + jitter).min(max)
    }

    fn strategy_estimate(&self, strategy: StrategyType) -> f64 {
        self.effectiveness
            .strategy_success_rate(strategy)
            .unwrap_or(self.config.default_success_prior)
    }

    fn component_estimate(&self, component: &str, strategy: StrategyType) -> f64 {
        self.effectiveness
            .component_success_rate(component, strategy)
            .unwrap_or_else(|| self.strategy_estimate(strategy))
    }

    fn strategy(
        &self,
        strategy_type: StrategyType,
        max_attempts: u32,
        retry_delay: Option<Duration>,
        rationale: &str,
    ) -> RecoveryStrategy {
        RecoveryStrategy {
            strategy_type,
            max_attempts,
            estimated_success_rate: self.strategy_estimate(strategy_type),
            retry_delay,
            rationale: rationale.to_string(),
            decided_at: Utc::now(),
        }
    }
}
