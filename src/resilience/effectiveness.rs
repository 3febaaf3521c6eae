//! # Recovery Effectiveness Log
//!
//! Append-only record of recovery outcomes plus the read model derived from
//! it. Appends go to a lock-free queue and never block; readers fold pending
//! entries into the aggregates before answering.

use super::types::{ErrorCategory, Severity, StrategyType};
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One recorded recovery attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub strategy: StrategyType,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub component: String,
    pub success: bool,
    pub duration_ms: u64,
    pub resource_cost: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregates for one slice of the log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeStats {
    pub attempts: u64,
    pub successes: u64,
    pub total_duration_ms: u64,
    pub total_resource_cost: f64,
}

impl OutcomeStats {
    fn apply(&mut self, record: &OutcomeRecord) {
        self.attempts += 1;
        if record.success {
            self.successes += 1;
        }
        self.total_duration_ms = self.total_duration_ms.saturating_add(record.duration_ms);
        self.total_resource_cost += record.resource_cost;
    }

    pub fn success_rate(&self) -> Option<f64> {
        (self.attempts > 0).then(|| self.successes as f64 / self.attempts as f64)
    }

    pub fn average_duration_ms(&self) -> Option<f64> {
        (self.attempts > 0).then(|| self.total_duration_ms as f64 / self.attempts as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentStrategyStats {
    pub component: String,
    pub strategy: StrategyType,
    pub stats: OutcomeStats,
}

/// Aggregated view returned to callers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectivenessStatistics {
    pub total_outcomes: u64,
    /// Successes over all outcomes; zero when nothing was recorded
    pub average_success_rate: f64,
    pub by_strategy: HashMap<StrategyType, OutcomeStats>,
    pub by_category: HashMap<ErrorCategory, OutcomeStats>,
    pub by_component: Vec<ComponentStrategyStats>,
}

#[derive(Debug, Default)]
struct ReadModel {
    total: OutcomeStats,
    by_strategy: HashMap<StrategyType, OutcomeStats>,
    by_category: HashMap<ErrorCategory, OutcomeStats>,
    by_component: HashMap<(String, StrategyType), OutcomeStats>,
}

#[derive(Debug, Default)]
pub struct EffectivenessLog {
    pending: SegQueue<OutcomeRecord>,
    read_model: Mutex<ReadModel>,
}

impl EffectivenessLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: OutcomeRecord) {
        self.pending.push(record);
    }

    fn fold(&self) -> parking_lot::MutexGuard<'_, ReadModel> {
        let mut model = self.read_model.lock();
        while let Some(record) = self.pending.pop() {
            model.total.apply(&record);
            model
                .by_strategy
                .entry(record.strategy)
                .or_default()
                .apply(&record);
            model
                .by_category
                .entry(record.category)
                .or_default()
                .apply(&record);
            model
                .by_component
                .entry((record.component.clone(), record.strategy))
                .or_default()
                .apply(&record);
        }
        model
    }

    /// Learned success rate of `strategy` across all components
    pub fn strategy_success_rate(&self, strategy: StrategyType) -> Option<f64> {
        self.fold()
            .by_strategy
            .get(&strategy)
            .and_then(OutcomeStats::success_rate)
    }

    /// Learned success rate of `strategy` for one component
    pub fn component_success_rate(&self, component: &str, strategy: StrategyType) -> Option<f64> {
        self.fold()
            .by_component
            .get(&(component.to_string(), strategy))
            .and_then(OutcomeStats::success_rate)
    }

    pub fn total_outcomes(&self) -> u64 {
        self.fold().total.attempts
    }

    pub fn statistics(&self) -> EffectivenessStatistics {
        let model = self.fold();
        let mut by_component: Vec<ComponentStrategyStats> = model
            .by_component
            .iter()
            .map(|((component, strategy), stats)| ComponentStrategyStats {
                component: component.clone(),
                strategy: *strategy,
                stats: stats.clone(),
            })
            .collect();
        by_component.sort_by(|a, b| {
            a.component
                .cmp(&b.component)
                .then_with(|| a.strategy.as_str().cmp(b.strategy.as_str()))
        });

        EffectivenessStatistics {
            total_outcomes: model.total.attempts,
            average_success_rate: model.total.success_rate().unwrap_or(0.0),
            by_strategy: model.by_strategy.clone(),
            by_category: model.by_category.clone(),
            by_component,
        }
    }
}
