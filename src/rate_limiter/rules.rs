//! Rate-limit rules and rule resolution
//!
//! Exactly one rule applies to an event. Precedence: exact event type, then
//! tier, then category (the event kind), then the default rule.

use crate::config::RateLimitConfig;
use crate::events::Event;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitRule {
    /// Continuous refill rate
    pub events_per_second: f64,
    /// Bucket capacity
    pub burst_capacity: f64,
    /// Tokens charged per event before multipliers
    pub credit_cost: f64,
    /// Always admit without touching the store
    pub bypass: bool,
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self {
            events_per_second: 50.0,
            burst_capacity: 100.0,
            credit_cost: 1.0,
            bypass: false,
        }
    }
}

impl RateLimitRule {
    pub fn new(events_per_second: f64, burst_capacity: f64) -> Self {
        Self {
            events_per_second,
            burst_capacity,
            ..Self::default()
        }
    }

    /// A rule that always admits
    pub fn bypass() -> Self {
        Self {
            bypass: true,
            ..Self::default()
        }
    }

    pub fn with_credit_cost(mut self, credit_cost: f64) -> Self {
        self.credit_cost = credit_cost;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.bypass {
            return Ok(());
        }
        if self.events_per_second <= 0.0 {
            return Err("events_per_second must be positive".to_string());
        }
        if self.credit_cost <= 0.0 {
            return Err("credit_cost must be positive".to_string());
        }
        if self.burst_capacity < self.credit_cost {
            return Err("burst_capacity must cover at least one event".to_string());
        }
        Ok(())
    }
}

/// Which precedence level supplied the rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    EventType,
    Tier,
    Category,
    Default,
}

impl fmt::Display for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleSource::EventType => "event_type",
            RuleSource::Tier => "tier",
            RuleSource::Category => "category",
            RuleSource::Default => "default",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRule {
    pub rule: RateLimitRule,
    pub source: RuleSource,
    /// Credits charged to every key, multipliers and external API costs applied
    pub cost: f64,
    /// Expensive events also get a per-user-per-type bucket
    pub expensive: bool,
}

/// Resolve the single rule and effective cost for `event`
pub fn resolve_rule(config: &RateLimitConfig, event: &Event) -> ResolvedRule {
    let event_type = event.event_type();
    let tier_rule = event
        .tier()
        .and_then(|tier| config.tiers.get(tier.as_str()));

    let (rule, source) = if let Some(rule) = config.event_types.get(event_type) {
        (*rule, RuleSource::EventType)
    } else if let Some(rule) = tier_rule {
        (*rule, RuleSource::Tier)
    } else if let Some(rule) = config.categories.get(event.kind().name()) {
        (*rule, RuleSource::Category)
    } else {
        (config.default, RuleSource::Default)
    };

    let multiplier = config
        .credit_multipliers
        .get(event_type)
        .copied()
        .unwrap_or(1.0);
    let external_cost = event
        .external_api()
        .and_then(|api| config.external_api_costs.get(api))
        .copied()
        .unwrap_or(0.0);
    let cost = rule.credit_cost * multiplier + external_cost;

    let expensive = config
        .expensive_event_types
        .iter()
        .any(|t| t == event_type)
        || cost >= config.expensive_cost_threshold;

    ResolvedRule {
        rule,
        source,
        cost,
        expensive,
    }
}
