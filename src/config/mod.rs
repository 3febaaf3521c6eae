//! # Runtime Configuration System
//!
//! Every threshold consulted by the rate limiter, classifier, recovery selector,
//! event bus and tiers is supplied here. Decision logic reads these values and
//! never carries its own literals.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use agent_runtime::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // File is optional; AGENT_RUNTIME__* environment variables override it
//! let config = ConfigLoader::load_from_file(Some("config/agent-runtime.toml"))?;
//! let threshold = config.resilience.resource_contention_threshold;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::defaults;
use crate::rate_limiter::RateLimitRule;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Deployment environment name (development, test, production)
    pub environment: String,

    /// Event bus delivery settings
    pub event_bus: EventBusConfig,

    /// Rate limit rules and credit costs
    pub rate_limits: RateLimitConfig,

    /// Classifier and recovery selector thresholds
    pub resilience: ResilienceConfig,

    /// Tier state machine settings
    pub tiers: TierConfig,

    /// Shared atomic store settings
    pub store: StoreConfig,
}

impl RuntimeConfig {
    /// Validate cross-field invariants
    pub fn validate(&self) -> ConfigResult<()> {
        self.rate_limits.validate()?;
        self.resilience.validate()?;
        self.event_bus.validate()?;

        if self.tiers.delegate_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "tiers.delegate_timeout_ms",
                "0",
                "delegate calls must carry a non-zero timeout",
            ));
        }
        if self.tiers.run_sweep_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "tiers.run_sweep_interval_ms",
                "0",
                "finished runs must be swept periodically",
            ));
        }

        Ok(())
    }
}

/// Event bus configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Bounded queue size per subscriber
    pub subscriber_buffer_size: usize,
    /// Overall bound on a single publish call
    pub publish_timeout_ms: u64,
    /// Retries for at-least-once subscribers that do not set their own
    pub default_max_retries: u32,
    /// Per-attempt handler timeout for subscribers that do not set their own
    pub default_delivery_timeout_ms: u64,
    /// Base backoff between delivery retries
    pub retry_backoff_ms: u64,
    /// Time allowed for subscriber workers to drain on shutdown
    pub shutdown_drain_timeout_ms: u64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer_size: defaults::SUBSCRIBER_BUFFER_SIZE,
            publish_timeout_ms: defaults::PUBLISH_TIMEOUT_MS,
            default_max_retries: 3,
            default_delivery_timeout_ms: 1_000,
            retry_backoff_ms: 50,
            shutdown_drain_timeout_ms: 5_000,
        }
    }
}

impl EventBusConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn default_delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.default_delivery_timeout_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.subscriber_buffer_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "event_bus.subscriber_buffer_size",
                "0",
                "subscriber queues must hold at least one event",
            ));
        }
        if self.publish_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "event_bus.publish_timeout_ms",
                "0",
                "publish must be bounded by a non-zero timeout",
            ));
        }
        Ok(())
    }
}

/// Rate limit configuration
///
/// Rule precedence per event: exact event type, then tier, then category, then default.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Master switch; when false every event is admitted without store access
    pub enabled: bool,
    /// Rule applied to the process-wide bucket
    pub global: RateLimitRule,
    /// Rule used when nothing more specific matches
    pub default: RateLimitRule,
    /// Exact event-type rules
    pub event_types: HashMap<String, RateLimitRule>,
    /// Tier rules keyed by tier name
    pub tiers: HashMap<String, RateLimitRule>,
    /// Category rules keyed by event kind name
    pub categories: HashMap<String, RateLimitRule>,
    /// Per-event-type multipliers applied to the resolved credit cost
    pub credit_multipliers: HashMap<String, f64>,
    /// Extra credits charged when the payload names an external API
    pub external_api_costs: HashMap<String, f64>,
    /// Event types that always get a per-user-per-type bucket
    pub expensive_event_types: Vec<String>,
    /// Events whose effective cost reaches this value count as expensive
    pub expensive_cost_threshold: f64,
    /// Retry-after reported when the check fails closed
    pub fail_closed_retry_after_ms: u64,
    /// Timeout applied to each store round-trip
    pub store_timeout_ms: u64,
    /// Consecutive store failures that open the store circuit breaker
    pub store_failure_threshold: u32,
    /// How long the store circuit stays open before probing again
    pub store_circuit_timeout_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut categories = HashMap::new();
        categories.insert("safety".to_string(), RateLimitRule::bypass());

        Self {
            enabled: true,
            global: RateLimitRule::new(1_000.0, 2_000.0),
            default: RateLimitRule::new(50.0, 100.0),
            event_types: HashMap::new(),
            tiers: HashMap::new(),
            categories,
            credit_multipliers: HashMap::new(),
            external_api_costs: HashMap::new(),
            expensive_event_types: Vec::new(),
            expensive_cost_threshold: 5.0,
            fail_closed_retry_after_ms: defaults::FAIL_CLOSED_RETRY_AFTER_MS,
            store_timeout_ms: defaults::STORE_TIMEOUT_MS,
            store_failure_threshold: 5,
            store_circuit_timeout_ms: 30_000,
        }
    }
}

impl RateLimitConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        let named_rules = std::iter::once(("global".to_string(), &self.global))
            .chain(std::iter::once(("default".to_string(), &self.default)))
            .chain(
                self.event_types
                    .iter()
                    .map(|(k, v)| (format!("event_types.{k}"), v)),
            )
            .chain(self.tiers.iter().map(|(k, v)| (format!("tiers.{k}"), v)))
            .chain(
                self.categories
                    .iter()
                    .map(|(k, v)| (format!("categories.{k}"), v)),
            );

        for (name, rule) in named_rules {
            rule.validate()
                .map_err(|reason| ConfigurationError::invalid_value(
                    format!("rate_limits.{name}"),
                    format!("{rule:?}"),
                    reason,
                ))?;
        }

        for (event_type, multiplier) in &self.credit_multipliers {
            if *multiplier <= 0.0 {
                return Err(ConfigurationError::invalid_value(
                    format!("rate_limits.credit_multipliers.{event_type}"),
                    multiplier.to_string(),
                    "multipliers must be positive",
                ));
            }

            // The scaled cost is charged to the event-type and global buckets
            let rule = self.event_types.get(event_type).filter(|rule| !rule.bypass);
            if let Some(rule) = rule {
                let cost = rule.credit_cost * multiplier;
                let capacity = rule.burst_capacity.min(self.global.burst_capacity);
                if cost > capacity {
                    return Err(ConfigurationError::invalid_value(
                        format!("rate_limits.credit_multipliers.{event_type}"),
                        multiplier.to_string(),
                        format!("scaled cost {cost} exceeds bucket capacity {capacity}"),
                    ));
                }
            }
        }

        for (api, cost) in &self.external_api_costs {
            if *cost < 0.0 || *cost >= self.global.burst_capacity {
                return Err(ConfigurationError::invalid_value(
                    format!("rate_limits.external_api_costs.{api}"),
                    cost.to_string(),
                    "surcharge must be non-negative and leave room in the global bucket",
                ));
            }
        }

        Ok(())
    }
}

/// Resilience configuration shared by the classifier and the recovery selector
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Minimum weighted trigger score for a learned pattern to match
    pub pattern_match_threshold: f64,
    /// Scale applied to a matched pattern's confidence when boosting the score
    pub pattern_confidence_boost: f64,
    /// Confidence removed for every attempt beyond the first
    pub attempt_confidence_penalty: f64,
    /// Lowest confidence the attempt penalty can push a classification to
    pub confidence_floor: f64,
    /// Severity escalates one level at or after this attempt count
    pub severity_escalation_attempts: u32,
    /// Severity escalates one level once this many strategies were tried
    pub severity_escalation_previous_strategies: usize,
    /// Memory or CPU usage ratio treated as contention
    pub resource_contention_threshold: f64,
    /// Attempts granted to RETRY_SAME
    pub retry_same_max_attempts: u32,
    /// Attempts granted to the conservative fallback
    pub wait_and_retry_max_attempts: u32,
    /// Attempts granted to REDUCE_SCOPE
    pub reduce_scope_max_attempts: u32,
    /// Base delay for WAIT_AND_RETRY backoff
    pub base_retry_delay_ms: u64,
    /// Upper bound for WAIT_AND_RETRY backoff
    pub max_retry_delay_ms: u64,
    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,
    /// Jitter factor (0.0 - 1.0)
    pub jitter_factor: f64,
    /// Success-rate prior used before any outcome is recorded
    pub default_success_prior: f64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            pattern_match_threshold: defaults::PATTERN_MATCH_THRESHOLD,
            pattern_confidence_boost: 0.2,
            attempt_confidence_penalty: 0.05,
            confidence_floor: 0.05,
            severity_escalation_attempts: defaults::SEVERITY_ESCALATION_ATTEMPTS,
            severity_escalation_previous_strategies:
                defaults::SEVERITY_ESCALATION_PREVIOUS_STRATEGIES,
            resource_contention_threshold: defaults::RESOURCE_CONTENTION_THRESHOLD,
            retry_same_max_attempts: 3,
            wait_and_retry_max_attempts: 2,
            reduce_scope_max_attempts: 2,
            base_retry_delay_ms: 100,
            max_retry_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            default_success_prior: defaults::DEFAULT_SUCCESS_PRIOR,
        }
    }
}

impl ResilienceConfig {
    fn validate(&self) -> ConfigResult<()> {
        let ratios = [
            ("pattern_match_threshold", self.pattern_match_threshold),
            ("pattern_confidence_boost", self.pattern_confidence_boost),
            ("attempt_confidence_penalty", self.attempt_confidence_penalty),
            ("confidence_floor", self.confidence_floor),
            (
                "resource_contention_threshold",
                self.resource_contention_threshold,
            ),
            ("jitter_factor", self.jitter_factor),
            ("default_success_prior", self.default_success_prior),
        ];

        for (field, value) in ratios {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigurationError::invalid_value(
                    format!("resilience.{field}"),
                    value.to_string(),
                    "must be within [0, 1]",
                ));
            }
        }

        if self.retry_same_max_attempts < 2 {
            return Err(ConfigurationError::invalid_value(
                "resilience.retry_same_max_attempts",
                self.retry_same_max_attempts.to_string(),
                "RETRY_SAME must allow more than one attempt",
            ));
        }

        Ok(())
    }
}

/// Tier state machine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TierConfig {
    /// Timeout applied to every delegate invocation
    pub delegate_timeout_ms: u64,
    /// Mirror runs and checkpoints into the shared store
    pub persist_runs: bool,
    /// TTL for mirrored runs and checkpoints
    pub checkpoint_ttl_seconds: u64,
    /// In-progress responses a single run may resume from before failing
    pub max_continuations: u32,
    /// How long finished runs stay queryable in the local registry
    pub completed_run_retention_seconds: u64,
    /// Period of the background sweep that drops expired finished runs
    pub run_sweep_interval_ms: u64,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            delegate_timeout_ms: defaults::DELEGATE_TIMEOUT_MS,
            persist_runs: false,
            checkpoint_ttl_seconds: 86_400,
            max_continuations: 64,
            completed_run_retention_seconds: 300,
            run_sweep_interval_ms: 60_000,
        }
    }
}

impl TierConfig {
    pub fn delegate_timeout(&self) -> Duration {
        Duration::from_millis(self.delegate_timeout_ms)
    }

    pub fn checkpoint_ttl(&self) -> Duration {
        Duration::from_secs(self.checkpoint_ttl_seconds)
    }

    pub fn completed_run_retention(&self) -> Duration {
        Duration::from_secs(self.completed_run_retention_seconds)
    }

    pub fn run_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.run_sweep_interval_ms)
    }
}

/// Shared store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Key namespace prepended to every key this runtime writes
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: "agent_runtime".to_string(),
        }
    }
}
