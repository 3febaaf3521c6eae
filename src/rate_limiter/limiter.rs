//! # Event Rate Limiter
//!
//! Admission gate in front of the event bus. Each event resolves to one rule
//! and several bucket keys; all keys are checked and debited in one atomic
//! store evaluation.
//!
//! Failure policy:
//! - store unreachable or slow (`Unavailable`, `Timeout`, open circuit): admit
//!   with a warning
//! - any other store fault: deny with the configured fail-closed retry-after
//!
//! Bypass rules return before any store access.

use super::clock::{Clock, SystemClock};
use super::keys::{derive_keys, LimitType, RateLimitKey};
use super::rules::{resolve_rule, RuleSource};
use super::script_cache::ScriptCache;
use crate::config::RateLimitConfig;
use crate::events::Event;
use crate::logging::log_rate_limit_decision;
use crate::metrics;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::store::{AtomicStore, BucketDecision, StoreError, StoreResult, TokenBucketRequest};
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateLimitError {
    #[error("Rate limit store error: {0}")]
    Store(#[from] StoreError),
}

/// `limit_type` reported for events no bucket could ever admit
pub const COST_EXCEEDS_CAPACITY: &str = "cost_exceeds_capacity";

/// Admission decision for one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    /// Tokens left in the tightest bucket
    pub remaining_quota: Option<f64>,
    /// When the tightest bucket is full again
    pub reset_time: Option<DateTime<Utc>>,
    pub retry_after_ms: Option<u64>,
    /// Dimension of the first denying bucket
    pub limit_type: Option<String>,
}

impl RateLimitResult {
    fn admitted_without_check() -> Self {
        Self {
            allowed: true,
            remaining_quota: None,
            reset_time: None,
            retry_after_ms: None,
            limit_type: None,
        }
    }

    fn denied(retry_after_ms: u64, limit_type: Option<String>) -> Self {
        Self {
            allowed: false,
            remaining_quota: None,
            reset_time: None,
            retry_after_ms: Some(retry_after_ms),
            limit_type,
        }
    }
}

/// Non-mutating view of one bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyStatus {
    pub key: String,
    pub limit_type: LimitType,
    pub capacity: f64,
    pub remaining: f64,
    pub reset_after_ms: u64,
}

/// Monitoring view of every bucket an event would touch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub event_type: String,
    pub rule_source: RuleSource,
    pub bypass: bool,
    pub cost: f64,
    pub keys: Vec<KeyStatus>,
}

pub struct EventRateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn AtomicStore>,
    scripts: Arc<ScriptCache>,
    clock: Arc<dyn Clock>,
    breaker: CircuitBreaker,
}

impl std::fmt::Debug for EventRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRateLimiter")
            .field("enabled", &self.config.enabled)
            .field("provider", &self.store.provider_name())
            .field("circuit", &self.breaker.state())
            .finish_non_exhaustive()
    }
}

impl EventRateLimiter {
    pub fn new(
        config: RateLimitConfig,
        store: Arc<dyn AtomicStore>,
        scripts: Arc<ScriptCache>,
    ) -> Self {
        let breaker = CircuitBreaker::new(
            "rate_limit_store",
            CircuitBreakerConfig {
                failure_threshold: config.store_failure_threshold,
                open_for_ms: config.store_circuit_timeout_ms,
                probe_successes: 1,
            },
        );

        Self {
            config,
            store,
            scripts,
            clock: Arc::new(SystemClock),
            breaker,
        }
    }

    /// Replace the refill clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Decide whether `event` may be published
    pub async fn check_event_rate_limit(&self, event: &Event) -> RateLimitResult {
        if !self.config.enabled {
            return RateLimitResult::admitted_without_check();
        }

        let resolved = resolve_rule(&self.config, event);
        if resolved.rule.bypass {
            debug!(
                event_type = %event.event_type(),
                rule_source = %resolved.source,
                "🚦 RATE_LIMIT: Bypass rule, admitted without check"
            );
            self.record_decision(event, &RateLimitResult::admitted_without_check());
            return RateLimitResult::admitted_without_check();
        }

        let keys = derive_keys(&self.config, event, &resolved);
        if let Some(result) = cost_exceeds_capacity(event, &keys, resolved.cost) {
            self.record_decision(event, &result);
            return result;
        }

        let now_ms = self.clock.now_ms();
        let request = build_request(&keys, resolved.cost, now_ms);

        // A dropped permit (cancelled check) hands its probe slot back
        let Some(permit) = self.breaker.try_acquire(now_ms) else {
            return self.fail_open(event, "store circuit open");
        };

        let result = match self.evaluate(&request).await {
            Ok(decisions) => {
                permit.succeed();
                interpret(&keys, &decisions, now_ms)
            }
            Err(e) if e.is_unavailable() => {
                permit.fail(now_ms);
                return self.fail_open(event, &e.to_string());
            }
            Err(e) => {
                permit.release();
                return self.fail_closed(event, &e);
            }
        };

        self.record_decision(event, &result);
        result
    }

    /// Report bucket state for `event` without consuming tokens
    pub async fn get_rate_limit_status(
        &self,
        event: &Event,
    ) -> Result<RateLimitStatus, RateLimitError> {
        let resolved = resolve_rule(&self.config, event);
        let mut status = RateLimitStatus {
            event_type: event.event_type().to_string(),
            rule_source: resolved.source,
            bypass: resolved.rule.bypass,
            cost: resolved.cost,
            keys: Vec::new(),
        };
        if resolved.rule.bypass {
            return Ok(status);
        }

        let keys = derive_keys(&self.config, event, &resolved);
        let request = build_request(&keys, resolved.cost, self.clock.now_ms());
        let decisions = self
            .bounded("peek_token_buckets", self.store.peek_token_buckets(&request))
            .await?;
        check_shape(&keys, &decisions)?;

        status.keys = keys
            .iter()
            .zip(decisions.iter())
            .map(|(key, decision)| KeyStatus {
                key: key.key.clone(),
                limit_type: key.limit_type,
                capacity: key.rule.burst_capacity,
                remaining: decision.remaining,
                reset_after_ms: decision.reset_after_ms,
            })
            .collect();
        Ok(status)
    }

    /// Store reachable and circuit closed
    pub async fn health_check(&self) -> bool {
        let reachable = self
            .bounded("health_check", self.store.health_check())
            .await
            .unwrap_or(false);
        reachable && self.breaker.state() == CircuitState::Closed
    }

    async fn evaluate(&self, request: &TokenBucketRequest) -> StoreResult<Vec<BucketDecision>> {
        let store = self.store.as_ref();
        let sha = self
            .bounded("script_load", self.scripts.get_or_load(store))
            .await?;

        let decisions = match self
            .bounded("eval_token_buckets", store.eval_token_buckets(&sha, request))
            .await
        {
            Err(StoreError::ScriptNotFound(_)) => {
                warn!(sha = %sha, "🚦 RATE_LIMIT: Script missing from store, reloading once");
                self.scripts.invalidate(&sha).await;
                let sha = self
                    .bounded("script_load", self.scripts.get_or_load(store))
                    .await?;
                self.bounded("eval_token_buckets", store.eval_token_buckets(&sha, request))
                    .await?
            }
            other => other?,
        };

        if decisions.len() != request.len() {
            return Err(StoreError::MalformedResponse(format!(
                "expected {} bucket rows, got {}",
                request.len(),
                decisions.len()
            )));
        }
        Ok(decisions)
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        future: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        match timeout(self.config.store_timeout(), future).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(format!(
                "{operation} exceeded {}ms",
                self.config.store_timeout_ms
            ))),
        }
    }

    fn fail_open(&self, event: &Event, reason: &str) -> RateLimitResult {
        warn!(
            event_type = %event.event_type(),
            reason = %reason,
            "🚦 RATE_LIMIT: Store unavailable, failing open"
        );
        metrics::rate_limit_failures_total().add(1, &[KeyValue::new("policy", "fail_open")]);
        let result = RateLimitResult::admitted_without_check();
        self.record_decision(event, &result);
        result
    }

    fn fail_closed(&self, event: &Event, error: &StoreError) -> RateLimitResult {
        error!(
            event_type = %event.event_type(),
            error = %error,
            retry_after_ms = self.config.fail_closed_retry_after_ms,
            "🚦 RATE_LIMIT: Unexpected evaluation failure, failing closed"
        );
        metrics::rate_limit_failures_total().add(1, &[KeyValue::new("policy", "fail_closed")]);
        let result = RateLimitResult::denied(self.config.fail_closed_retry_after_ms, None);
        self.record_decision(event, &result);
        result
    }

    fn record_decision(&self, event: &Event, result: &RateLimitResult) {
        log_rate_limit_decision(
            event.event_type(),
            result.allowed,
            result.limit_type.as_deref(),
            result.retry_after_ms,
        );
        metrics::rate_limit_decisions_total().add(
            1,
            &[
                KeyValue::new("allowed", result.allowed),
                KeyValue::new(
                    "limit_type",
                    result.limit_type.clone().unwrap_or_else(|| "none".to_string()),
                ),
            ],
        );
    }
}

/// Deny outright when `cost` can never fit in one of the buckets
///
/// No refill would ever admit such an event, so no retry hint is given.
fn cost_exceeds_capacity(event: &Event, keys: &[RateLimitKey], cost: f64) -> Option<RateLimitResult> {
    let key = keys.iter().find(|key| key.rule.burst_capacity < cost)?;
    error!(
        event_type = %event.event_type(),
        key = %key.key,
        cost = cost,
        capacity = key.rule.burst_capacity,
        "🚦 RATE_LIMIT: Event cost exceeds bucket capacity, denied"
    );
    Some(RateLimitResult {
        allowed: false,
        remaining_quota: None,
        reset_time: None,
        retry_after_ms: None,
        limit_type: Some(COST_EXCEEDS_CAPACITY.to_string()),
    })
}

fn build_request(keys: &[RateLimitKey], cost: f64, now_ms: u64) -> TokenBucketRequest {
    TokenBucketRequest {
        keys: keys.iter().map(|k| k.key.clone()).collect(),
        capacities: keys.iter().map(|k| k.rule.burst_capacity).collect(),
        rates: keys.iter().map(|k| k.rule.events_per_second).collect(),
        cost,
        now_ms,
    }
}

fn check_shape(keys: &[RateLimitKey], decisions: &[BucketDecision]) -> StoreResult<()> {
    if keys.len() == decisions.len() {
        Ok(())
    } else {
        Err(StoreError::MalformedResponse(format!(
            "expected {} bucket rows, got {}",
            keys.len(),
            decisions.len()
        )))
    }
}

fn reset_time(now_ms: u64, reset_after_ms: u64) -> Option<DateTime<Utc>> {
    let at_ms = i64::try_from(now_ms.saturating_add(reset_after_ms)).ok()?;
    DateTime::<Utc>::from_timestamp_millis(at_ms)
}

/// Fold per-key answers into one decision; the first denying key wins
fn interpret(keys: &[RateLimitKey], decisions: &[BucketDecision], now_ms: u64) -> RateLimitResult {
    if let Some((key, decision)) = keys
        .iter()
        .zip(decisions.iter())
        .find(|(_, decision)| !decision.allowed)
    {
        return RateLimitResult {
            allowed: false,
            remaining_quota: Some(decision.remaining),
            reset_time: reset_time(now_ms, decision.reset_after_ms),
            retry_after_ms: Some(decision.wait_ms.max(1)),
            limit_type: Some(key.limit_type.as_str().to_string()),
        };
    }

    let tightest = decisions
        .iter()
        .min_by(|a, b| a.remaining.total_cmp(&b.remaining));

    RateLimitResult {
        allowed: true,
        remaining_quota: tightest.map(|d| d.remaining),
        reset_time: tightest.and_then(|d| reset_time(now_ms, d.reset_after_ms)),
        retry_after_ms: None,
        limit_type: None,
    }
}
