//! # Runtime Metrics
//!
//! OpenTelemetry instruments for the event bus, rate limiter and resilience
//! layer. The crate never installs an exporter; a host application that wants
//! these numbers registers a global meter provider before bootstrapping.
//!
//! ```rust
//! use agent_runtime::metrics::*;
//! use opentelemetry::KeyValue;
//!
//! rate_limit_decisions_total().add(
//!     1,
//!     &[
//!         KeyValue::new("event_type", "execution/llm_call"),
//!         KeyValue::new("allowed", true),
//!     ],
//! );
//! ```

use opentelemetry::metrics::{Counter, Histogram, Meter};
use std::sync::OnceLock;

static RUNTIME_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    RUNTIME_METER.get_or_init(|| opentelemetry::global::meter("agent-runtime"))
}

// Event bus

/// Events accepted by the bus and queued for delivery
///
/// Labels:
/// - event_kind: Resolved kind of the event
pub fn events_published_total() -> Counter<u64> {
    meter()
        .u64_counter("agent_runtime.events.published.total")
        .with_description("Events accepted by the bus")
        .build()
}

/// Events dropped because a subscriber queue was full or closed
pub fn events_dropped_total() -> Counter<u64> {
    meter()
        .u64_counter("agent_runtime.events.dropped.total")
        .with_description("Events dropped before reaching a subscriber")
        .build()
}

/// At-least-once deliveries that exhausted their retries
///
/// Labels:
/// - subscription_id
pub fn delivery_failures_total() -> Counter<u64> {
    meter()
        .u64_counter("agent_runtime.events.delivery_failures.total")
        .with_description("At-least-once deliveries that exhausted retries")
        .build()
}

/// Time spent inside publish, in milliseconds
pub fn publish_overhead_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("agent_runtime.events.publish_overhead_ms")
        .with_description("Publish overhead in milliseconds")
        .build()
}

// Rate limiter

/// Admission decisions
///
/// Labels:
/// - allowed: bool
/// - limit_type: Key dimension that denied, when denied
pub fn rate_limit_decisions_total() -> Counter<u64> {
    meter()
        .u64_counter("agent_runtime.rate_limit.decisions.total")
        .with_description("Rate limit admission decisions")
        .build()
}

/// Checks resolved by the failure policy instead of the store
///
/// Labels:
/// - policy: fail_open | fail_closed
pub fn rate_limit_failures_total() -> Counter<u64> {
    meter()
        .u64_counter("agent_runtime.rate_limit.failures.total")
        .with_description("Rate limit checks decided by the failure policy")
        .build()
}

// Resilience

/// Errors classified
///
/// Labels:
/// - category
/// - severity
pub fn errors_classified_total() -> Counter<u64> {
    meter()
        .u64_counter("agent_runtime.resilience.errors_classified.total")
        .with_description("Errors classified by the resilience layer")
        .build()
}

/// Recovery outcomes recorded
///
/// Labels:
/// - strategy
/// - success: bool
pub fn recovery_outcomes_total() -> Counter<u64> {
    meter()
        .u64_counter("agent_runtime.resilience.recovery_outcomes.total")
        .with_description("Recovery outcomes recorded")
        .build()
}
