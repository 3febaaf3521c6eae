//! # System Constants
//!
//! Canonical event-type names and default thresholds shared by the event bus,
//! rate limiter, resilience layer and tier state machines.
//!
//! Event types are hierarchical, `/`-delimited strings. The first segment names
//! the emitting tier or subsystem and is resolved once into an
//! [`EventKind`](crate::events::EventKind) when the event is built.

/// Event types published by the runtime itself
pub mod events {
    // Run lifecycle, emitted by every tier as "<tier>/run/<transition>"
    pub const RUN_CREATED: &str = "run/created";
    pub const RUN_STARTED: &str = "run/started";
    pub const RUN_CHECKPOINT_SAVED: &str = "run/checkpoint_saved";
    pub const RUN_COMPLETED: &str = "run/completed";
    pub const RUN_FAILED: &str = "run/failed";
    pub const RUN_RETRY_SCHEDULED: &str = "run/retry_scheduled";

    // Resource readings, emitted as "<tier>/resource/reading"
    pub const RESOURCE_READING: &str = "resource/reading";

    // Resilience layer
    pub const ERROR_CLASSIFIED: &str = "resilience/error/classified";
    pub const RECOVERY_SELECTED: &str = "resilience/recovery/selected";
    pub const RECOVERY_COMPLETED: &str = "resilience/recovery/completed";
    pub const PATTERN_ADDED: &str = "resilience/pattern/added";

    // Safety events bypass rate limiting entirely
    pub const EMERGENCY_STOP: &str = "safety/emergency_stop";
    pub const ESCALATED_TO_HUMAN: &str = "safety/escalated_to_human";

    // Monitoring
    pub const TELEMETRY_HEARTBEAT: &str = "telemetry/heartbeat";
    pub const DELIVERY_FAILED: &str = "telemetry/delivery_failed";
}

/// First-segment prefixes that resolve to an event kind
pub mod prefixes {
    pub const COORDINATION: &str = "coordination";
    pub const PROCESS: &str = "process";
    pub const EXECUTION: &str = "execution";
    pub const SAFETY: &str = "safety";
    pub const EMERGENCY: &str = "emergency";
    pub const TELEMETRY: &str = "telemetry";
    pub const MONITORING: &str = "monitoring";
    pub const RESILIENCE: &str = "resilience";
}

/// Rate limiter key namespaces
pub mod rate_limit_keys {
    pub const PREFIX: &str = "rl";
    pub const GLOBAL: &str = "global";
    pub const EVENT_TYPE: &str = "type";
    pub const TIER: &str = "tier";
    pub const USER: &str = "user";
    pub const USER_EVENT_TYPE: &str = "user_type";
    pub const CONVERSATION: &str = "conversation";
}

/// Payload fields consulted when deriving rate-limit keys
pub mod payload_fields {
    pub const USER_ID: &[&str] = &["userId", "user_id"];
    pub const CONVERSATION_ID: &[&str] = &["conversationId", "conversation_id"];
    pub const TIER: &[&str] = &["tier"];
    pub const EXTERNAL_API: &[&str] = &["externalApi", "external_api"];
}

/// Default numeric thresholds
pub mod defaults {
    /// Retry-after reported when the limiter fails closed
    pub const FAIL_CLOSED_RETRY_AFTER_MS: u64 = 5_000;
    /// Timeout applied to every store round-trip
    pub const STORE_TIMEOUT_MS: u64 = 250;
    /// Overall bound on a single publish call
    pub const PUBLISH_TIMEOUT_MS: u64 = 2_000;
    /// Bounded queue per subscriber
    pub const SUBSCRIBER_BUFFER_SIZE: usize = 1_024;
    /// Timeout applied to each delegate invocation
    pub const DELEGATE_TIMEOUT_MS: u64 = 30_000;
    /// Severity escalates at or after this attempt count
    pub const SEVERITY_ESCALATION_ATTEMPTS: u32 = 4;
    /// Severity escalates once this many strategies were already tried
    pub const SEVERITY_ESCALATION_PREVIOUS_STRATEGIES: usize = 2;
    /// Memory or CPU usage at or above this ratio counts as contention
    pub const RESOURCE_CONTENTION_THRESHOLD: f64 = 0.8;
    /// Minimum weighted score for a learned pattern to match
    pub const PATTERN_MATCH_THRESHOLD: f64 = 0.7;
    /// Success-rate prior used before any outcome has been recorded
    pub const DEFAULT_SUCCESS_PRIOR: f64 = 0.8;
}
