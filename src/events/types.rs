//! # Event Types
//!
//! Events are immutable once built. Their kind is resolved from the first
//! segment of the event type when the event is constructed, so routing code
//! matches on [`EventKind`] instead of re-parsing prefixes.

use crate::constants::{payload_fields, prefixes};
use crate::tiers::TierLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Whether a published event may be lost
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryGuarantee {
    #[default]
    FireAndForget,
    AtLeastOnce,
}

impl DeliveryGuarantee {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryGuarantee::FireAndForget => "fire_and_forget",
            DeliveryGuarantee::AtLeastOnce => "at_least_once",
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub delivery_guarantee: DeliveryGuarantee,
    pub priority: Priority,
    /// Component that published the event
    pub source: Option<String>,
    /// Execution id this event belongs to, if any
    pub correlation_id: Option<String>,
}

/// Category of an event, resolved once from its type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EventKind {
    /// Emitted by one of the three tiers
    Tier(TierLevel),
    /// Safety and emergency events; never dropped or rate limited by default
    Safety,
    /// Monitoring and heartbeat traffic
    Telemetry,
    /// Classification and recovery events
    Resilience,
    /// Anything else, carrying its first segment
    Custom(String),
}

impl EventKind {
    /// Resolve the kind from a `/`-delimited event type (`.` is accepted too)
    pub fn from_event_type(event_type: &str) -> Self {
        let head = event_type
            .split(['/', '.'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        if let Some(tier) = TierLevel::from_prefix(&head) {
            return EventKind::Tier(tier);
        }

        match head.as_str() {
            prefixes::SAFETY | prefixes::EMERGENCY => EventKind::Safety,
            prefixes::TELEMETRY | prefixes::MONITORING => EventKind::Telemetry,
            prefixes::RESILIENCE => EventKind::Resilience,
            _ => EventKind::Custom(head),
        }
    }

    /// Name used for category rules and metric labels
    pub fn name(&self) -> &str {
        match self {
            EventKind::Tier(tier) => tier.as_str(),
            EventKind::Safety => prefixes::SAFETY,
            EventKind::Telemetry => prefixes::TELEMETRY,
            EventKind::Resilience => prefixes::RESILIENCE,
            EventKind::Custom(head) => head,
        }
    }

    pub fn is_safety(&self) -> bool {
        matches!(self, EventKind::Safety)
    }

    pub fn tier(&self) -> Option<TierLevel> {
        match self {
            EventKind::Tier(tier) => Some(*tier),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An event flowing through the bus
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    id: Uuid,
    #[serde(rename = "type")]
    event_type: String,
    timestamp: DateTime<Utc>,
    data: Value,
    metadata: EventMetadata,
    kind: EventKind,
}

impl Event {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        let event_type = event_type.into();
        let kind = EventKind::from_event_type(&event_type);
        Self {
            id: Uuid::now_v7(),
            event_type,
            timestamp: Utc::now(),
            data,
            metadata: EventMetadata::default(),
            kind,
        }
    }

    /// Event emitted by a tier, typed `<tier>/<suffix>`
    pub fn for_tier(tier: TierLevel, suffix: &str, data: Value) -> Self {
        Self::new(format!("{}/{suffix}", tier.as_str()), data).with_source(tier.as_str())
    }

    pub fn with_delivery_guarantee(mut self, guarantee: DeliveryGuarantee) -> Self {
        self.metadata.delivery_guarantee = guarantee;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.metadata.priority = priority;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = Some(source.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.metadata.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn is_safety(&self) -> bool {
        self.kind.is_safety()
    }

    /// First string value found under any of `fields` in the payload
    pub fn payload_str(&self, fields: &[&str]) -> Option<&str> {
        fields
            .iter()
            .find_map(|field| self.data.get(*field).and_then(Value::as_str))
    }

    /// Tier of the event: its kind, or the payload's `tier` field
    pub fn tier(&self) -> Option<TierLevel> {
        self.kind.tier().or_else(|| {
            self.payload_str(payload_fields::TIER)
                .and_then(TierLevel::from_prefix)
        })
    }

    pub fn user_id(&self) -> Option<&str> {
        self.payload_str(payload_fields::USER_ID)
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.payload_str(payload_fields::CONVERSATION_ID)
    }

    pub fn external_api(&self) -> Option<&str> {
        self.payload_str(payload_fields::EXTERNAL_API)
    }
}
