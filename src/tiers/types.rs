//! Tier levels and the delegate boundary shapes

use crate::constants::prefixes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// One layer of the execution hierarchy, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierLevel {
    Coordination,
    Process,
    Execution,
}

impl TierLevel {
    pub const ALL: [TierLevel; 3] = [
        TierLevel::Coordination,
        TierLevel::Process,
        TierLevel::Execution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TierLevel::Coordination => prefixes::COORDINATION,
            TierLevel::Process => prefixes::PROCESS,
            TierLevel::Execution => prefixes::EXECUTION,
        }
    }

    /// Resolve a tier from an event-type head segment or a payload value
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_lowercase().as_str() {
            prefixes::COORDINATION => Some(TierLevel::Coordination),
            prefixes::PROCESS => Some(TierLevel::Process),
            prefixes::EXECUTION => Some(TierLevel::Execution),
            _ => None,
        }
    }

    /// The tier this one delegates to; `None` for the leaf tier
    pub fn next_lower(&self) -> Option<Self> {
        match self {
            TierLevel::Coordination => Some(TierLevel::Process),
            TierLevel::Process => Some(TierLevel::Execution),
            TierLevel::Execution => None,
        }
    }
}

impl fmt::Display for TierLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TierLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_prefix(s).ok_or_else(|| format!("Invalid tier level: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Failed,
    InProgress,
}

/// The only request shape a tier knows about the tier beneath it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub execution_id: String,
    #[serde(rename = "type")]
    pub request_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl ExecutionRequest {
    pub fn new(request_type: impl Into<String>, payload: Value) -> Self {
        Self {
            execution_id: Uuid::now_v7().to_string(),
            request_type: request_type.into(),
            user_id: None,
            payload,
        }
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = execution_id.into();
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Request for the tier below `tier`
    ///
    /// The narrowed request gets a fresh execution id, and `tier`'s private
    /// payload section (the object under its name) is removed.
    pub fn narrow_for(&self, tier: TierLevel) -> Self {
        let payload = match &self.payload {
            Value::Object(map) => {
                let narrowed: Map<String, Value> = map
                    .iter()
                    .filter(|(key, _)| key.as_str() != tier.as_str())
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                Value::Object(narrowed)
            }
            other => other.clone(),
        };

        Self {
            execution_id: Uuid::now_v7().to_string(),
            request_type: self.request_type.clone(),
            user_id: self.user_id.clone(),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResponse {
    pub execution_id: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl ExecutionResponse {
    pub fn completed(execution_id: impl Into<String>, data: Value) -> Self {
        Self {
            execution_id: execution_id.into(),
            status: ExecutionStatus::Completed,
            data: Some(data),
            error: None,
            metadata: None,
        }
    }

    pub fn failed(execution_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            status: ExecutionStatus::Failed,
            data: None,
            error: Some(error.into()),
            metadata: None,
        }
    }

    pub fn in_progress(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            status: ExecutionStatus::InProgress,
            data: None,
            error: None,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }
}
