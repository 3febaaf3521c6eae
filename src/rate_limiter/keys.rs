//! Rate-limit key derivation
//!
//! One event maps to several independent buckets. The event is admitted only
//! when every bucket admits it.

use super::rules::{RateLimitRule, ResolvedRule};
use crate::config::RateLimitConfig;
use crate::constants::rate_limit_keys as k;
use crate::events::Event;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dimension a bucket limits, reported as `limit_type` on denial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    Global,
    EventType,
    Tier,
    User,
    UserEventType,
    Conversation,
}

impl LimitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitType::Global => "global",
            LimitType::EventType => "event_type",
            LimitType::Tier => "tier",
            LimitType::User => "user",
            LimitType::UserEventType => "user_event_type",
            LimitType::Conversation => "conversation",
        }
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitKey {
    pub key: String,
    pub limit_type: LimitType,
    pub rule: RateLimitRule,
}

fn key(parts: &[&str]) -> String {
    let mut key = String::from(k::PREFIX);
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}

/// Derive the buckets `event` is checked against, in reporting order
pub fn derive_keys(
    config: &RateLimitConfig,
    event: &Event,
    resolved: &ResolvedRule,
) -> Vec<RateLimitKey> {
    let event_type = event.event_type();
    let mut keys = vec![
        RateLimitKey {
            key: key(&[k::GLOBAL]),
            limit_type: LimitType::Global,
            rule: config.global,
        },
        RateLimitKey {
            key: key(&[k::EVENT_TYPE, event_type]),
            limit_type: LimitType::EventType,
            rule: resolved.rule,
        },
    ];

    if let Some(tier) = event.tier() {
        let rule = config
            .tiers
            .get(tier.as_str())
            .copied()
            .unwrap_or(resolved.rule);
        keys.push(RateLimitKey {
            key: key(&[k::TIER, tier.as_str()]),
            limit_type: LimitType::Tier,
            rule,
        });
    }

    if let Some(user) = event.user_id() {
        keys.push(RateLimitKey {
            key: key(&[k::USER, user]),
            limit_type: LimitType::User,
            rule: resolved.rule,
        });

        if resolved.expensive {
            keys.push(RateLimitKey {
                key: key(&[k::USER_EVENT_TYPE, user, event_type]),
                limit_type: LimitType::UserEventType,
                rule: resolved.rule,
            });
        }
    }

    if let Some(conversation) = event.conversation_id() {
        keys.push(RateLimitKey {
            key: key(&[k::CONVERSATION, conversation]),
            limit_type: LimitType::Conversation,
            rule: resolved.rule,
        });
    }

    keys
}
