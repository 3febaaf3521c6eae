//! # Rate Limiter
//!
//! Token-bucket admission control for published events.
//!
//! ```rust,no_run
//! use agent_runtime::config::RateLimitConfig;
//! use agent_runtime::events::Event;
//! use agent_runtime::rate_limiter::{EventRateLimiter, ScriptCache};
//! use agent_runtime::store::InMemoryAtomicStore;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let limiter = EventRateLimiter::new(
//!     RateLimitConfig::default(),
//!     Arc::new(InMemoryAtomicStore::new()),
//!     Arc::new(ScriptCache::default()),
//! );
//!
//! let decision = limiter
//!     .check_event_rate_limit(&Event::new("execution/llm_call", json!({"userId": "u1"})))
//!     .await;
//! assert!(decision.allowed);
//! # });
//! ```

pub mod clock;
pub mod keys;
pub mod limiter;
pub mod rules;
pub mod script_cache;

pub use clock::{Clock, ManualClock, SystemClock};
pub use keys::{derive_keys, LimitType, RateLimitKey};
pub use limiter::{
    EventRateLimiter, KeyStatus, RateLimitError, RateLimitResult, RateLimitStatus,
    COST_EXCEEDS_CAPACITY,
};
pub use rules::{resolve_rule, RateLimitRule, ResolvedRule, RuleSource};
pub use script_cache::{ScriptCache, TOKEN_BUCKET_SCRIPT};
