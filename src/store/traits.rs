//! Shared atomic store trait definition

use super::errors::StoreResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Arguments for one atomic multi-key token-bucket evaluation
///
/// `keys`, `capacities` and `rates` are parallel arrays. The cost is charged
/// to every key, and only when every key can pay it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketRequest {
    pub keys: Vec<String>,
    pub capacities: Vec<f64>,
    pub rates: Vec<f64>,
    pub cost: f64,
    pub now_ms: u64,
}

impl TokenBucketRequest {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Parallel arrays must line up
    pub fn is_well_formed(&self) -> bool {
        self.keys.len() == self.capacities.len() && self.keys.len() == self.rates.len()
    }
}

/// Per-key answer from a token-bucket evaluation or peek
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketDecision {
    /// This key alone could pay the cost
    pub allowed: bool,
    /// Milliseconds until this key could pay, zero when allowed
    pub wait_ms: u64,
    /// Tokens left after the evaluation
    pub remaining: f64,
    /// Milliseconds until the bucket is full again
    pub reset_after_ms: u64,
}

/// Key-value store with atomic token-bucket scripts and TTL storage
///
/// Implemented by in-process and networked backends. Every operation is async
/// and returns [`StoreResult`].
#[async_trait]
pub trait AtomicStore: Send + Sync {
    /// Register a script and return its content hash
    async fn script_load(&self, script: &str) -> StoreResult<String>;

    /// Atomically check and debit every bucket named in `request`
    ///
    /// Fails with `ScriptNotFound` when `sha` has not been loaded.
    async fn eval_token_buckets(
        &self,
        sha: &str,
        request: &TokenBucketRequest,
    ) -> StoreResult<Vec<BucketDecision>>;

    /// Report bucket state as of `request.now_ms` without mutating it
    async fn peek_token_buckets(&self, request: &TokenBucketRequest)
        -> StoreResult<Vec<BucketDecision>>;

    /// Get a value by key; `Ok(None)` on miss or expiry
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set a value with a TTL
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> StoreResult<bool>;

    fn provider_name(&self) -> &'static str;
}
