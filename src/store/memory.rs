//! In-process atomic store
//!
//! Buckets for one evaluation are read, checked and debited under a single
//! lock, which gives the same all-or-nothing guarantee a server-side script
//! gives a networked backend. Also carries fault-injection controls used by
//! the limiter and tier tests.

use super::errors::{StoreError, StoreResult};
use super::traits::{AtomicStore, BucketDecision, TokenBucketRequest};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Persisted state of one token bucket
#[derive(Debug, Clone, PartialEq)]
pub struct BucketState {
    pub tokens: f64,
    pub last_refill_ms: u64,
    /// Denials since the last admission, used to queue retry hints
    pub denied_backlog: u32,
    /// When refill brings the bucket back to capacity; an absent bucket
    /// behaves the same from then on
    pub full_at_ms: u64,
}

impl BucketState {
    fn full(capacity: f64, now_ms: u64) -> Self {
        Self {
            tokens: capacity,
            last_refill_ms: now_ms,
            denied_backlog: 0,
            full_at_ms: now_ms,
        }
    }

    /// Apply continuous refill up to `now_ms`
    fn refilled(&self, capacity: f64, rate: f64, now_ms: u64) -> Self {
        let elapsed_ms = now_ms.saturating_sub(self.last_refill_ms) as f64;
        Self {
            tokens: (self.tokens + elapsed_ms / 1000.0 * rate).min(capacity),
            last_refill_ms: now_ms.max(self.last_refill_ms),
            denied_backlog: self.denied_backlog,
            full_at_ms: self.full_at_ms,
        }
    }
}

fn millis_to_fill(deficit: f64, rate: f64) -> u64 {
    if deficit <= 0.0 {
        0
    } else if rate <= 0.0 {
        u64::MAX
    } else {
        (deficit / rate * 1000.0).ceil() as u64
    }
}

/// Evaluate `request` against `buckets`
///
/// Every bucket is refilled first. If all of them can pay `cost` they are all
/// debited and their backlogs cleared; otherwise none is debited and each
/// short bucket grows its backlog so the next denied caller is told to wait
/// behind this one. With `commit == false` nothing is written back.
pub fn evaluate_token_buckets(
    buckets: &mut HashMap<String, BucketState>,
    request: &TokenBucketRequest,
    commit: bool,
) -> Vec<BucketDecision> {
    let refilled: Vec<BucketState> = request
        .keys
        .iter()
        .zip(request.capacities.iter().zip(request.rates.iter()))
        .map(|(key, (&capacity, &rate))| match buckets.get(key) {
            Some(state) => state.refilled(capacity, rate, request.now_ms),
            None => BucketState::full(capacity, request.now_ms),
        })
        .collect();

    let admit_all = refilled.iter().all(|state| state.tokens >= request.cost);

    let mut decisions = Vec::with_capacity(request.len());
    for (idx, mut state) in refilled.into_iter().enumerate() {
        let capacity = request.capacities[idx];
        let rate = request.rates[idx];
        let can_pay = state.tokens >= request.cost;

        let wait_ms = if admit_all {
            state.tokens -= request.cost;
            state.denied_backlog = 0;
            0
        } else if can_pay {
            0
        } else {
            let queued = request.cost * f64::from(state.denied_backlog + 1);
            state.denied_backlog = state.denied_backlog.saturating_add(1);
            millis_to_fill(queued - state.tokens, rate)
        };

        decisions.push(BucketDecision {
            allowed: can_pay,
            wait_ms,
            remaining: state.tokens.max(0.0),
            reset_after_ms: millis_to_fill(capacity - state.tokens, rate),
        });

        if commit {
            state.full_at_ms = state
                .last_refill_ms
                .saturating_add(millis_to_fill(capacity - state.tokens, rate));
            buckets.insert(request.keys[idx].clone(), state);
        }
    }

    decisions
}

/// Drop buckets that have refilled to capacity by `now_ms`
///
/// Returns how many were removed. A missing bucket is created full, so
/// eviction never changes a later decision.
pub fn evict_idle_buckets(buckets: &mut HashMap<String, BucketState>, now_ms: u64) -> usize {
    let before = buckets.len();
    buckets.retain(|_, state| state.full_at_ms > now_ms);
    before - buckets.len()
}

/// Idle buckets are swept at most this often, in store time
const BUCKET_SWEEP_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Instant,
}

/// Atomic store living entirely in process memory
#[derive(Debug)]
pub struct InMemoryAtomicStore {
    buckets: Mutex<HashMap<String, BucketState>>,
    scripts: Mutex<HashSet<String>>,
    values: DashMap<String, StoredValue>,
    available: AtomicBool,
    latency: Mutex<Option<Duration>>,
    injected_fault: Mutex<Option<StoreError>>,
    round_trips: AtomicU64,
    script_loads: AtomicU64,
    last_sweep_ms: AtomicU64,
}

impl Default for InMemoryAtomicStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAtomicStore {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashSet::new()),
            values: DashMap::new(),
            available: AtomicBool::new(true),
            latency: Mutex::new(None),
            injected_fault: Mutex::new(None),
            round_trips: AtomicU64::new(0),
            script_loads: AtomicU64::new(0),
            last_sweep_ms: AtomicU64::new(0),
        }
    }

    /// Content hash used to identify a script
    pub fn script_sha(script: &str) -> String {
        hex::encode(Sha256::digest(script.as_bytes()))
    }

    /// Total operations that reached the store, including failed ones
    pub fn round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::SeqCst)
    }

    /// Number of `script_load` calls served
    pub fn script_loads(&self) -> u64 {
        self.script_loads.load(Ordering::SeqCst)
    }

    /// Forget all loaded scripts, as a server restart would
    pub fn flush_scripts(&self) {
        self.scripts.lock().clear();
    }

    /// Simulate the backend going away or coming back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Fail the next operation with `error`
    pub fn inject_fault(&self, error: StoreError) {
        *self.injected_fault.lock() = Some(error);
    }

    /// Buckets currently held in memory
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Evict full buckets and expired values
    pub fn sweep(&self, now_ms: u64) -> usize {
        self.last_sweep_ms.store(now_ms, Ordering::SeqCst);
        let evicted = evict_idle_buckets(&mut self.buckets.lock(), now_ms);

        let wall = Instant::now();
        self.values.retain(|_, stored| stored.expires_at > wall);

        if evicted > 0 {
            debug!(evicted = evicted, "Idle token buckets evicted");
        }
        evicted
    }

    fn sweep_due(&self, now_ms: u64) -> bool {
        let last = self.last_sweep_ms.load(Ordering::SeqCst);
        now_ms.saturating_sub(last) >= BUCKET_SWEEP_INTERVAL_MS
            && self
                .last_sweep_ms
                .compare_exchange(last, now_ms, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }

    /// Current persisted bucket state, without refill
    pub fn bucket(&self, key: &str) -> Option<BucketState> {
        self.buckets.lock().get(key).cloned()
    }

    async fn enter(&self, operation: &str) -> StoreResult<()> {
        self.round_trips.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "in-memory store offline during {operation}"
            )));
        }

        if let Some(fault) = self.injected_fault.lock().take() {
            return Err(fault);
        }

        Ok(())
    }
}

#[async_trait]
impl AtomicStore for InMemoryAtomicStore {
    async fn script_load(&self, script: &str) -> StoreResult<String> {
        self.enter("script_load").await?;
        self.script_loads.fetch_add(1, Ordering::SeqCst);

        let sha = Self::script_sha(script);
        self.scripts.lock().insert(sha.clone());
        debug!(sha = %sha, "Script loaded into in-memory store");
        Ok(sha)
    }

    async fn eval_token_buckets(
        &self,
        sha: &str,
        request: &TokenBucketRequest,
    ) -> StoreResult<Vec<BucketDecision>> {
        self.enter("eval_token_buckets").await?;

        if !self.scripts.lock().contains(sha) {
            return Err(StoreError::ScriptNotFound(sha.to_string()));
        }
        if !request.is_well_formed() {
            return Err(StoreError::Backend(format!(
                "argument arrays differ in length: {} keys, {} capacities, {} rates",
                request.keys.len(),
                request.capacities.len(),
                request.rates.len()
            )));
        }

        if self.sweep_due(request.now_ms) {
            self.sweep(request.now_ms);
        }

        let mut buckets = self.buckets.lock();
        Ok(evaluate_token_buckets(&mut buckets, request, true))
    }

    async fn peek_token_buckets(
        &self,
        request: &TokenBucketRequest,
    ) -> StoreResult<Vec<BucketDecision>> {
        self.enter("peek_token_buckets").await?;

        if !request.is_well_formed() {
            return Err(StoreError::Backend("argument arrays differ in length".into()));
        }

        let mut buckets = self.buckets.lock();
        Ok(evaluate_token_buckets(&mut buckets, request, false))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.enter("get").await?;

        let expired = match self.values.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.values.remove(key);
        }
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.enter("set_with_ttl").await?;
        self.values.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.enter("delete").await?;
        self.values.remove(key);
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<bool> {
        Ok(self.available.load(Ordering::SeqCst))
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(keys: &[&str], capacity: f64, rate: f64, now_ms: u64) -> TokenBucketRequest {
        TokenBucketRequest {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            capacities: vec![capacity; keys.len()],
            rates: vec![rate; keys.len()],
            cost: 1.0,
            now_ms,
        }
    }

    #[tokio::test]
    async fn test_burst_then_denial() {
        let store = InMemoryAtomicStore::new();
        let sha = store.script_load("bucket").await.unwrap();

        for _ in 0..3 {
            let decisions = store
                .eval_token_buckets(&sha, &request(&["a"], 3.0, 1.0, 0))
                .await
                .unwrap();
            assert!(decisions[0].allowed);
        }

        let denied = store
            .eval_token_buckets(&sha, &request(&["a"], 3.0, 1.0, 0))
            .await
            .unwrap();
        assert!(!denied[0].allowed);
        assert_eq!(denied[0].wait_ms, 1_000);
    }

    #[tokio::test]
    async fn test_refill_over_time() {
        let store = InMemoryAtomicStore::new();
        let sha = store.script_load("bucket").await.unwrap();

        store
            .eval_token_buckets(&sha, &request(&["a"], 1.0, 2.0, 0))
            .await
            .unwrap();
        let early = store
            .eval_token_buckets(&sha, &request(&["a"], 1.0, 2.0, 100))
            .await
            .unwrap();
        assert!(!early[0].allowed);

        let later = store
            .eval_token_buckets(&sha, &request(&["a"], 1.0, 2.0, 600))
            .await
            .unwrap();
        assert!(later[0].allowed);
    }

    #[tokio::test]
    async fn test_and_semantics_leave_other_keys_untouched() {
        let store = InMemoryAtomicStore::new();
        let sha = store.script_load("bucket").await.unwrap();

        let mut req = request(&["wide", "narrow"], 10.0, 1.0, 0);
        req.capacities[1] = 1.0;

        assert!(store
            .eval_token_buckets(&sha, &req)
            .await
            .unwrap()
            .iter()
            .all(|d| d.allowed));

        let second = store.eval_token_buckets(&sha, &req).await.unwrap();
        assert!(second[0].allowed);
        assert!(!second[1].allowed);
        // The admitting key was not debited by the denied evaluation
        assert_eq!(store.bucket("wide").unwrap().tokens, 9.0);
    }

    #[tokio::test]
    async fn test_backlog_grows_wait() {
        let store = InMemoryAtomicStore::new();
        let sha = store.script_load("bucket").await.unwrap();
        let req = request(&["a"], 1.0, 1.0, 0);

        store.eval_token_buckets(&sha, &req).await.unwrap();
        let first = store.eval_token_buckets(&sha, &req).await.unwrap()[0].wait_ms;
        let second = store.eval_token_buckets(&sha, &req).await.unwrap()[0].wait_ms;
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_peek_does_not_mutate() {
        let store = InMemoryAtomicStore::new();
        let sha = store.script_load("bucket").await.unwrap();
        let req = request(&["a"], 5.0, 1.0, 0);
        store.eval_token_buckets(&sha, &req).await.unwrap();

        let before = store.bucket("a");
        let peeked = store.peek_token_buckets(&req).await.unwrap();
        assert_eq!(peeked[0].remaining, 4.0);
        assert_eq!(store.bucket("a"), before);
    }

    #[tokio::test]
    async fn test_unknown_script_rejected() {
        let store = InMemoryAtomicStore::new();
        let sha = store.script_load("bucket").await.unwrap();
        store.flush_scripts();
        let result = store.eval_token_buckets(&sha, &request(&["a"], 1.0, 1.0, 0)).await;
        assert!(matches!(result, Err(StoreError::ScriptNotFound(_))));
    }

    #[tokio::test]
    async fn test_ttl_values_expire() {
        let store = InMemoryAtomicStore::new();
        store
            .set_with_ttl("run:1", "{}", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(store.get("run:1").await.unwrap(), Some("{}".to_string()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("run:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unavailable_and_injected_faults() {
        let store = InMemoryAtomicStore::new();
        store.set_available(false);
        assert!(matches!(
            store.get("x").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(!store.health_check().await.unwrap());

        store.set_available(true);
        store.inject_fault(StoreError::Backend("boom".into()));
        assert!(matches!(store.get("x").await, Err(StoreError::Backend(_))));
        assert!(store.get("x").await.is_ok());
    }

    #[tokio::test]
    async fn test_idle_buckets_are_evicted() {
        let store = InMemoryAtomicStore::new();
        let sha = store.script_load("bucket").await.unwrap();
        let start = 1_000;

        for user in 0..5_000 {
            let key = format!("rate_limit:user:{user}");
            store
                .eval_token_buckets(&sha, &request(&[key.as_str()], 2.0, 1.0, start))
                .await
                .unwrap();
        }
        assert_eq!(store.bucket_count(), 5_000);

        let hour_later = start + 3_600_000;
        store
            .eval_token_buckets(&sha, &request(&["rate_limit:user:late"], 2.0, 1.0, hour_later))
            .await
            .unwrap();
        assert_eq!(store.bucket_count(), 1);
    }

    #[test]
    fn test_eviction_keeps_draining_buckets() {
        let mut buckets = HashMap::new();
        let req = request(&["hot"], 4.0, 1.0, 10_000);
        for _ in 0..4 {
            evaluate_token_buckets(&mut buckets, &req, true);
        }

        // Four tokens at one per second refill by 14s
        assert_eq!(evict_idle_buckets(&mut buckets, 13_999), 0);
        assert_eq!(buckets["hot"].full_at_ms, 14_000);
        assert_eq!(evict_idle_buckets(&mut buckets, 14_000), 1);

        // A recreated bucket starts full, as the evicted one would have been
        let decision = evaluate_token_buckets(&mut buckets, &request(&["hot"], 4.0, 1.0, 14_000), true)
            .remove(0);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 3.0);
    }
}
