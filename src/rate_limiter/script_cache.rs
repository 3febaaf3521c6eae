//! Single-flight cache for the token-bucket script hash
//!
//! Concurrent first callers share one `script_load` round-trip: the hash slot
//! is guarded by an async mutex held across the load. A `ScriptNotFound`
//! answer invalidates the slot so the next caller reloads.

use crate::store::{AtomicStore, StoreResult};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Atomic multi-key token bucket for script-capable backends
///
/// KEYS: bucket keys. ARGV: cost, now_ms, then one capacity/rate pair per key.
/// Returns one `{allowed, wait_ms, remaining, reset_after_ms}` row per key.
pub const TOKEN_BUCKET_SCRIPT: &str = r#"
local cost = tonumber(ARGV[1])
local now = tonumber(ARGV[2])
local states = {}
local admit = true

for i, key in ipairs(KEYS) do
  local capacity = tonumber(ARGV[1 + i * 2])
  local rate = tonumber(ARGV[2 + i * 2])
  local bucket = redis.call('HMGET', key, 'tokens', 'ts', 'backlog')
  local tokens = tonumber(bucket[1]) or capacity
  local ts = tonumber(bucket[2]) or now
  local backlog = tonumber(bucket[3]) or 0
  if now > ts then
    tokens = math.min(capacity, tokens + (now - ts) / 1000 * rate)
    ts = now
  end
  states[i] = {tokens, ts, backlog, capacity, rate}
  if tokens < cost then admit = false end
end

local result = {}
for i, key in ipairs(KEYS) do
  local tokens, ts, backlog, capacity, rate =
    states[i][1], states[i][2], states[i][3], states[i][4], states[i][5]
  local allowed = 0
  if tokens >= cost then allowed = 1 end
  local wait = 0
  if admit then
    tokens = tokens - cost
    backlog = 0
  elseif allowed == 0 then
    wait = math.ceil(((backlog + 1) * cost - tokens) / rate * 1000)
    backlog = backlog + 1
  end
  redis.call('HSET', key, 'tokens', tokens, 'ts', ts, 'backlog', backlog)
  redis.call('PEXPIRE', key, math.ceil(capacity / rate * 1000) + 1000)
  local reset = math.ceil((capacity - tokens) / rate * 1000)
  table.insert(result, {allowed, wait, tostring(tokens), reset})
end
return result
"#;

#[derive(Debug)]
pub struct ScriptCache {
    script: &'static str,
    sha: Mutex<Option<String>>,
}

impl Default for ScriptCache {
    fn default() -> Self {
        Self::new(TOKEN_BUCKET_SCRIPT)
    }
}

impl ScriptCache {
    pub fn new(script: &'static str) -> Self {
        Self {
            script,
            sha: Mutex::new(None),
        }
    }

    pub fn script(&self) -> &'static str {
        self.script
    }

    /// Cached hash, loading the script on first use
    pub async fn get_or_load(&self, store: &dyn AtomicStore) -> StoreResult<String> {
        let mut slot = self.sha.lock().await;
        if let Some(sha) = slot.as_ref() {
            return Ok(sha.clone());
        }

        let sha = store.script_load(self.script).await?;
        info!(sha = %sha, provider = store.provider_name(), "🚦 RATE_LIMIT: Token bucket script loaded");
        *slot = Some(sha.clone());
        Ok(sha)
    }

    /// Drop `stale` so the next caller reloads; a newer hash is kept
    pub async fn invalidate(&self, stale: &str) {
        let mut slot = self.sha.lock().await;
        if slot.as_deref() == Some(stale) {
            debug!(sha = %stale, "Token bucket script hash invalidated");
            *slot = None;
        }
    }

    pub async fn cached_sha(&self) -> Option<String> {
        self.sha.lock().await.clone()
    }
}
