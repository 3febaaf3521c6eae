use agent_runtime::config::RateLimitConfig;
use agent_runtime::events::Event;
use agent_runtime::rate_limiter::{
    EventRateLimiter, LimitType, ManualClock, RateLimitRule, ScriptCache,
};
use agent_runtime::store::InMemoryAtomicStore;
use serde_json::json;
use std::sync::Arc;

fn limiter(
    config: RateLimitConfig,
) -> (Arc<EventRateLimiter>, Arc<InMemoryAtomicStore>, Arc<ManualClock>) {
    let store = Arc::new(InMemoryAtomicStore::new());
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let limiter = EventRateLimiter::new(config, store.clone(), Arc::new(ScriptCache::default()))
        .with_clock(clock.clone());
    (Arc::new(limiter), store, clock)
}

fn burst_config() -> RateLimitConfig {
    let mut config = RateLimitConfig::default();
    config.event_types.insert(
        "execution/tool_call".to_string(),
        RateLimitRule::new(5.0, 10.0),
    );
    config
}

#[tokio::test]
async fn test_burst_of_twenty_admits_first_ten() {
    let (limiter, _store, clock) = limiter(burst_config());
    let event = Event::new("execution/tool_call", json!({}));

    let mut admitted = 0;
    let mut retry_hints = Vec::new();
    // 20 events spread over 100ms refill half a token, never a whole one
    for _ in 0..20 {
        let result = limiter.check_event_rate_limit(&event).await;
        if result.allowed {
            admitted += 1;
        } else {
            assert_eq!(result.limit_type.as_deref(), Some("event_type"));
            retry_hints.push(result.retry_after_ms.unwrap());
        }
        clock.advance(5);
    }

    assert_eq!(admitted, 10);
    assert_eq!(retry_hints.len(), 10);
    assert!(retry_hints[0] > 0);
    assert!(retry_hints.windows(2).all(|pair| pair[1] > pair[0]));
}

#[tokio::test]
async fn test_stream_within_rate_is_fully_admitted() {
    let (limiter, _store, clock) = limiter(burst_config());
    let event = Event::new("execution/tool_call", json!({}));

    // 5 per second for 10 seconds never exceeds the refill rate
    for _ in 0..50 {
        assert!(limiter.check_event_rate_limit(&event).await.allowed);
        clock.advance(200);
    }
}

#[tokio::test]
async fn test_concurrent_callers_cannot_overshoot_capacity() {
    let (limiter, _store, _clock) = limiter(burst_config());

    let mut handles = Vec::new();
    for _ in 0..40 {
        let limiter = Arc::clone(&limiter);
        handles.push(tokio::spawn(async move {
            limiter
                .check_event_rate_limit(&Event::new("execution/tool_call", json!({})))
                .await
                .allowed
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 10);
}

#[tokio::test]
async fn test_user_bucket_isolates_users() {
    let mut config = RateLimitConfig::default();
    config.default = RateLimitRule::new(1.0, 2.0);
    let (limiter, _store, _clock) = limiter(config);

    let for_user = |user: &str| Event::new("process/plan", json!({"user_id": user}));

    assert!(limiter.check_event_rate_limit(&for_user("alice")).await.allowed);
    assert!(limiter.check_event_rate_limit(&for_user("alice")).await.allowed);
    let status = limiter.get_rate_limit_status(&for_user("bob")).await.unwrap();
    let bob = status
        .keys
        .iter()
        .find(|k| k.limit_type == LimitType::User)
        .unwrap();
    assert_eq!(bob.remaining, bob.capacity);
}

#[tokio::test]
async fn test_bypass_rule_admits_under_load_without_round_trips() {
    let mut config = burst_config();
    config
        .event_types
        .insert("execution/tool_call".to_string(), RateLimitRule::bypass());
    let (limiter, store, _clock) = limiter(config);

    for _ in 0..500 {
        assert!(limiter
            .check_event_rate_limit(&Event::new("execution/tool_call", json!({})))
            .await
            .allowed);
    }
    assert_eq!(store.round_trips(), 0);
}

#[tokio::test]
async fn test_disabled_limiter_admits_everything() {
    let mut config = burst_config();
    config.enabled = false;
    let (limiter, store, _clock) = limiter(config);

    for _ in 0..30 {
        assert!(limiter
            .check_event_rate_limit(&Event::new("execution/tool_call", json!({})))
            .await
            .allowed);
    }
    assert_eq!(store.round_trips(), 0);
}

#[tokio::test]
async fn test_health_check_tracks_store_availability() {
    let (limiter, store, _clock) = limiter(burst_config());
    assert!(limiter.health_check().await);

    store.set_available(false);
    assert!(!limiter.health_check().await);
}
