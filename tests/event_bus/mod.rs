use crate::common::{settle, RecordingSubscriber};
use agent_runtime::config::{EventBusConfig, RateLimitConfig};
use agent_runtime::constants::events;
use agent_runtime::events::{
    handler_fn, DeliveryGuarantee, Event, EventBus, EventFilter, FilterOperator, HandlerError,
    PublishError, Subscription,
};
use agent_runtime::rate_limiter::{EventRateLimiter, ManualClock, RateLimitRule, ScriptCache};
use agent_runtime::store::InMemoryAtomicStore;
use serde_json::json;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

#[tokio::test]
async fn test_run_prefix_subscription_never_sees_heartbeat() {
    let bus = EventBus::new(EventBusConfig::default());
    let runs = RecordingSubscriber::attach(&bus, "runs", "run.");

    bus.publish(Event::new("run.started", json!({"id": 1})))
        .await
        .unwrap();
    bus.publish(Event::new("telemetry.heartbeat", json!({})))
        .await
        .unwrap();
    bus.publish(Event::new("run.completed", json!({"id": 1})))
        .await
        .unwrap();

    settle().await;
    assert_eq!(runs.types(), vec!["run.started", "run.completed"]);
}

#[tokio::test]
async fn test_single_publisher_order_preserved_per_subscriber() {
    let bus = Arc::new(EventBus::new(EventBusConfig::default()));
    let first = RecordingSubscriber::attach(&bus, "first", "process/");
    let second = RecordingSubscriber::attach(&bus, "second", "process/");

    for n in 0..25 {
        bus.publish(Event::new("process/run/checkpoint_saved", json!({"n": n})))
            .await
            .unwrap();
    }
    settle().await;

    for recorder in [&first, &second] {
        let order: Vec<u64> = recorder
            .events()
            .iter()
            .map(|e| e.data()["n"].as_u64().unwrap())
            .collect();
        assert_eq!(order, (0..25).collect::<Vec<u64>>());
    }
    assert_eq!(bus.stats().dropped, 0);
}

#[tokio::test]
async fn test_data_filter_selects_payload_field() {
    let bus = EventBus::new(EventBusConfig::default());
    let expensive = RecordingSubscriber::attach_with(
        &bus,
        "expensive",
        Some(EventFilter::new(
            "data.cost",
            FilterOperator::GreaterThan,
            json!(5),
        )),
    );

    for cost in [1, 6, 3, 10] {
        bus.publish(Event::new("execution/llm_call", json!({"cost": cost})))
            .await
            .unwrap();
    }
    settle().await;

    let costs: Vec<u64> = expensive
        .events()
        .iter()
        .map(|e| e.data()["cost"].as_u64().unwrap())
        .collect();
    assert_eq!(costs, vec![6, 10]);
}

#[tokio::test]
async fn test_at_least_once_redelivers_after_handler_failure() {
    let bus = EventBus::new(EventBusConfig {
        retry_backoff_ms: 1,
        ..EventBusConfig::default()
    });
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    bus.subscribe(Subscription::new(
        "flaky",
        handler_fn(move |_event| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(HandlerError::new("first delivery fails"))
                } else {
                    Ok(())
                }
            }
        }),
    ))
    .unwrap();

    bus.publish(
        Event::new("coordination/run/completed", json!({}))
            .with_delivery_guarantee(DeliveryGuarantee::AtLeastOnce),
    )
    .await
    .unwrap();
    settle().await;

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    let stats = bus.stats();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.delivery_failures, 0);
}

#[tokio::test]
async fn test_rate_limited_publish_is_rejected_but_safety_events_pass() {
    let mut config = RateLimitConfig::default();
    config.event_types.insert(
        events::TELEMETRY_HEARTBEAT.to_string(),
        RateLimitRule::new(1.0, 1.0),
    );
    let limiter = Arc::new(
        EventRateLimiter::new(
            config,
            Arc::new(InMemoryAtomicStore::new()),
            Arc::new(ScriptCache::default()),
        )
        .with_clock(Arc::new(ManualClock::new(0))),
    );
    let bus = EventBus::new(EventBusConfig::default()).with_rate_limiter(limiter);

    assert!(bus
        .publish(Event::new(events::TELEMETRY_HEARTBEAT, json!({})))
        .await
        .is_ok());
    let err = bus
        .publish(Event::new(events::TELEMETRY_HEARTBEAT, json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::RateLimited { .. }));

    for _ in 0..20 {
        assert!(bus
            .publish(Event::new(events::EMERGENCY_STOP, json!({})))
            .await
            .is_ok());
    }
    assert_eq!(bus.stats().rate_limited, 1);
}

#[tokio::test]
async fn test_shutdown_drains_queued_events() {
    let bus = EventBus::new(EventBusConfig::default());
    let slow_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&slow_count);
    bus.subscribe(Subscription::new(
        "slow",
        handler_fn(move |_event| {
            let counter = Arc::clone(&counter);
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
    ))
    .unwrap();

    for _ in 0..10 {
        bus.publish(Event::new("process/run/started", json!({})))
            .await
            .unwrap();
    }
    bus.shutdown().await;

    assert_eq!(slow_count.load(Ordering::SeqCst), 10);
    assert!(!bus.is_accepting());
    assert!(bus
        .publish(Event::new("process/run/started", json!({})))
        .await
        .is_err());
}

/// Subscriber whose handler blocks until `gate` gets permits
struct StuckSubscriber {
    gate: Arc<Semaphore>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl StuckSubscriber {
    fn attach(bus: &EventBus, id: &str) -> Self {
        let gate = Arc::new(Semaphore::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (handler_gate, sink) = (Arc::clone(&gate), Arc::clone(&seen));
        bus.subscribe(
            Subscription::new(
                id,
                handler_fn(move |event: Arc<Event>| {
                    let gate = Arc::clone(&handler_gate);
                    let sink = Arc::clone(&sink);
                    async move {
                        let _permit = gate.acquire().await;
                        sink.lock().push(event.event_type().to_string());
                        Ok(())
                    }
                }),
            )
            .with_delivery(0, Duration::from_secs(30)),
        )
        .unwrap();
        Self { gate, seen }
    }

    fn release(&self) {
        self.gate.add_permits(1_000);
    }

    fn types(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

/// Bus with a one-slot queue whose only subscriber is stuck with a full queue
async fn saturated_bus(publish_timeout_ms: u64) -> (EventBus, StuckSubscriber) {
    let bus = EventBus::new(EventBusConfig {
        subscriber_buffer_size: 1,
        publish_timeout_ms,
        ..EventBusConfig::default()
    });
    let stuck = StuckSubscriber::attach(&bus, "stuck");

    // First event parks in the handler, second fills the queue
    bus.publish(Event::new("process/run/started", json!({})))
        .await
        .unwrap();
    settle().await;
    let receipt = bus
        .publish(Event::new("process/run/started", json!({})))
        .await
        .unwrap();
    assert_eq!(receipt.enqueued, 1);
    (bus, stuck)
}

#[tokio::test]
async fn test_full_queue_still_delivers_safety_events() {
    let (bus, stuck) = saturated_bus(2_000).await;

    for _ in 0..3 {
        let receipt = bus
            .publish(Event::new(events::EMERGENCY_STOP, json!({})))
            .await
            .unwrap();
        assert_eq!(receipt.enqueued, 1);
        assert_eq!(receipt.dropped, 0);
    }

    stuck.release();
    settle().await;
    let stops = stuck
        .types()
        .iter()
        .filter(|t| t.as_str() == events::EMERGENCY_STOP)
        .count();
    assert_eq!(stops, 3);
    assert_eq!(bus.stats().dropped, 0);
}

#[tokio::test]
async fn test_full_queue_drops_and_counts_fire_and_forget() {
    let (bus, stuck) = saturated_bus(2_000).await;

    for _ in 0..4 {
        let receipt = bus
            .publish(Event::new("telemetry/heartbeat", json!({})))
            .await
            .unwrap();
        assert_eq!(receipt.matched, 1);
        assert_eq!(receipt.dropped, 1);
    }
    assert_eq!(bus.stats().dropped, 4);

    stuck.release();
    settle().await;
    assert!(!stuck.types().iter().any(|t| t == "telemetry/heartbeat"));
}

#[tokio::test]
async fn test_full_queue_at_least_once_times_out_within_publish_timeout() {
    let (bus, stuck) = saturated_bus(100).await;

    let started = Instant::now();
    let err = bus
        .publish(
            Event::new("coordination/run/completed", json!({}))
                .with_delivery_guarantee(DeliveryGuarantee::AtLeastOnce),
        )
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, PublishError::Timeout { timeout_ms: 100, .. }));
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(600));
    // The waiting subscriber lost the event and it is accounted for
    assert_eq!(bus.stats().dropped, 1);

    stuck.release();
    settle().await;
    assert!(!stuck.types().iter().any(|t| t == "coordination/run/completed"));
}
