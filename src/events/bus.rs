//! # Event Bus
//!
//! In-process publish/subscribe with a rate-limiter gate in front of fan-out.
//!
//! Every subscription owns a bounded queue drained by its own worker task, so
//! events from one publisher reach each subscriber in publish order and a slow
//! subscriber only ever backs up its own queue. When a queue is full:
//!
//! - safety events are handed to a detached sender and still delivered
//! - at-least-once events wait for space, bounded by the publish timeout;
//!   subscribers still waiting when it expires lose the event and it is
//!   counted as dropped
//! - fire-and-forget events are dropped and counted
//!
//! At-least-once delivery retries the handler with exponential backoff; when
//! retries run out the failure is counted and reported to telemetry.

use super::subscription::{DeliveryConfig, Subscription};
use super::types::{DeliveryGuarantee, Event};
use crate::config::EventBusConfig;
use crate::metrics;
use crate::rate_limiter::EventRateLimiter;
use crate::telemetry::{ErrorRecord, TelemetrySink};
use chrono::Utc;
use futures::future::join_all;
use opentelemetry::KeyValue;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, timeout_at};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Error types for event publishing
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PublishError {
    #[error("Event {event_type} rate limited ({limit_type:?}), retry after {retry_after_ms:?}ms")]
    RateLimited {
        event_type: String,
        limit_type: Option<String>,
        retry_after_ms: Option<u64>,
    },

    #[error("Publishing {event_type} exceeded {timeout_ms}ms")]
    Timeout { event_type: String, timeout_ms: u64 },

    #[error("Event bus is shutting down")]
    ShuttingDown,

    #[error("Subscription already registered: {0}")]
    DuplicateSubscription(String),
}

/// Outcome of one successful publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub event_id: Uuid,
    /// Subscriptions whose filters matched
    pub matched: usize,
    /// Matched subscriptions the event was queued for
    pub enqueued: usize,
    /// Matched subscriptions that lost the event
    pub dropped: usize,
}

/// Snapshot of bus counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventBusStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub delivery_failures: u64,
    pub handler_errors: u64,
    pub rate_limited: u64,
    pub subscribers: usize,
    pub average_publish_overhead_ms: f64,
}

#[derive(Debug, Default)]
struct BusCounters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    delivery_failures: AtomicU64,
    handler_errors: AtomicU64,
    rate_limited: AtomicU64,
    publish_calls: AtomicU64,
    overhead_micros: AtomicU64,
}

/// What happened to one matched subscriber during fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Enqueued {
    Queued,
    Dropped,
    /// Waited for queue space until the publish deadline
    TimedOut,
}

struct SubscriberSlot {
    subscription: Arc<Subscription>,
    sender: mpsc::Sender<Arc<Event>>,
    worker: JoinHandle<()>,
}

pub struct EventBus {
    config: EventBusConfig,
    subscribers: RwLock<HashMap<String, SubscriberSlot>>,
    rate_limiter: Option<Arc<EventRateLimiter>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    counters: Arc<BusCounters>,
    accepting: AtomicBool,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.config)
            .field("subscribers", &self.subscriber_count())
            .field("rate_limited", &self.rate_limiter.is_some())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        info!(
            buffer_size = config.subscriber_buffer_size,
            publish_timeout_ms = config.publish_timeout_ms,
            "📬 EVENT_BUS: Initialized"
        );

        Self {
            config,
            subscribers: RwLock::new(HashMap::new()),
            rate_limiter: None,
            telemetry: None,
            counters: Arc::new(BusCounters::default()),
            accepting: AtomicBool::new(true),
        }
    }

    /// Gate every publish through `limiter`
    pub fn with_rate_limiter(mut self, limiter: Arc<EventRateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Report exhausted at-least-once deliveries to `sink`
    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    /// Register a subscription and start its delivery worker
    pub fn subscribe(&self, subscription: Subscription) -> Result<(), PublishError> {
        let mut subscribers = self.subscribers.write();
        if subscribers.contains_key(&subscription.id) {
            return Err(PublishError::DuplicateSubscription(subscription.id));
        }

        let delivery = subscription.delivery.unwrap_or(DeliveryConfig {
            max_retries: self.config.default_max_retries,
            timeout: self.config.default_delivery_timeout(),
        });
        let subscription = Arc::new(subscription);
        let (sender, receiver) = mpsc::channel(self.config.subscriber_buffer_size);

        let worker = tokio::spawn(run_worker(
            Arc::clone(&subscription),
            receiver,
            delivery,
            Duration::from_millis(self.config.retry_backoff_ms),
            Arc::clone(&self.counters),
            self.telemetry.clone(),
        ));

        info!(
            subscription_id = %subscription.id,
            filters = subscription.filters.len(),
            max_retries = delivery.max_retries,
            "📬 EVENT_BUS: Subscriber registered"
        );

        subscribers.insert(
            subscription.id.clone(),
            SubscriberSlot {
                subscription,
                sender,
                worker,
            },
        );
        Ok(())
    }

    /// Remove a subscription; its worker finishes what is already queued
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        let removed = self.subscribers.write().remove(subscription_id);
        if removed.is_some() {
            info!(subscription_id = %subscription_id, "📬 EVENT_BUS: Subscriber removed");
        }
        removed.is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Publish one event, bounded by the configured publish timeout
    pub async fn publish(&self, event: Event) -> Result<PublishReceipt, PublishError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(PublishError::ShuttingDown);
        }

        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.publish_timeout();

        let result = self.publish_inner(Arc::new(event), deadline).await;
        if let Err(PublishError::Timeout { event_type, .. }) = &result {
            warn!(
                event_type = %event_type,
                timeout_ms = self.config.publish_timeout_ms,
                "📬 EVENT_BUS: Publish timed out"
            );
        }

        let overhead = started.elapsed();
        self.counters.publish_calls.fetch_add(1, Ordering::Relaxed);
        self.counters
            .overhead_micros
            .fetch_add(overhead.as_micros() as u64, Ordering::Relaxed);
        metrics::publish_overhead_ms().record(overhead.as_secs_f64() * 1000.0, &[]);

        result
    }

    /// Publish several events; each one is gated and delivered independently
    pub async fn publish_batch(
        &self,
        events: Vec<Event>,
    ) -> Vec<Result<PublishReceipt, PublishError>> {
        let mut results = Vec::with_capacity(events.len());
        for event in events {
            results.push(self.publish(event).await);
        }
        results
    }

    fn timeout_error(&self, event: &Event) -> PublishError {
        PublishError::Timeout {
            event_type: event.event_type().to_string(),
            timeout_ms: self.config.publish_timeout_ms,
        }
    }

    async fn publish_inner(
        &self,
        event: Arc<Event>,
        deadline: tokio::time::Instant,
    ) -> Result<PublishReceipt, PublishError> {
        if let Some(limiter) = &self.rate_limiter {
            let decision = timeout_at(deadline, limiter.check_event_rate_limit(&event))
                .await
                .map_err(|_| self.timeout_error(&event))?;
            if !decision.allowed {
                self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
                return Err(PublishError::RateLimited {
                    event_type: event.event_type().to_string(),
                    limit_type: decision.limit_type,
                    retry_after_ms: decision.retry_after_ms,
                });
            }
        }

        // Senders are cloned so no lock is held across an await
        let targets: Vec<(String, mpsc::Sender<Arc<Event>>)> = self
            .subscribers
            .read()
            .values()
            .filter(|slot| slot.subscription.matches(&event))
            .map(|slot| (slot.subscription.id.clone(), slot.sender.clone()))
            .collect();

        let mut receipt = PublishReceipt {
            event_id: event.id(),
            matched: targets.len(),
            enqueued: 0,
            dropped: 0,
        };

        let mut timed_out = false;
        for (subscription_id, sender) in targets {
            match self
                .enqueue(&subscription_id, sender, Arc::clone(&event), deadline)
                .await
            {
                Enqueued::Queued => receipt.enqueued += 1,
                Enqueued::Dropped => receipt.dropped += 1,
                Enqueued::TimedOut => {
                    receipt.dropped += 1;
                    timed_out = true;
                }
            }
        }

        self.counters.published.fetch_add(1, Ordering::Relaxed);
        metrics::events_published_total()
            .add(1, &[KeyValue::new("event_kind", event.kind().name().to_string())]);

        debug!(
            event_id = %event.id(),
            event_type = %event.event_type(),
            matched = receipt.matched,
            dropped = receipt.dropped,
            "📬 EVENT_BUS: Event published"
        );

        if timed_out {
            return Err(self.timeout_error(&event));
        }
        Ok(receipt)
    }

    async fn enqueue(
        &self,
        subscription_id: &str,
        sender: mpsc::Sender<Arc<Event>>,
        event: Arc<Event>,
        deadline: tokio::time::Instant,
    ) -> Enqueued {
        let event = match sender.try_send(event) {
            Ok(()) => return Enqueued::Queued,
            Err(TrySendError::Closed(event)) => {
                self.record_drop(subscription_id, &event, "subscriber closed");
                return Enqueued::Dropped;
            }
            Err(TrySendError::Full(event)) => event,
        };

        if event.is_safety() {
            warn!(
                subscription_id = %subscription_id,
                event_type = %event.event_type(),
                "📬 EVENT_BUS: Subscriber queue full, detaching safety delivery"
            );
            tokio::spawn(async move {
                let _ = sender.send(event).await;
            });
            return Enqueued::Queued;
        }

        match event.metadata().delivery_guarantee {
            DeliveryGuarantee::AtLeastOnce => {
                match timeout_at(deadline, sender.send(Arc::clone(&event))).await {
                    Ok(Ok(())) => Enqueued::Queued,
                    Ok(Err(_)) => {
                        self.record_drop(subscription_id, &event, "subscriber closed");
                        Enqueued::Dropped
                    }
                    Err(_) => {
                        self.record_drop(subscription_id, &event, "publish timed out");
                        Enqueued::TimedOut
                    }
                }
            }
            DeliveryGuarantee::FireAndForget => {
                self.record_drop(subscription_id, &event, "subscriber queue full");
                Enqueued::Dropped
            }
        }
    }

    fn record_drop(&self, subscription_id: &str, event: &Event, reason: &str) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::events_dropped_total().add(
            1,
            &[KeyValue::new("subscription_id", subscription_id.to_string())],
        );
        warn!(
            subscription_id = %subscription_id,
            event_type = %event.event_type(),
            reason = %reason,
            "📬 EVENT_BUS: Event dropped"
        );
    }

    pub fn stats(&self) -> EventBusStats {
        let publish_calls = self.counters.publish_calls.load(Ordering::Relaxed);
        let overhead_micros = self.counters.overhead_micros.load(Ordering::Relaxed);

        EventBusStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            delivery_failures: self.counters.delivery_failures.load(Ordering::Relaxed),
            handler_errors: self.counters.handler_errors.load(Ordering::Relaxed),
            rate_limited: self.counters.rate_limited.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
            average_publish_overhead_ms: if publish_calls == 0 {
                0.0
            } else {
                overhead_micros as f64 / publish_calls as f64 / 1000.0
            },
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Stop accepting events and let every worker drain its queue
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::Release);
        let slots: Vec<SubscriberSlot> = self.subscribers.write().drain().map(|(_, s)| s).collect();
        let drain_timeout = Duration::from_millis(self.config.shutdown_drain_timeout_ms);

        // Workers drain concurrently under one shared deadline
        join_all(slots.into_iter().map(|slot| async move {
            let SubscriberSlot {
                subscription,
                sender,
                mut worker,
            } = slot;
            drop(sender);

            if timeout(drain_timeout, &mut worker).await.is_err() {
                warn!(
                    subscription_id = %subscription.id,
                    "📬 EVENT_BUS: Worker did not drain in time, aborting"
                );
                worker.abort();
            }
        }))
        .await;

        info!(stats = ?self.stats(), "📬 EVENT_BUS: Shut down");
    }
}

async fn run_worker(
    subscription: Arc<Subscription>,
    mut receiver: mpsc::Receiver<Arc<Event>>,
    delivery: DeliveryConfig,
    backoff: Duration,
    counters: Arc<BusCounters>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
) {
    while let Some(event) = receiver.recv().await {
        let at_least_once =
            event.metadata().delivery_guarantee == DeliveryGuarantee::AtLeastOnce;
        let attempts = if at_least_once {
            delivery.max_retries + 1
        } else {
            1
        };

        let mut last_error = String::new();
        let mut delivered = false;
        for attempt in 1..=attempts {
            match timeout(delivery.timeout, subscription.handler.handle(Arc::clone(&event))).await
            {
                Ok(Ok(())) => {
                    delivered = true;
                    break;
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!(
                        "handler timed out after {}ms",
                        delivery.timeout.as_millis()
                    )
                }
            }

            if attempt < attempts {
                sleep(backoff * 2u32.saturating_pow(attempt - 1)).await;
            }
        }

        if delivered {
            counters.delivered.fetch_add(1, Ordering::Relaxed);
        } else if at_least_once {
            report_delivery_failure(&subscription.id, &event, &last_error, &counters, &telemetry)
                .await;
        } else {
            counters.handler_errors.fetch_add(1, Ordering::Relaxed);
            debug!(
                subscription_id = %subscription.id,
                event_type = %event.event_type(),
                error = %last_error,
                "📬 EVENT_BUS: Fire-and-forget handler failed"
            );
        }
    }
}

async fn report_delivery_failure(
    subscription_id: &str,
    event: &Event,
    error: &str,
    counters: &BusCounters,
    telemetry: &Option<Arc<dyn TelemetrySink>>,
) {
    counters.delivery_failures.fetch_add(1, Ordering::Relaxed);
    metrics::delivery_failures_total().add(
        1,
        &[KeyValue::new("subscription_id", subscription_id.to_string())],
    );
    warn!(
        subscription_id = %subscription_id,
        event_id = %event.id(),
        event_type = %event.event_type(),
        error = %error,
        "📬 EVENT_BUS: At-least-once delivery exhausted retries"
    );

    if let Some(sink) = telemetry {
        let record = ErrorRecord {
            source: "event_bus".to_string(),
            component: subscription_id.to_string(),
            operation: format!("deliver:{}", event.event_type()),
            message: error.to_string(),
            category: "DELIVERY".to_string(),
            severity: "ERROR".to_string(),
            strategy: "NONE".to_string(),
            emergency: false,
            timestamp: Utc::now(),
        };
        if let Err(e) = sink.emit_error(record).await {
            debug!(error = %e, "Telemetry sink rejected delivery failure record");
        }
    }
}
