//! Subscriptions and event handlers

use super::filter::EventFilter;
use super::types::Event;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error a handler returns to signal the event was not processed
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Receives events matched by a subscription
///
/// Returning `Ok` acknowledges the event. For at-least-once events an `Err`
/// or a timeout causes redelivery until the subscription's retries run out.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Arc<Event>) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into an [`EventHandler`]
pub struct FnHandler<F, Fut> {
    func: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F, Fut>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: Arc<Event>) -> Result<(), HandlerError> {
        (self.func)(event).await
    }
}

/// Wrap an async closure as a shareable handler
pub fn handler_fn<F, Fut>(func: F) -> Arc<dyn EventHandler>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler {
        func,
        _marker: PhantomData,
    })
}

/// Per-subscription delivery settings for at-least-once events
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeliveryConfig {
    pub max_retries: u32,
    /// Bound on each handler invocation
    pub timeout: Duration,
}

/// A named handler with the filters that select its events
#[derive(Clone)]
pub struct Subscription {
    pub id: String,
    pub filters: Vec<EventFilter>,
    /// Falls back to the bus defaults when absent
    pub delivery: Option<DeliveryConfig>,
    pub handler: Arc<dyn EventHandler>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("filters", &self.filters)
            .field("delivery", &self.delivery)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub fn new(id: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            id: id.into(),
            filters: Vec::new(),
            delivery: None,
            handler,
        }
    }

    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_delivery(mut self, max_retries: u32, timeout: Duration) -> Self {
        self.delivery = Some(DeliveryConfig {
            max_retries,
            timeout,
        });
        self
    }

    /// True when every filter matches
    pub fn matches(&self, event: &Event) -> bool {
        self.filters.iter().all(|filter| filter.matches(event))
    }
}
