use agent_runtime::events::{handler_fn, Event, EventBus, EventFilter, Subscription};
use parking_lot::Mutex;
use std::sync::Arc;

/// Subscriber that keeps every event it receives
#[derive(Debug, Clone, Default)]
pub struct RecordingSubscriber {
    events: Arc<Mutex<Vec<Arc<Event>>>>,
}

impl RecordingSubscriber {
    /// Subscribe to events whose type starts with `prefix`
    pub fn attach(bus: &EventBus, id: &str, prefix: &str) -> Self {
        Self::attach_with(bus, id, Some(EventFilter::type_starts_with(prefix)))
    }

    pub fn attach_with(bus: &EventBus, id: &str, filter: Option<EventFilter>) -> Self {
        let recorder = Self::default();
        let sink = Arc::clone(&recorder.events);
        let mut subscription = Subscription::new(
            id,
            handler_fn(move |event: Arc<Event>| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().push(event);
                    Ok(())
                }
            }),
        );
        if let Some(filter) = filter {
            subscription = subscription.with_filter(filter);
        }
        bus.subscribe(subscription)
            .expect("subscription id should be unique");
        recorder
    }

    pub fn events(&self) -> Vec<Arc<Event>> {
        self.events.lock().clone()
    }

    pub fn types(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect()
    }

    pub fn of_type(&self, event_type: &str) -> Vec<Arc<Event>> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }
}
