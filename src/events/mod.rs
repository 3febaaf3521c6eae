//! # Event System
//!
//! Event types, subscription filters and the rate-limited [`EventBus`].

pub mod bus;
pub mod filter;
pub mod subscription;
pub mod types;

pub use bus::{EventBus, EventBusStats, PublishError, PublishReceipt};
pub use filter::{segment_glob, EventFilter, FilterOperator};
pub use subscription::{handler_fn, DeliveryConfig, EventHandler, HandlerError, Subscription};
pub use types::{DeliveryGuarantee, Event, EventKind, EventMetadata, Priority};
