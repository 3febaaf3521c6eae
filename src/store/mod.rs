//! # Shared Atomic Store
//!
//! Token-bucket counters and mirrored run state live behind [`AtomicStore`].
//! The runtime ships an in-process implementation; networked backends plug in
//! through the same trait.

pub mod errors;
pub mod memory;
pub mod traits;

pub use errors::{StoreError, StoreResult};
pub use memory::{evaluate_token_buckets, evict_idle_buckets, BucketState, InMemoryAtomicStore};
pub use traits::{AtomicStore, BucketDecision, TokenBucketRequest};
