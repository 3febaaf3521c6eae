//! Uniform boundary between a tier and whatever runs beneath it

use super::errors::TierResult;
use super::types::{ExecutionRequest, ExecutionResponse};
use crate::resilience::ResourceState;
use async_trait::async_trait;

/// Anything a tier can delegate to: another tier or a leaf worker
///
/// A higher tier only ever sees this trait, never the concrete type below it.
#[async_trait]
pub trait TierExecutor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> TierResult<ExecutionResponse>;

    /// Name used as the component in error contexts
    fn tier_name(&self) -> &str;
}

/// Source of resource-consumption readings published by a tier
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    async fn sample(&self) -> ResourceState;
}

/// Probe that always reports the same reading
#[derive(Debug, Clone, Default)]
pub struct FixedResourceProbe {
    reading: ResourceState,
}

impl FixedResourceProbe {
    pub fn new(reading: ResourceState) -> Self {
        Self { reading }
    }
}

#[async_trait]
impl ResourceProbe for FixedResourceProbe {
    async fn sample(&self) -> ResourceState {
        self.reading.clone()
    }
}
