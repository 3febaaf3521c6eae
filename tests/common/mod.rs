//! Shared helpers for integration tests

pub mod mock_delegate;
pub mod recorder;

pub use mock_delegate::*;
pub use recorder::*;

use agent_runtime::config::{EventBusConfig, ResilienceConfig};
use agent_runtime::events::EventBus;
use agent_runtime::resilience::{
    EffectivenessLog, PatternLibrary, RecoverySelector, ResilienceInfrastructure,
    StandardErrorClassifier,
};
use agent_runtime::telemetry::{InMemoryTelemetrySink, TelemetrySink};
use std::sync::Arc;
use std::time::Duration;

/// Resilience façade wired to an unlimited bus and an in-memory sink
pub struct ResilienceHarness {
    pub bus: Arc<EventBus>,
    pub telemetry: Arc<InMemoryTelemetrySink>,
    pub patterns: Arc<PatternLibrary>,
    pub facade: Arc<ResilienceInfrastructure>,
}

/// Retry delays shrunk so retry loops finish quickly
pub fn fast_resilience_config() -> ResilienceConfig {
    ResilienceConfig {
        base_retry_delay_ms: 1,
        max_retry_delay_ms: 5,
        ..ResilienceConfig::default()
    }
}

pub fn resilience_harness(config: ResilienceConfig) -> ResilienceHarness {
    let bus = Arc::new(EventBus::new(EventBusConfig::default()));
    let telemetry = Arc::new(InMemoryTelemetrySink::new());
    let patterns = Arc::new(PatternLibrary::new());
    let facade = Arc::new(ResilienceInfrastructure::new(
        Arc::new(StandardErrorClassifier::new(
            config.clone(),
            Arc::clone(&patterns),
        )),
        Arc::new(RecoverySelector::new(config, Arc::new(EffectivenessLog::new()))),
        Arc::clone(&patterns),
        Arc::clone(&bus),
        telemetry.clone() as Arc<dyn TelemetrySink>,
    ));
    ResilienceHarness {
        bus,
        telemetry,
        patterns,
        facade,
    }
}

/// Give detached subscriber workers and telemetry tasks time to run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
