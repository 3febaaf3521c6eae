//! # Execution Architecture
//!
//! Composition root wiring the store, rate limiter, event bus, resilience
//! façade and the three tiers into one running system. Every shared cache is
//! an explicit resource owned here rather than a hidden static.
//!
//! Startup order, leaves first:
//!
//! ```text
//! store → script cache → rate limiter → event bus → telemetry
//!       → pattern library → classifier → effectiveness log → selector
//!       → resilience façade → run registry
//!       → execution tier → process tier → coordination tier
//! ```
//!
//! [`ExecutionArchitecture::shutdown`] walks the same chain in reverse: tiers
//! stop accepting work, the bus drains its subscribers, the store is released.
//!
//! ```rust,no_run
//! use agent_runtime::architecture::{BootstrapOptions, ExecutionArchitecture};
//! use agent_runtime::config::RuntimeConfig;
//! use agent_runtime::tiers::{ExecutionRequest, TierExecutor};
//! use std::sync::Arc;
//!
//! # async fn example(worker: Arc<dyn TierExecutor>) -> anyhow::Result<()> {
//! let runtime =
//!     ExecutionArchitecture::bootstrap(RuntimeConfig::default(), worker, BootstrapOptions::default())
//!         .await?;
//! let response = runtime
//!     .execute(ExecutionRequest::new("research", serde_json::json!({"topic": "rust"})))
//!     .await?;
//! println!("{:?}", response.status);
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::config::RuntimeConfig;
use crate::events::{EventBus, EventBusStats};
use crate::logging::init_structured_logging;
use crate::rate_limiter::{Clock, EventRateLimiter, ScriptCache, TOKEN_BUCKET_SCRIPT};
use crate::resilience::{
    EffectivenessLog, ErrorClassifier, PatternLibrary, RecoverySelector, ResilienceInfrastructure,
    ResilienceStatistics, StandardErrorClassifier,
};
use crate::store::{AtomicStore, InMemoryAtomicStore};
use crate::telemetry::{ComponentHealthRecord, HealthStatus, TelemetrySink, TracingTelemetrySink};
use crate::tiers::{
    ExecutionRequest, ExecutionResponse, ResourceProbe, RunRegistry, TierExecutor, TierLevel,
    TierResult, TierStateMachine,
};
use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Optional collaborators supplied by the host application
///
/// Anything left `None` falls back to the in-process default.
#[derive(Default)]
pub struct BootstrapOptions {
    /// Shared atomic store (default: [`InMemoryAtomicStore`])
    pub store: Option<Arc<dyn AtomicStore>>,
    /// Telemetry sink (default: [`TracingTelemetrySink`])
    pub telemetry: Option<Arc<dyn TelemetrySink>>,
    /// Refill clock for the rate limiter
    pub clock: Option<Arc<dyn Clock>>,
    /// Resource probe attached to every tier
    pub resource_probe: Option<Arc<dyn ResourceProbe>>,
    /// Install the global tracing subscriber during bootstrap
    pub init_logging: bool,
}

impl std::fmt::Debug for BootstrapOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapOptions")
            .field("store", &self.store.as_ref().map(|s| s.provider_name()))
            .field("telemetry", &self.telemetry.is_some())
            .field("clock", &self.clock.is_some())
            .field("resource_probe", &self.resource_probe.is_some())
            .field("init_logging", &self.init_logging)
            .finish()
    }
}

/// Point-in-time view of the running system
#[derive(Debug, Clone)]
pub struct SystemStatus {
    pub running: bool,
    pub environment: String,
    pub store_provider: String,
    pub rate_limiter_healthy: bool,
    pub bus: EventBusStats,
    pub resilience: ResilienceStatistics,
    pub active_runs: usize,
}

/// The three tiers plus everything they share
pub struct ExecutionArchitecture {
    config: RuntimeConfig,
    store: Mutex<Option<Arc<dyn AtomicStore>>>,
    store_provider: String,
    rate_limiter: Arc<EventRateLimiter>,
    bus: Arc<EventBus>,
    telemetry: Arc<dyn TelemetrySink>,
    resilience: Arc<ResilienceInfrastructure>,
    registry: Arc<RunRegistry>,
    coordination: Arc<TierStateMachine>,
    process: Arc<TierStateMachine>,
    execution: Arc<TierStateMachine>,
    run_sweeper: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl std::fmt::Debug for ExecutionArchitecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionArchitecture")
            .field("environment", &self.config.environment)
            .field("store", &self.store_provider)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ExecutionArchitecture {
    /// Validate `config` and assemble the system around the leaf `worker`
    pub async fn bootstrap(
        config: RuntimeConfig,
        worker: Arc<dyn TierExecutor>,
        options: BootstrapOptions,
    ) -> Result<Self> {
        if options.init_logging {
            init_structured_logging(&config.environment);
        }
        info!(
            environment = %config.environment,
            worker = %worker.tier_name(),
            "🚀 BOOTSTRAP: Starting execution architecture"
        );

        config
            .validate()
            .context("runtime configuration failed validation")?;

        let store: Arc<dyn AtomicStore> = options
            .store
            .unwrap_or_else(|| Arc::new(InMemoryAtomicStore::new()));
        let reachable = store
            .health_check()
            .await
            .with_context(|| format!("shared store '{}' health check failed", store.provider_name()))?;
        if !reachable {
            warn!(
                provider = %store.provider_name(),
                "⚠️ BOOTSTRAP: Shared store reports unhealthy, rate limiter will fail open"
            );
        }
        info!(provider = %store.provider_name(), "✅ BOOTSTRAP: Shared store ready");

        let scripts = Arc::new(ScriptCache::new(TOKEN_BUCKET_SCRIPT));
        let mut limiter =
            EventRateLimiter::new(config.rate_limits.clone(), store.clone(), scripts);
        if let Some(clock) = options.clock {
            limiter = limiter.with_clock(clock);
        }
        let rate_limiter = Arc::new(limiter);
        info!(
            enabled = config.rate_limits.enabled,
            "✅ BOOTSTRAP: Rate limiter initialized"
        );

        let telemetry: Arc<dyn TelemetrySink> = options
            .telemetry
            .unwrap_or_else(|| Arc::new(TracingTelemetrySink));

        let bus = Arc::new(
            EventBus::new(config.event_bus.clone())
                .with_rate_limiter(rate_limiter.clone())
                .with_telemetry(telemetry.clone()),
        );
        info!("✅ BOOTSTRAP: Event bus initialized");

        let patterns = Arc::new(PatternLibrary::new());
        let classifier: Arc<dyn ErrorClassifier> = Arc::new(StandardErrorClassifier::new(
            config.resilience.clone(),
            patterns.clone(),
        ));
        let effectiveness = Arc::new(EffectivenessLog::new());
        let selector = Arc::new(RecoverySelector::new(
            config.resilience.clone(),
            effectiveness,
        ));
        let resilience = Arc::new(ResilienceInfrastructure::new(
            classifier,
            selector,
            patterns,
            bus.clone(),
            telemetry.clone(),
        ));
        info!("✅ BOOTSTRAP: Resilience infrastructure initialized");

        let mut registry = RunRegistry::new();
        if config.tiers.persist_runs {
            registry = registry.with_store(
                store.clone(),
                config.store.namespace.clone(),
                config.tiers.checkpoint_ttl(),
            );
            info!(
                namespace = %config.store.namespace,
                "💾 BOOTSTRAP: Runs mirrored into shared store"
            );
        }
        let registry = Arc::new(registry);
        let run_sweeper = spawn_run_sweeper(
            registry.clone(),
            config.tiers.run_sweep_interval(),
            config.tiers.completed_run_retention(),
        );

        let build_tier = |level: TierLevel, delegate: Arc<dyn TierExecutor>| {
            let mut tier = TierStateMachine::new(
                level,
                delegate,
                resilience.clone(),
                bus.clone(),
                registry.clone(),
                config.tiers.clone(),
            );
            if let Some(probe) = &options.resource_probe {
                tier = tier.with_resource_probe(probe.clone());
            }
            Arc::new(tier)
        };

        let execution = build_tier(TierLevel::Execution, worker);
        let process = build_tier(TierLevel::Process, execution.clone() as Arc<dyn TierExecutor>);
        let coordination =
            build_tier(TierLevel::Coordination, process.clone() as Arc<dyn TierExecutor>);
        info!("✅ BOOTSTRAP: Tier chain coordination → process → execution assembled");

        let store_provider = store.provider_name().to_string();
        let architecture = Self {
            config,
            store: Mutex::new(Some(store)),
            store_provider,
            rate_limiter,
            bus,
            telemetry,
            resilience,
            registry,
            coordination,
            process,
            execution,
            run_sweeper: Mutex::new(Some(run_sweeper)),
            running: AtomicBool::new(true),
        };

        architecture
            .report_health(HealthStatus::Healthy, "bootstrap complete")
            .await;
        info!("🎉 BOOTSTRAP: Execution architecture ready");
        Ok(architecture)
    }

    /// Run a request through the full tier chain
    pub async fn execute(&self, request: ExecutionRequest) -> TierResult<ExecutionResponse> {
        self.coordination.execute(request).await
    }

    pub fn tier(&self, level: TierLevel) -> &Arc<TierStateMachine> {
        match level {
            TierLevel::Coordination => &self.coordination,
            TierLevel::Process => &self.process,
            TierLevel::Execution => &self.execution,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn rate_limiter(&self) -> &Arc<EventRateLimiter> {
        &self.rate_limiter
    }

    pub fn resilience(&self) -> &Arc<ResilienceInfrastructure> {
        &self.resilience
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// `None` once the architecture has shut down
    pub fn store(&self) -> Option<Arc<dyn AtomicStore>> {
        self.store.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> SystemStatus {
        let rate_limiter_healthy = if self.is_running() {
            self.rate_limiter.health_check().await
        } else {
            false
        };

        SystemStatus {
            running: self.is_running(),
            environment: self.config.environment.clone(),
            store_provider: self.store_provider.clone(),
            rate_limiter_healthy,
            bus: self.bus.stats(),
            resilience: self.resilience.get_statistics(),
            active_runs: self.registry.len(),
        }
    }

    /// Stop tiers, drain the bus, release the store
    ///
    /// Idempotent: a second call only logs.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            info!("🛑 SHUTDOWN: Execution architecture already stopped");
            return;
        }
        info!("🛑 SHUTDOWN: Stopping execution architecture");

        for tier in [&self.coordination, &self.process, &self.execution] {
            tier.stop();
        }
        info!("✅ SHUTDOWN: Tiers stopped accepting work");

        if let Some(sweeper) = self.run_sweeper.lock().take() {
            sweeper.abort();
        }

        self.report_health(HealthStatus::Unhealthy, "shutting down")
            .await;

        self.bus.shutdown().await;
        info!("✅ SHUTDOWN: Event bus drained");

        if let Some(store) = self.store.lock().take() {
            info!(provider = %store.provider_name(), "✅ SHUTDOWN: Shared store released");
        }

        info!("🛑 SHUTDOWN: Execution architecture stopped");
    }

    async fn report_health(&self, status: HealthStatus, details: &str) {
        let record = ComponentHealthRecord {
            component: "execution_architecture".to_string(),
            status,
            details: Some(details.to_string()),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.telemetry.emit_component_health(record).await {
            warn!(error = %e, "📡 BOOTSTRAP: Component health report failed");
        }
    }
}

impl Drop for ExecutionArchitecture {
    fn drop(&mut self) {
        if let Some(sweeper) = self.run_sweeper.get_mut().take() {
            sweeper.abort();
        }
    }
}

/// Periodically drop finished runs older than `retention`
fn spawn_run_sweeper(
    registry: Arc<RunRegistry>,
    every: Duration,
    retention: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = registry.evict_terminal_older_than(retention);
            debug!(
                evicted = evicted,
                active_runs = registry.len(),
                "🧹 SWEEP: Finished runs swept"
            );
        }
    })
}
