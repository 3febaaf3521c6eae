//! # Telemetry Sink
//!
//! Boundary for error, task-completion and component-health records. Callers
//! treat every emit as fire-and-forget: a failing sink is logged and never
//! propagates into the error path that produced the record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Error)]
pub enum TelemetryError {
    #[error("Telemetry sink unavailable: {0}")]
    Unavailable(String),
    #[error("Telemetry record rejected: {0}")]
    Rejected(String),
}

/// An error observed by the resilience layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub source: String,
    pub component: String,
    pub operation: String,
    pub message: String,
    pub category: String,
    pub severity: String,
    pub strategy: String,
    /// Set for EMERGENCY_STOP so dashboards can page on it
    pub emergency: bool,
    pub timestamp: DateTime<Utc>,
}

/// The outcome of a unit of work or a recovery attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompletionRecord {
    pub source: String,
    pub task: String,
    pub success: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// A point-in-time health report for one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealthRecord {
    pub component: String,
    pub status: HealthStatus,
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn emit_error(&self, record: ErrorRecord) -> Result<(), TelemetryError>;

    async fn emit_task_completion(&self, record: TaskCompletionRecord)
        -> Result<(), TelemetryError>;

    async fn emit_component_health(
        &self,
        record: ComponentHealthRecord,
    ) -> Result<(), TelemetryError>;
}

/// Sink that writes every record to `tracing`
#[derive(Debug, Default, Clone)]
pub struct TracingTelemetrySink;

#[async_trait]
impl TelemetrySink for TracingTelemetrySink {
    async fn emit_error(&self, record: ErrorRecord) -> Result<(), TelemetryError> {
        if record.emergency {
            tracing::error!(
                source = %record.source,
                component = %record.component,
                operation = %record.operation,
                category = %record.category,
                severity = %record.severity,
                strategy = %record.strategy,
                emergency = true,
                "🚨 TELEMETRY: Emergency error record"
            );
        } else {
            warn!(
                source = %record.source,
                component = %record.component,
                operation = %record.operation,
                category = %record.category,
                severity = %record.severity,
                strategy = %record.strategy,
                "📡 TELEMETRY: Error record"
            );
        }
        Ok(())
    }

    async fn emit_task_completion(
        &self,
        record: TaskCompletionRecord,
    ) -> Result<(), TelemetryError> {
        info!(
            source = %record.source,
            task = %record.task,
            success = record.success,
            duration_ms = record.duration_ms,
            "📡 TELEMETRY: Task completion"
        );
        Ok(())
    }

    async fn emit_component_health(
        &self,
        record: ComponentHealthRecord,
    ) -> Result<(), TelemetryError> {
        info!(
            component = %record.component,
            status = ?record.status,
            details = record.details.as_deref(),
            "📡 TELEMETRY: Component health"
        );
        Ok(())
    }
}

/// Sink that keeps records in memory, for tests and embedded inspection
#[derive(Debug, Default)]
pub struct InMemoryTelemetrySink {
    errors: Mutex<Vec<ErrorRecord>>,
    completions: Mutex<Vec<TaskCompletionRecord>>,
    health: Mutex<Vec<ComponentHealthRecord>>,
    failing: std::sync::atomic::AtomicBool,
}

impl InMemoryTelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent emit fail with `Unavailable`
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.errors.lock().clone()
    }

    pub fn completions(&self) -> Vec<TaskCompletionRecord> {
        self.completions.lock().clone()
    }

    pub fn health_reports(&self) -> Vec<ComponentHealthRecord> {
        self.health.lock().clone()
    }

    fn check(&self) -> Result<(), TelemetryError> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            Err(TelemetryError::Unavailable("sink disabled".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TelemetrySink for InMemoryTelemetrySink {
    async fn emit_error(&self, record: ErrorRecord) -> Result<(), TelemetryError> {
        self.check()?;
        self.errors.lock().push(record);
        Ok(())
    }

    async fn emit_task_completion(
        &self,
        record: TaskCompletionRecord,
    ) -> Result<(), TelemetryError> {
        self.check()?;
        self.completions.lock().push(record);
        Ok(())
    }

    async fn emit_component_health(
        &self,
        record: ComponentHealthRecord,
    ) -> Result<(), TelemetryError> {
        self.check()?;
        self.health.lock().push(record);
        Ok(())
    }
}
