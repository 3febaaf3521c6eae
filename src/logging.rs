//! # Logging
//!
//! Environment-aware structured logging for the runtime. Console output is
//! human-readable in development and test, JSON in production so log shippers
//! can index the structured fields emitted by the bus, limiter and tiers.

use chrono::Utc;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static SUBSCRIBER: OnceLock<LogFormat> = OnceLock::new();

/// Console rendering chosen per environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn for_environment(environment: &str) -> Self {
        match environment {
            "production" | "staging" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Filter used when `RUST_LOG` is unset
fn default_directive(environment: &str) -> &'static str {
    match environment {
        "production" | "staging" => "info",
        "test" => "warn,agent_runtime=debug",
        _ => "debug",
    }
}

/// Install the global subscriber once; later calls return the first format
///
/// A host application that already owns the global subscriber keeps it.
pub fn init_structured_logging(environment: &str) -> LogFormat {
    *SUBSCRIBER.get_or_init(|| {
        let format = LogFormat::for_environment(environment);
        let directive = default_directive(environment);
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

        let base = fmt::layer().with_target(true).with_level(true);
        let console = match format {
            LogFormat::Json => base.with_ansi(false).json().with_filter(filter).boxed(),
            LogFormat::Pretty => base.with_ansi(true).with_filter(filter).boxed(),
        };

        if tracing_subscriber::registry().with(console).try_init().is_err() {
            tracing::debug!("🔧 LOGGING: Host subscriber already installed, leaving it in place");
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            format = ?format,
            directive,
            "🔧 LOGGING: Structured logging ready"
        );
        format
    })
}

/// Deployment environment from `AGENT_RUNTIME_ENV`, then `APP_ENV`
pub fn resolve_environment() -> String {
    ["AGENT_RUNTIME_ENV", "APP_ENV"]
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "development".to_string())
}

/// Log structured data for tier operations
pub fn log_tier_operation(
    tier: &str,
    operation: &str,
    execution_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        tier = %tier,
        operation = %operation,
        execution_id = execution_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🧭 TIER_OPERATION"
    );
}

/// Log a rate-limit decision
pub fn log_rate_limit_decision(
    event_type: &str,
    allowed: bool,
    limit_type: Option<&str>,
    retry_after_ms: Option<u64>,
) {
    if allowed {
        tracing::debug!(
            event_type = %event_type,
            allowed = allowed,
            "🚦 RATE_LIMIT_DECISION"
        );
    } else {
        tracing::info!(
            event_type = %event_type,
            allowed = allowed,
            limit_type = limit_type,
            retry_after_ms = retry_after_ms,
            "🚦 RATE_LIMIT_DECISION"
        );
    }
}

/// Log a recovery strategy decision
pub fn log_recovery_decision(
    component: &str,
    category: &str,
    severity: &str,
    strategy: &str,
    rationale: &str,
) {
    tracing::info!(
        component = %component,
        category = %category,
        severity = %severity,
        strategy = %strategy,
        rationale = %rationale,
        timestamp = %Utc::now().to_rfc3339(),
        "🛠️ RECOVERY_DECISION"
    );
}
