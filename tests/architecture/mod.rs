use crate::common::{fast_resilience_config, settle, RecordingSubscriber, ScriptedDelegate};
use agent_runtime::architecture::{BootstrapOptions, ExecutionArchitecture};
use agent_runtime::config::{ConfigLoader, RuntimeConfig};
use agent_runtime::resilience::ResourceState;
use agent_runtime::store::AtomicStore;
use agent_runtime::telemetry::InMemoryTelemetrySink;
use agent_runtime::tiers::{ExecutionRequest, ExecutionStatus, FixedResourceProbe, TierLevel};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;

fn test_config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.environment = "test".to_string();
    config.resilience = fast_resilience_config();
    config
}

#[tokio::test]
async fn test_end_to_end_request_with_transient_leaf_failure() {
    let telemetry = Arc::new(InMemoryTelemetrySink::new());
    let worker = Arc::new(ScriptedDelegate::failing(1, "connection reset by peer"));
    let runtime = ExecutionArchitecture::bootstrap(
        test_config(),
        worker.clone(),
        BootstrapOptions {
            telemetry: Some(telemetry.clone()),
            ..BootstrapOptions::default()
        },
    )
    .await
    .unwrap();
    let lifecycle = RecordingSubscriber::attach_with(runtime.event_bus(), "lifecycle", None);

    let request =
        ExecutionRequest::new("research", json!({"topic": "rust"})).with_execution_id("req-1");
    let response = runtime.execute(request).await.unwrap();
    assert_eq!(response.status, ExecutionStatus::Completed);
    assert_eq!(worker.call_count(), 2);

    settle().await;
    let types = lifecycle.types();
    for level in TierLevel::ALL {
        assert!(types.contains(&format!("{level}/run/completed")));
    }
    assert!(types.contains(&"execution/run/retry_scheduled".to_string()));
    assert_eq!(telemetry.errors().len(), 1);

    let status = runtime.status().await;
    assert!(status.running);
    assert_eq!(status.resilience.errors_handled, 1);
    assert_eq!(status.resilience.effectiveness.total_outcomes, 1);
    assert_eq!(status.bus.dropped, 0);

    runtime.shutdown().await;
    assert!(!runtime.status().await.running);
}

#[tokio::test]
async fn test_persisted_runs_are_mirrored_into_the_store() {
    let mut config = test_config();
    config.tiers.persist_runs = true;
    config.store.namespace = "e2e".to_string();
    let runtime = ExecutionArchitecture::bootstrap(
        config,
        Arc::new(ScriptedDelegate::default()),
        BootstrapOptions::default(),
    )
    .await
    .unwrap();

    runtime
        .execute(ExecutionRequest::new("summarize", json!({})).with_execution_id("mirrored"))
        .await
        .unwrap();

    let store = runtime.store().unwrap();
    let raw = store.get("e2e:run:mirrored").await.unwrap().unwrap();
    let stored: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(stored["state"], json!("completed"));
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_resource_readings_are_published_per_tier() {
    let probe = Arc::new(FixedResourceProbe::new(ResourceState {
        memory_usage: Some(0.42),
        ..ResourceState::default()
    }));
    let runtime = ExecutionArchitecture::bootstrap(
        test_config(),
        Arc::new(ScriptedDelegate::default()),
        BootstrapOptions {
            resource_probe: Some(probe),
            ..BootstrapOptions::default()
        },
    )
    .await
    .unwrap();
    let readings = RecordingSubscriber::attach_with(runtime.event_bus(), "readings", None);

    runtime
        .execute(ExecutionRequest::new("summarize", json!({})))
        .await
        .unwrap();
    settle().await;

    let reading_types: Vec<String> = readings
        .types()
        .into_iter()
        .filter(|t| t.ends_with("/resource/reading"))
        .collect();
    assert_eq!(reading_types.len(), 3);
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_bootstrap_from_config_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
environment = "test"

[tiers]
delegate_timeout_ms = 2000

[rate_limits.event_types."execution/llm_call"]
events_per_second = 2.0
burst_capacity = 4.0
"#
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(Some(file.path())).unwrap();
    assert_eq!(config.tiers.delegate_timeout_ms, 2_000);

    let runtime = ExecutionArchitecture::bootstrap(
        config,
        Arc::new(ScriptedDelegate::default()),
        BootstrapOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(
        runtime.config().rate_limits.event_types["execution/llm_call"].burst_capacity,
        4.0
    );
    runtime.shutdown().await;
}
