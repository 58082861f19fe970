//! ---
//! eds_section: "15-testing-qa-runbook"
//! eds_subsection: "integration-tests"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Integration and validation tests for the edge device protocol layer."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
use std::fs;
use std::time::{Duration, Instant};

use eds_common::{EdsConfig, MessageBusKind};
use eds_logging::{eds_info, init_tracing, LogContext};
use eds_models::{DeviceData, Properties, PropertyValueType};
use eds_msgbus::MessageBus;
use eds_operations::{DataTarget, DriverService, ManagerClient};
use tempfile::tempdir;
use tokio::sync::mpsc;

#[tokio::test]
async fn loopback_stack_runs_from_a_configuration_file() {
    let dir = tempdir().unwrap();
    let logs = dir.path().join("logs");
    let path = dir.path().join("eds.toml");
    fs::write(
        &path,
        format!(
            r#"
[log]
level = "debug"
console = false
directory = "{}"

[msgbus]
type = "in_memory"

[msgbus.mqtt]
method_call_timeout_millisecond = 300
"#,
            logs.display()
        ),
    )
    .unwrap();

    let config = EdsConfig::load(&[&path]).unwrap();
    assert_eq!(config.msgbus.kind, MessageBusKind::InMemory);
    init_tracing("eds-tests", &config.logging).unwrap();
    assert!(logs.is_dir());

    let bus = MessageBus::from_config(&config.msgbus).await.unwrap();
    assert_eq!(bus.settings().call_timeout, Duration::from_millis(300));
    eds_info!(context = LogContext::new().with_protocol("p1"), "loopback bus ready");

    // Driver and manager share the loopback bus.
    let driver = DriverService::new(bus.clone());
    let (tx, mut writes) = mpsc::unbounded_channel();
    driver
        .data
        .on_write("p1", move |target: DataTarget, props: Properties| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((target, props));
                Ok(())
            }
        })
        .await
        .unwrap();

    let manager = ManagerClient::new(bus.clone());
    let mut setpoint = Properties::new();
    setpoint.insert(
        "setpoint".into(),
        DeviceData::new("setpoint", PropertyValueType::Int, 42).unwrap(),
    );
    manager
        .data
        .write("p1", "prod1", "dev1", "setpoint", &setpoint)
        .await
        .unwrap();
    let (target, written) = writes.recv().await.unwrap();
    assert_eq!(target.device_id, "dev1");
    assert_eq!(written, setpoint);

    // Nobody serves reads: the configured call timeout applies.
    let started = Instant::now();
    let err = manager
        .data
        .read("p1", "prod1", "dev1", "setpoint")
        .await
        .unwrap_err();
    assert!(err.is_call_timeout());
    assert!(started.elapsed() >= Duration::from_millis(300));

    bus.disconnect().await.unwrap();
    assert!(!bus.is_connected());
}

#[test]
fn invalid_bus_configuration_is_rejected() {
    let err = r#"
[msgbus.mqtt]
qos = 3
"#
    .parse::<EdsConfig>()
    .unwrap_err();
    assert!(format!("{err:#}").contains("qos"));

    let parsed: serde_json::Value = serde_json::to_value(&EdsConfig::default()).unwrap();
    assert_eq!(parsed["msgbus"]["type"], "mqtt");
}
