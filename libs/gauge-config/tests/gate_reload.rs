//! Protocol gate integration tests
//!
//! Drives the real 1 Hz file watcher against a temp config document.

use std::sync::Arc;
use std::time::Duration;

use gauge_config::{ConfigManager, GatewayConfig, ProtocolGate};
use tempfile::tempdir;

#[tokio::test]
async fn gate_publishes_active_switch_on_file_change() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("config.json");

    let manager = Arc::new(ConfigManager::load(&path));
    let (gate, mut rx) = ProtocolGate::new(manager.clone());
    assert_eq!(rx.borrow().active, "modbus");

    let gate_task = tokio::spawn(gate.run());

    // Let the watcher observe the initial mtime before changing the file
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let mut config = GatewayConfig::default();
    config.protocol.active = "s7".to_string();
    config.protocol.s7.enabled = true;
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

    // Mtime granularity plus the 1 Hz cadence: allow a few seconds
    let changed = tokio::time::timeout(Duration::from_secs(5), rx.changed()).await;
    assert!(changed.is_ok(), "gate observed the change in time");

    let state = rx.borrow().clone();
    assert_eq!(state.active, "s7");
    assert!(state.is_authoritative("s7"));
    assert!(!state.is_authoritative("modbus"));

    drop(rx);
    let _ = tokio::time::timeout(Duration::from_secs(3), gate_task).await;
}
