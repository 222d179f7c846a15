//! Protocol gate
//!
//! The single source of truth for which publisher is authoritative. A 1 Hz
//! watcher compares the config file's modification timestamp; on change it
//! reloads the tree, recomputes one signature string per protocol, and
//! publishes the new state through a watch channel. Publishers observe
//! their signature: a change forces disconnect + reconnect; an `active`
//! change flips who may emit.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::manager::ConfigManager;
use crate::types::GatewayConfig;

/// Snapshot published to every gate observer
#[derive(Debug, Clone, PartialEq)]
pub struct GateState {
    /// `protocol.active` — which publisher emits
    pub active: String,
    pub modbus_signature: String,
    pub s7_signature: String,
    pub opcua_signature: String,
    /// Full tree snapshot taken at the same reload
    pub config: GatewayConfig,
}

impl GateState {
    /// Derive the gate state from a configuration snapshot
    pub fn from_config(config: &GatewayConfig) -> Self {
        let active = config.protocol.active.clone();
        let modbus = &config.protocol.modbus;
        let s7 = &config.protocol.s7;
        let opcua = &config.protocol.opcua;

        Self {
            active: active.clone(),
            modbus_signature: format!(
                "{}|{}|{}|{}|{}",
                active,
                u8::from(modbus.enabled),
                modbus.listen_ip,
                modbus.port,
                modbus.slave_id
            ),
            s7_signature: format!(
                "{}|{}|{}|{}|{}|{}|{}",
                active,
                u8::from(s7.enabled),
                s7.plc_ip,
                s7.rack,
                s7.slot,
                s7.db_number,
                s7.update_interval_ms
            ),
            opcua_signature: format!(
                "{}|{}|{}|{}|{}|{}",
                active,
                u8::from(opcua.enabled),
                opcua.server_url,
                opcua.security_mode,
                opcua.username,
                opcua.password
            ),
            config: config.clone(),
        }
    }

    /// Signature for one publisher component name
    pub fn signature_for(&self, component: &str) -> &str {
        match component {
            "modbus" => &self.modbus_signature,
            "s7" => &self.s7_signature,
            "opcua" => &self.opcua_signature,
            _ => "",
        }
    }

    /// Whether `component` is the authoritative publisher and enabled
    pub fn is_authoritative(&self, component: &str) -> bool {
        if self.active != component {
            return false;
        }
        match component {
            "modbus" => self.config.protocol.modbus.enabled,
            "s7" => self.config.protocol.s7.enabled,
            "opcua" => self.config.protocol.opcua.enabled,
            _ => false,
        }
    }
}

/// Config-file watcher driving the gate
pub struct ProtocolGate {
    manager: Arc<ConfigManager>,
    tx: watch::Sender<GateState>,
}

impl ProtocolGate {
    /// Create the gate from the manager's current tree
    pub fn new(manager: Arc<ConfigManager>) -> (Self, watch::Receiver<GateState>) {
        let state = GateState::from_config(&manager.get());
        let (tx, rx) = watch::channel(state);
        (Self { manager, tx }, rx)
    }

    /// Run the 1 Hz watch loop until the sender has no receivers left.
    ///
    /// Spawn this on the runtime; it owns nothing but the manager handle.
    pub async fn run(self) {
        let mut last_mtime: Option<SystemTime> = None;
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if self.tx.is_closed() {
                return;
            }

            let mtime = std::fs::metadata(self.manager.path())
                .and_then(|m| m.modified())
                .ok();
            if mtime.is_none() || mtime == last_mtime {
                continue;
            }
            let first_pass = last_mtime.is_none();
            last_mtime = mtime;
            // The first observed mtime is the file we already loaded
            if first_pass {
                continue;
            }

            if !self.manager.reload() {
                continue;
            }

            let state = GateState::from_config(&self.manager.get());
            let changed = {
                let current = self.tx.borrow();
                *current != state
            };
            if changed {
                info!(active = %state.active, "protocol gate updated");
                let _ = self.tx.send(state);
            } else {
                debug!("config file touched without meaningful change");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_reflects_connection_parameters() {
        let mut config = GatewayConfig::default();
        let a = GateState::from_config(&config);

        config.protocol.s7.plc_ip = "10.0.0.9".to_string();
        let b = GateState::from_config(&config);

        assert_ne!(a.s7_signature, b.s7_signature);
        // Untouched protocols keep their signature
        assert_eq!(a.modbus_signature, b.modbus_signature);
    }

    #[test]
    fn test_signature_reflects_active_switch() {
        let mut config = GatewayConfig::default();
        let a = GateState::from_config(&config);

        config.protocol.active = "s7".to_string();
        let b = GateState::from_config(&config);

        // Every signature embeds the active protocol
        assert_ne!(a.modbus_signature, b.modbus_signature);
        assert_ne!(a.s7_signature, b.s7_signature);
    }

    #[test]
    fn test_authoritative_requires_enabled() {
        let mut config = GatewayConfig::default();
        config.protocol.active = "s7".to_string();
        config.protocol.s7.enabled = false;
        let state = GateState::from_config(&config);
        assert!(!state.is_authoritative("s7"));
        assert!(!state.is_authoritative("modbus"));

        config.protocol.s7.enabled = true;
        let state = GateState::from_config(&config);
        assert!(state.is_authoritative("s7"));
    }

    #[test]
    fn test_default_modbus_is_authoritative() {
        let state = GateState::from_config(&GatewayConfig::default());
        assert!(state.is_authoritative("modbus"));
        assert!(!state.is_authoritative("s7"));
        assert!(!state.is_authoritative("opcua"));
    }
}
