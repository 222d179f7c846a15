//! GaugeLink Configuration Library
//!
//! One JSON document drives every daemon. This crate owns the typed tree,
//! the atomic load/save path with default generation, and the protocol gate
//! that hot-reloads the file and decides which publisher is authoritative.

pub mod error;
pub mod gate;
pub mod manager;
pub mod types;

pub use error::{ConfigError, Result};
pub use gate::{GateState, ProtocolGate};
pub use manager::ConfigManager;
pub use types::{
    BridgeConfig, BridgeRule, BridgeRtuConfig, BridgeS7Config, BridgeTcpConfig, Destination,
    GatewayConfig, ModbusConfig, OpcuaConfig, ProtocolConfig, Rs485Config, RtuSource, S7Config,
};

/// Default configuration file location; the first CLI argument overrides it
pub const DEFAULT_CONFIG_PATH: &str = "/opt/gw/conf/config.json";
