//! Typed configuration tree
//!
//! Mirrors the on-disk JSON document. Every field carries a serde default so
//! partial documents written by hand still deserialize; unknown keys are
//! ignored rather than rejected.

use gauge_comlink::{ByteOrder, DataType, Transform};
use serde::{Deserialize, Serialize};

/// Root of the configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub rs485: Rs485Config,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

fn default_version() -> String {
    "2.0".to_string()
}

// ============================================================================
// RS-485 sampler
// ============================================================================

/// `rs485.*` — thickness sensor sampling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rs485Config {
    /// Serial device path; `SIMULATED` or a `sim://` prefix forces simulation
    #[serde(default = "default_rs485_device")]
    pub device: String,
    /// One of 9600/19200/38400/57600/115200; others warn and fall back to 19200
    #[serde(default = "default_rs485_baudrate")]
    pub baudrate: u32,
    /// Sampler period in milliseconds
    #[serde(default = "default_poll_rate_ms")]
    pub poll_rate_ms: u64,
    /// Per-read timeout in milliseconds
    #[serde(default = "default_rs485_timeout_ms")]
    pub timeout_ms: u64,
    /// Reserved; parsed but not enforced by the sampler
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Force the simulator regardless of device path
    #[serde(default)]
    pub simulate: bool,
}

fn default_rs485_device() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_rs485_baudrate() -> u32 {
    19200
}
fn default_poll_rate_ms() -> u64 {
    20
}
fn default_rs485_timeout_ms() -> u64 {
    200
}
fn default_retry_count() -> u32 {
    3
}

impl Default for Rs485Config {
    fn default() -> Self {
        Self {
            device: default_rs485_device(),
            baudrate: default_rs485_baudrate(),
            poll_rate_ms: default_poll_rate_ms(),
            timeout_ms: default_rs485_timeout_ms(),
            retry_count: default_retry_count(),
            simulate: false,
        }
    }
}

impl Rs485Config {
    /// Whether the sampler should run without a serial device
    pub fn is_simulated(&self) -> bool {
        self.simulate || self.device == "SIMULATED" || self.device.starts_with("sim://")
    }
}

// ============================================================================
// Northbound publishers
// ============================================================================

/// `protocol.*` — publisher selection and per-protocol settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Which publisher emits: "modbus", "s7" or "opcua"
    #[serde(default = "default_active")]
    pub active: String,
    #[serde(default)]
    pub modbus: ModbusConfig,
    #[serde(default)]
    pub s7: S7Config,
    #[serde(default)]
    pub opcua: OpcuaConfig,
}

fn default_active() -> String {
    "modbus".to_string()
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            active: default_active(),
            modbus: ModbusConfig::default(),
            s7: S7Config::default(),
            opcua: OpcuaConfig::default(),
        }
    }
}

/// `protocol.modbus.*`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModbusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,
}

fn default_true() -> bool {
    true
}
fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_modbus_port() -> u16 {
    502
}
fn default_slave_id() -> u8 {
    1
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_ip: default_listen_ip(),
            port: default_modbus_port(),
            slave_id: default_slave_id(),
        }
    }
}

/// `protocol.s7.*`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S7Config {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_plc_ip")]
    pub plc_ip: String,
    #[serde(default)]
    pub rack: u16,
    #[serde(default = "default_slot")]
    pub slot: u16,
    #[serde(default = "default_db_number")]
    pub db_number: u16,
    #[serde(default = "default_s7_interval_ms")]
    pub update_interval_ms: u64,
}

fn default_plc_ip() -> String {
    "192.168.1.10".to_string()
}
fn default_slot() -> u16 {
    1
}
fn default_db_number() -> u16 {
    10
}
fn default_s7_interval_ms() -> u64 {
    50
}

impl Default for S7Config {
    fn default() -> Self {
        Self {
            enabled: false,
            plc_ip: default_plc_ip(),
            rack: 0,
            slot: default_slot(),
            db_number: default_db_number(),
            update_interval_ms: default_s7_interval_ms(),
        }
    }
}

/// `protocol.opcua.*`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpcuaConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_opcua_url")]
    pub server_url: String,
    /// "None", "Sign" or "SignAndEncrypt"
    #[serde(default = "default_security_mode")]
    pub security_mode: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

fn default_opcua_url() -> String {
    "opc.tcp://192.168.1.20:4840".to_string()
}
fn default_security_mode() -> String {
    "None".to_string()
}

impl Default for OpcuaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_url: default_opcua_url(),
            security_mode: default_security_mode(),
            username: String::new(),
            password: String::new(),
        }
    }
}

// ============================================================================
// Bridging engine
// ============================================================================

/// `bridge.*` — RTU-to-northbound bridging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// "modbus_tcp" or "s7": which northbound target the engine serves
    #[serde(default = "default_bridge_mode")]
    pub mode: String,
    #[serde(default)]
    pub rtu: BridgeRtuConfig,
    #[serde(default)]
    pub modbus_tcp: BridgeTcpConfig,
    #[serde(default)]
    pub s7: BridgeS7Config,
    #[serde(default)]
    pub rules: Vec<BridgeRule>,
}

fn default_bridge_mode() -> String {
    "modbus_tcp".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mode: default_bridge_mode(),
            rtu: BridgeRtuConfig::default(),
            modbus_tcp: BridgeTcpConfig::default(),
            s7: BridgeS7Config::default(),
            rules: Vec::new(),
        }
    }
}

/// `bridge.rtu.*` — the southbound serial master
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRtuConfig {
    #[serde(default = "default_rs485_device")]
    pub device: String,
    #[serde(default = "default_bridge_baudrate")]
    pub baudrate: u32,
    /// "N", "E" or "O"
    #[serde(default = "default_parity")]
    pub parity: String,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default = "default_bridge_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

fn default_bridge_baudrate() -> u32 {
    9600
}
fn default_parity() -> String {
    "N".to_string()
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_bridge_timeout_ms() -> u64 {
    1000
}

impl Default for BridgeRtuConfig {
    fn default() -> Self {
        Self {
            device: default_rs485_device(),
            baudrate: default_bridge_baudrate(),
            parity: default_parity(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            timeout_ms: default_bridge_timeout_ms(),
            retry_count: default_retry_count(),
        }
    }
}

/// `bridge.modbus_tcp.*` — the northbound register image server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeTcpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    32
}

impl Default for BridgeTcpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_ip: default_listen_ip(),
            port: default_modbus_port(),
            max_connections: default_max_connections(),
        }
    }
}

/// `bridge.s7.*` — the northbound PLC target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeS7Config {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_plc_ip")]
    pub plc_ip: String,
    #[serde(default)]
    pub rack: u16,
    #[serde(default = "default_slot")]
    pub slot: u16,
    #[serde(default = "default_s7_conn_timeout_ms")]
    pub connection_timeout_ms: u64,
}

fn default_s7_conn_timeout_ms() -> u64 {
    2000
}

impl Default for BridgeS7Config {
    fn default() -> Self {
        Self {
            enabled: false,
            plc_ip: default_plc_ip(),
            rack: 0,
            slot: default_slot(),
            connection_timeout_ms: default_s7_conn_timeout_ms(),
        }
    }
}

// ============================================================================
// Bridging rules
// ============================================================================

/// One source → transform → destination pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRule {
    /// Opaque identifier; generated when the document omits it
    #[serde(default = "generated_rule_id")]
    pub rule_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub source: RtuSource,
    pub destination: Destination,
    #[serde(default)]
    pub transform: Transform,
}

fn generated_rule_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// RTU polling window a rule reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtuSource {
    pub slave_id: u8,
    /// 3 (holding registers) or 4 (input registers)
    pub function_code: u8,
    pub start_address: u16,
    pub register_count: u16,
    pub data_type: DataType,
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_bridge_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

fn default_poll_interval_ms() -> u64 {
    100
}

/// Where a rule writes its transformed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "snake_case")]
pub enum Destination {
    /// Modbus/TCP register image window
    ModbusTcp {
        #[serde(default = "default_slave_id")]
        slave_id: u8,
        /// 6 (single register) or 16 (register block)
        function_code: u8,
        start_address: u16,
        data_type: DataType,
        #[serde(default)]
        byte_order: ByteOrder,
    },
    /// S7 data-block offset
    S7 {
        db_number: u16,
        start_byte: u16,
        /// Bit position inside the byte, for BOOL destinations
        #[serde(default)]
        bit_offset: u8,
        data_type: DataType,
        #[serde(default)]
        byte_order: ByteOrder,
    },
}
