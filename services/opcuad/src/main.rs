//! OPC-UA publisher daemon
//!
//! Writes the latest ring record into four variable nodes whenever the
//! sequence advances and the gate marks OPC-UA authoritative:
//!
//! | Node (ns=2)         | Type   | Value |
//! |---------------------|--------|-------|
//! | `Gateway.Thickness` | Float  | thickness in mm |
//! | `Gateway.Timestamp` | Int64  | timestamp in ms |
//! | `Gateway.Status`    | UInt16 | status word |
//! | `Gateway.Sequence`  | UInt32 | sequence |

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use gauge_comlink::Result;
use gauge_config::{ConfigManager, GatewayConfig, OpcuaConfig, ProtocolGate, DEFAULT_CONFIG_PATH};
use gauge_protocols::opcua::{OpcUaClient, OpcUaValue, SimulatedTransport};
use gauge_publisher::logging::init_logger;
use gauge_publisher::{spawn_signal_handler, ProtocolDriver, PublisherRunner, RunnerOptions};
use gauge_ring::{NormalizedRecord, ShmRing};
use serde_json::json;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "OPC-UA publisher daemon")]
struct Args {
    /// Configuration file path
    #[arg(value_name = "CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config_path: PathBuf,
}

struct OpcUaDriver {
    client: OpcUaClient,
    config: OpcuaConfig,
}

impl OpcUaDriver {
    fn new(config: OpcuaConfig) -> Self {
        let client = OpcUaClient::new(config.clone(), Box::new(SimulatedTransport::new()));
        Self { client, config }
    }
}

#[async_trait]
impl ProtocolDriver for OpcUaDriver {
    fn name(&self) -> &'static str {
        "opcua"
    }

    async fn connect(&mut self) -> Result<()> {
        self.client.connect().await
    }

    async fn disconnect(&mut self) {
        self.client.disconnect().await;
    }

    fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    async fn write_record(&mut self, record: &NormalizedRecord) -> Result<()> {
        let timestamp_ms = (record.timestamp_ns / 1_000_000) as i64;

        self.client
            .write_node("Gateway.Thickness", OpcUaValue::Float(record.thickness_mm))
            .await?;
        self.client
            .write_node("Gateway.Timestamp", OpcUaValue::Int64(timestamp_ms))
            .await?;
        self.client
            .write_node("Gateway.Status", OpcUaValue::UInt16(record.status))
            .await?;
        self.client
            .write_node("Gateway.Sequence", OpcUaValue::UInt32(record.sequence))
            .await?;
        Ok(())
    }

    fn reconfigure(&mut self, config: &GatewayConfig) {
        self.config = config.protocol.opcua.clone();
        self.client = OpcUaClient::new(
            self.config.clone(),
            Box::new(SimulatedTransport::new()),
        );
    }

    fn status_extra(&self) -> serde_json::Value {
        json!({
            "config": {
                "enabled": self.config.enabled,
                "server_url": self.config.server_url,
                "security_mode": self.config.security_mode,
                "username": self.config.username,
            },
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _log_guard = match std::env::var("LOG_DIR") {
        Ok(dir) => init_logger(dir, "opcuad", "info", false)?,
        Err(_) => init_logger(".", "opcuad", "info", true)?,
    };

    info!("OPC UA daemon starting");

    let manager = Arc::new(ConfigManager::load(&args.config_path));
    let opcua_config = manager.get().protocol.opcua;
    info!(
        server_url = %opcua_config.server_url,
        security_mode = %opcua_config.security_mode,
        "OPC UA configuration"
    );

    let ring = ShmRing::open()
        .context("failed to open shared memory ring, is rs485d running?")?;

    let (gate, gate_rx) = ProtocolGate::new(manager.clone());
    tokio::spawn(gate.run());

    let running = Arc::new(AtomicBool::new(true));
    spawn_signal_handler(running.clone());

    info!("OPC UA daemon started");

    let driver = OpcUaDriver::new(opcua_config);
    PublisherRunner::new(driver, ring, gate_rx, running)
        .with_options(RunnerOptions {
            update_interval: Duration::from_millis(10),
            ..Default::default()
        })
        .run()
        .await;

    info!("OPC UA daemon stopped");
    Ok(())
}
