//! S7 publisher daemon
//!
//! Writes the latest ring record into a PLC data block while the gate
//! marks S7 authoritative. Reconnects at most once every five seconds.

mod payload;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use gauge_comlink::Result;
use gauge_config::{ConfigManager, GatewayConfig, ProtocolGate, S7Config, DEFAULT_CONFIG_PATH};
use gauge_protocols::s7::S7Client;
use gauge_publisher::logging::init_logger;
use gauge_publisher::{spawn_signal_handler, ProtocolDriver, PublisherRunner, RunnerOptions};
use gauge_ring::{NormalizedRecord, ShmRing};
use serde_json::json;
use tracing::info;

use crate::payload::encode_db_payload;

#[derive(Parser, Debug)]
#[command(author, version, about = "S7 PLC publisher daemon")]
struct Args {
    /// Configuration file path
    #[arg(value_name = "CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config_path: PathBuf,
}

struct S7Driver {
    client: S7Client,
    config: S7Config,
}

impl S7Driver {
    fn new(config: S7Config) -> Self {
        let client = Self::build_client(&config);
        Self { client, config }
    }

    fn build_client(config: &S7Config) -> S7Client {
        S7Client::new(&config.plc_ip, config.rack, config.slot)
    }
}

#[async_trait]
impl ProtocolDriver for S7Driver {
    fn name(&self) -> &'static str {
        "s7"
    }

    async fn connect(&mut self) -> Result<()> {
        self.client.connect().await
    }

    async fn disconnect(&mut self) {
        self.client.disconnect();
    }

    fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    async fn write_record(&mut self, record: &NormalizedRecord) -> Result<()> {
        let payload = encode_db_payload(record);
        self.client
            .write_db(self.config.db_number, 0, &payload)
            .await
    }

    fn reconfigure(&mut self, config: &GatewayConfig) {
        self.config = config.protocol.s7.clone();
        self.client = Self::build_client(&self.config);
    }

    fn status_extra(&self) -> serde_json::Value {
        json!({
            "config": {
                "enabled": self.config.enabled,
                "plc_ip": self.config.plc_ip,
                "rack": self.config.rack,
                "slot": self.config.slot,
                "db_number": self.config.db_number,
                "update_interval_ms": self.config.update_interval_ms,
            },
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _log_guard = match std::env::var("LOG_DIR") {
        Ok(dir) => init_logger(dir, "s7d", "info", false)?,
        Err(_) => init_logger(".", "s7d", "info", true)?,
    };

    info!("S7 daemon starting");

    let manager = Arc::new(ConfigManager::load(&args.config_path));
    let s7_config = manager.get().protocol.s7;
    info!(
        plc_ip = %s7_config.plc_ip,
        rack = s7_config.rack,
        slot = s7_config.slot,
        db_number = s7_config.db_number,
        update_interval_ms = s7_config.update_interval_ms,
        "S7 configuration"
    );

    let ring = ShmRing::open()
        .context("failed to open shared memory ring, is rs485d running?")?;

    let (gate, gate_rx) = ProtocolGate::new(manager.clone());
    tokio::spawn(gate.run());

    let running = Arc::new(AtomicBool::new(true));
    spawn_signal_handler(running.clone());

    info!("S7 daemon started");

    let update_interval = Duration::from_millis(s7_config.update_interval_ms.max(1));
    let driver = S7Driver::new(s7_config);
    PublisherRunner::new(driver, ring, gate_rx, running)
        .with_options(RunnerOptions {
            update_interval,
            ..Default::default()
        })
        .run()
        .await;

    info!("S7 daemon stopped");
    Ok(())
}
