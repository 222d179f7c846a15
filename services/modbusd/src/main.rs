//! Modbus/TCP publisher daemon
//!
//! Serves the live-reading register image. The server binds once at
//! startup; the publisher runner refreshes the image from the ring while
//! the gate marks this protocol authoritative.

mod image;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use gauge_comlink::Result;
use gauge_config::{ConfigManager, ModbusConfig, ProtocolGate, DEFAULT_CONFIG_PATH};
use gauge_protocols::modbus::ModbusTcpServer;
use gauge_publisher::logging::init_logger;
use gauge_publisher::{spawn_signal_handler, ProtocolDriver, PublisherRunner, RunnerOptions};
use gauge_ring::{NormalizedRecord, ShmRing};
use serde_json::json;
use tracing::{debug, info};

use crate::image::{encode_record_image, IMAGE_SIZE};

/// Maximum concurrent Modbus clients
const MAX_CLIENTS: usize = 32;

#[derive(Parser, Debug)]
#[command(author, version, about = "Modbus/TCP publisher daemon")]
struct Args {
    /// Configuration file path
    #[arg(value_name = "CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config_path: PathBuf,
}

/// Serving driver: connected once the listener is bound
struct ModbusImageDriver {
    server: ModbusTcpServer,
    config: ModbusConfig,
}

#[async_trait]
impl ProtocolDriver for ModbusImageDriver {
    fn name(&self) -> &'static str {
        "modbus"
    }

    async fn connect(&mut self) -> Result<()> {
        // The listener is bound at startup and survives gate flips
        Ok(())
    }

    async fn disconnect(&mut self) {}

    fn is_connected(&self) -> bool {
        self.server.is_running()
    }

    async fn write_record(&mut self, record: &NormalizedRecord) -> Result<()> {
        let regs = encode_record_image(record);
        self.server.set_holding_registers(0, &regs)
    }

    fn reconfigure(&mut self, config: &gauge_config::GatewayConfig) {
        // The listener keeps its original binding; only the status echo
        // follows the file
        self.config = config.protocol.modbus.clone();
    }

    fn status_extra(&self) -> serde_json::Value {
        json!({
            "config": {
                "enabled": self.config.enabled,
                "listen_ip": self.config.listen_ip,
                "port": self.config.port,
                "slave_id": self.config.slave_id,
            },
            "clients": self.server.connection_count(),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _log_guard = match std::env::var("LOG_DIR") {
        Ok(dir) => init_logger(dir, "modbusd", "info", false)?,
        Err(_) => init_logger(".", "modbusd", "info", true)?,
    };

    info!("Modbus TCP daemon starting");

    let manager = Arc::new(ConfigManager::load(&args.config_path));
    let modbus_config = manager.get().protocol.modbus;

    if !modbus_config.enabled {
        info!("Modbus TCP is disabled in config");
        return Ok(());
    }
    info!(
        listen_ip = %modbus_config.listen_ip,
        port = modbus_config.port,
        slave_id = modbus_config.slave_id,
        "Modbus configuration"
    );

    // Fatal: consumers have nothing to read without the sampler's ring
    let ring = ShmRing::open()
        .context("failed to open shared memory ring, is rs485d running?")?;

    // Fatal: the listener is the daemon's whole purpose
    let server = ModbusTcpServer::new(
        &modbus_config.listen_ip,
        modbus_config.port,
        MAX_CLIENTS,
        IMAGE_SIZE,
    );
    server
        .start()
        .await
        .context("failed to start Modbus TCP server")?;
    server.set_write_callback(Arc::new(|address, values: &[u16]| {
        debug!(address, count = values.len(), "peer wrote holding registers");
    }));

    let (gate, gate_rx) = ProtocolGate::new(manager.clone());
    tokio::spawn(gate.run());

    let running = Arc::new(AtomicBool::new(true));
    spawn_signal_handler(running.clone());

    info!("Modbus TCP daemon started");

    let driver = ModbusImageDriver {
        server,
        config: modbus_config,
    };
    PublisherRunner::new(driver, ring, gate_rx, running)
        .with_options(RunnerOptions {
            update_interval: Duration::from_millis(10),
            ..Default::default()
        })
        .run()
        .await;

    info!("Modbus TCP daemon stopped");
    Ok(())
}
