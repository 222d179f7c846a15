//! Bridging daemon
//!
//! Polls configured RTU windows and mirrors them into a Modbus/TCP
//! register image and/or an S7 data block, one worker per rule.

mod engine;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use gauge_config::{ConfigManager, DEFAULT_CONFIG_PATH};
use gauge_protocols::modbus::{ModbusTcpServer, RtuMaster, DEFAULT_BANK_SIZE};
use gauge_protocols::s7::S7Client;
use gauge_publisher::logging::init_logger;
use gauge_publisher::spawn_signal_handler;
use tracing::{debug, info, warn};

use crate::engine::BridgeEngine;

#[derive(Parser, Debug)]
#[command(author, version, about = "RTU to Modbus-TCP/S7 bridging daemon")]
struct Args {
    /// Configuration file path
    #[arg(value_name = "CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _log_guard = match std::env::var("LOG_DIR") {
        Ok(dir) => init_logger(dir, "bridgesrv", "info", false)?,
        Err(_) => init_logger(".", "bridgesrv", "info", true)?,
    };

    info!("bridging daemon starting");

    let manager = ConfigManager::load(&args.config_path);
    let bridge = manager.get().bridge;
    info!(
        mode = %bridge.mode,
        device = %bridge.rtu.device,
        baudrate = bridge.rtu.baudrate,
        rules = bridge.rules.len(),
        "bridge configuration"
    );

    // Southbound master: a missing port is tolerated, rules fail fast
    // until the maintenance task brings it up
    let mut master = RtuMaster::new(bridge.rtu.clone());
    if let Err(err) = master.connect() {
        warn!(%err, "RTU master not connected, continuing");
    }

    // Northbound targets per mode
    let tcp_server = if bridge.mode == "modbus_tcp" && bridge.modbus_tcp.enabled {
        let server = ModbusTcpServer::new(
            &bridge.modbus_tcp.listen_ip,
            bridge.modbus_tcp.port,
            bridge.modbus_tcp.max_connections,
            DEFAULT_BANK_SIZE,
        );
        // Fatal: the register image is the bridge's northbound face
        server
            .start()
            .await
            .context("failed to start bridge Modbus TCP server")?;
        server.set_write_callback(Arc::new(|address, values: &[u16]| {
            debug!(address, count = values.len(), "peer wrote bridge registers");
        }));
        Some(Arc::new(server))
    } else {
        None
    };

    let s7_client = if bridge.mode == "s7" && bridge.s7.enabled {
        let mut client = S7Client::new(&bridge.s7.plc_ip, bridge.s7.rack, bridge.s7.slot);
        client.set_timeout(bridge.s7.connection_timeout_ms);
        if let Err(err) = client.connect().await {
            warn!(%err, "S7 client not connected, continuing");
        }
        Some(Arc::new(tokio::sync::Mutex::new(client)))
    } else {
        None
    };

    let engine = Arc::new(BridgeEngine::new(master, tcp_server.clone(), s7_client));
    engine.load_rules(bridge.rules);
    engine.start();

    let running = Arc::new(AtomicBool::new(true));
    spawn_signal_handler(running.clone());

    info!("bridging daemon started");

    // Main loop: client maintenance plus a 10 s heartbeat
    let mut last_heartbeat = Instant::now();
    let mut last_maintenance = Instant::now();
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(250)).await;

        if last_maintenance.elapsed() >= Duration::from_secs(5) {
            engine.maintain_connections().await;
            last_maintenance = Instant::now();
        }

        if last_heartbeat.elapsed() >= Duration::from_secs(10) {
            log_heartbeat(&engine, tcp_server.as_deref());
            last_heartbeat = Instant::now();
        }
    }

    info!("bridging daemon shutting down");
    engine.stop().await;
    if let Some(server) = &tcp_server {
        server.stop().await;
    }

    info!("bridging daemon stopped");
    Ok(())
}

fn log_heartbeat(engine: &BridgeEngine, tcp_server: Option<&ModbusTcpServer>) {
    let rules = engine.all_rules();
    let active = rules.iter().filter(|(rule, _)| rule.enabled).count();
    let healthy = rules
        .iter()
        .filter(|(rule, status)| rule.enabled && status.healthy)
        .count();
    let total_reads: u64 = rules.iter().map(|(_, status)| status.read_count).sum();
    let total_errors: u64 = rules.iter().map(|(_, status)| status.error_count).sum();

    info!(
        active,
        healthy,
        reads = total_reads,
        errors = total_errors,
        clients = tcp_server.map(|server| server.connection_count()),
        "bridge heartbeat"
    );

    for (rule, status) in &rules {
        if rule.enabled {
            info!(
                rule_id = %rule.rule_id,
                healthy = status.healthy,
                last_value = status.last_value,
                reads = status.read_count,
                errors = status.error_count,
                "rule status"
            );
        }
    }
}
