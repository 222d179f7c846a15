//! RS-485 sampler daemon
//!
//! Creates the shared data ring, polls the thickness gauge at the
//! configured cadence and publishes one normalized record per tick.

mod sampler;
mod service;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use gauge_config::{ConfigManager, DEFAULT_CONFIG_PATH};
use gauge_publisher::logging::init_logger;
use gauge_publisher::spawn_signal_handler;
use gauge_ring::ShmRing;
use tracing::info;

use crate::sampler::ThicknessSampler;
use crate::service::sample_loop;

#[derive(Parser, Debug)]
#[command(author, version, about = "RS-485 thickness sampler daemon")]
struct Args {
    /// Configuration file path
    #[arg(value_name = "CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _log_guard = match std::env::var("LOG_DIR") {
        Ok(dir) => init_logger(dir, "rs485d", "info", false)?,
        Err(_) => init_logger(".", "rs485d", "info", true)?,
    };

    info!("RS485 daemon starting");

    let config = ConfigManager::load(&args.config_path);
    let rs485 = config.get().rs485;
    info!(
        device = %rs485.device,
        baudrate = rs485.baudrate,
        poll_rate_ms = rs485.poll_rate_ms,
        "sampler configuration"
    );

    // Fatal: without the ring there is nothing to publish into
    let ring = ShmRing::create().context("failed to create shared memory ring")?;

    let sampler = ThicknessSampler::open(&rs485).context("failed to open sampler source")?;

    let running = Arc::new(AtomicBool::new(true));
    spawn_signal_handler(running.clone());

    info!("RS485 daemon started");
    sample_loop(sampler, ring, rs485, running).await;

    info!("RS485 daemon stopped");
    Ok(())
}
