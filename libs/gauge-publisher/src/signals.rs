//! Process shutdown signal handling
//!
//! Every daemon runs until SIGINT or SIGTERM clears the shared running
//! flag; long-running loops poll the flag between suspension points.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

/// Install a task that clears `running` on SIGINT/SIGTERM
pub fn spawn_signal_handler(running: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sig) => sig,
                Err(err) => {
                    warn!(%err, "failed to install SIGTERM handler");
                    return;
                },
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
        info!("shutdown signal received");
        running.store(false, Ordering::SeqCst);
    });
}
