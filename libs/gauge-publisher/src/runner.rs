//! Generic publisher loop
//!
//! Drives one protocol driver: watches the gate, reconnects on a fixed
//! cadence while authoritative, consumes the ring latest-only and emits
//! CRC-verified records whose sequence advanced. Non-authoritative
//! publishers keep consuming so their last-known state stays fresh, but
//! never touch the wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gauge_config::GateState;
use gauge_ring::{NormalizedRecord, ShmRing};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::driver::ProtocolDriver;
use crate::status::write_component_status;

/// Runner cadence knobs
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Ring poll period
    pub update_interval: Duration,
    /// Minimum spacing between reconnect attempts
    pub reconnect_interval: Duration,
    /// Cumulative statistics log period
    pub stats_interval: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_millis(10),
            reconnect_interval: Duration::from_secs(5),
            stats_interval: Duration::from_secs(10),
        }
    }
}

/// Publisher skeleton parameterized over a protocol driver
pub struct PublisherRunner<D: ProtocolDriver> {
    driver: D,
    ring: ShmRing,
    gate_rx: watch::Receiver<GateState>,
    running: Arc<AtomicBool>,
    options: RunnerOptions,
}

impl<D: ProtocolDriver> PublisherRunner<D> {
    pub fn new(
        driver: D,
        ring: ShmRing,
        gate_rx: watch::Receiver<GateState>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            driver,
            ring,
            gate_rx,
            running,
            options: RunnerOptions::default(),
        }
    }

    /// Override the default cadences
    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    /// Run until the process running flag clears
    pub async fn run(mut self) {
        let component = self.driver.name();
        let mut last_signature = self
            .gate_rx
            .borrow()
            .signature_for(component)
            .to_string();
        let mut last_record: Option<NormalizedRecord> = None;
        let mut last_reconnect: Option<Instant> = None;
        let mut last_stats = Instant::now();
        let mut success_count: u64 = 0;
        let mut error_count: u64 = 0;

        {
            let state = self.gate_rx.borrow().clone();
            write_component_status(
                component,
                None,
                state.is_authoritative(component),
                self.driver.status_extra(),
            );
        }

        let mut interval = tokio::time::interval(self.options.update_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while self.running.load(Ordering::SeqCst) {
            interval.tick().await;

            let state = self.gate_rx.borrow().clone();
            let authoritative = state.is_authoritative(component);

            // A signature change forces a reconnect with fresh parameters
            let signature = state.signature_for(component).to_string();
            if signature != last_signature {
                info!(component, "configuration signature changed, reconnecting");
                self.driver.disconnect().await;
                self.driver.reconfigure(&state.config);
                last_signature = signature;
                last_reconnect = None;
                write_component_status(
                    component,
                    last_record.as_ref(),
                    authoritative,
                    self.driver.status_extra(),
                );
            }

            // Reconnect cadence applies only while authoritative
            if authoritative && !self.driver.is_connected() {
                let due = last_reconnect
                    .map_or(true, |at| at.elapsed() >= self.options.reconnect_interval);
                if due {
                    last_reconnect = Some(Instant::now());
                    match self.driver.connect().await {
                        Ok(()) => info!(component, "publisher connected"),
                        Err(err) => warn!(component, %err, "connect failed"),
                    }
                }
            }

            // Latest-only consumption; CRC-bad records never surface here
            if let Some(record) = self.ring.pop_latest() {
                let advanced = last_record
                    .map_or(true, |previous| previous.sequence != record.sequence);
                if advanced {
                    last_record = Some(record);

                    if authoritative && self.driver.is_connected() {
                        match self.driver.write_record(&record).await {
                            Ok(()) => success_count += 1,
                            Err(err) => {
                                error_count += 1;
                                warn!(component, %err, "record emit failed");
                                if err.needs_reconnect() {
                                    self.driver.disconnect().await;
                                }
                            },
                        }
                    }

                    write_component_status(
                        component,
                        last_record.as_ref(),
                        authoritative,
                        self.driver.status_extra(),
                    );
                }
            }

            if last_stats.elapsed() >= self.options.stats_interval {
                info!(
                    component,
                    success = success_count,
                    errors = error_count,
                    thickness = last_record.map(|r| f64::from(r.thickness_mm)),
                    "publisher stats"
                );
                last_stats = Instant::now();
            }
        }

        self.driver.disconnect().await;
        let state = self.gate_rx.borrow().clone();
        write_component_status(
            component,
            last_record.as_ref(),
            state.is_authoritative(component),
            self.driver.status_extra(),
        );
        info!(component, "publisher stopped");
    }
}
