//! Bridging engine
//!
//! One worker per enabled rule, each independently polling its RTU window,
//! decoding, transforming and writing to the northbound target. Rules
//! share nothing beyond the three client resources; access to each client
//! is serialized by that client's own lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gauge_comlink::codec::{clamp_to_data_type, registers_to_value, value_to_registers, value_to_s7_bytes};
use gauge_comlink::{ComLinkError, DataType, Result};
use gauge_config::{BridgeRule, Destination};
use gauge_protocols::modbus::{ModbusTcpServer, RtuMaster};
use gauge_protocols::s7::S7Client;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Per-rule cycle position, advanced as one poll makes progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleState {
    #[default]
    Idle,
    Reading,
    Decoded,
    Transformed,
    Writing,
}

/// Runtime counters carried by every rule.
///
/// Preserved across rule body updates; reset only when a rule is removed.
#[derive(Debug, Clone, Default)]
pub struct RuleStatus {
    pub read_count: u64,
    pub write_count: u64,
    pub error_count: u64,
    pub last_update_ms: u64,
    pub last_value: f64,
    pub healthy: bool,
    pub cycle: CycleState,
}

struct RuleEntry {
    rule: BridgeRule,
    status: RuleStatus,
}

/// Resources shared by all rule workers
struct Shared {
    rules: Mutex<HashMap<String, RuleEntry>>,
    rtu: tokio::sync::Mutex<RtuMaster>,
    tcp: Option<Arc<ModbusTcpServer>>,
    s7: Option<Arc<tokio::sync::Mutex<S7Client>>>,
    running: AtomicBool,
}

impl Shared {
    fn set_cycle(&self, rule_id: &str, cycle: CycleState) {
        let mut rules = self.rules.lock().expect("rules mutex poisoned");
        if let Some(entry) = rules.get_mut(rule_id) {
            entry.status.cycle = cycle;
        }
    }
}

/// The per-rule worker fan-out
pub struct BridgeEngine {
    shared: Arc<Shared>,
    workers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl BridgeEngine {
    pub fn new(
        rtu: RtuMaster,
        tcp: Option<Arc<ModbusTcpServer>>,
        s7: Option<Arc<tokio::sync::Mutex<S7Client>>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                rules: Mutex::new(HashMap::new()),
                rtu: tokio::sync::Mutex::new(rtu),
                tcp,
                s7,
                running: AtomicBool::new(false),
            }),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the rule set; only valid before `start`
    pub fn load_rules(&self, rules: Vec<BridgeRule>) {
        let mut map = self.shared.rules.lock().expect("rules mutex poisoned");
        map.clear();
        for rule in rules {
            map.insert(
                rule.rule_id.clone(),
                RuleEntry {
                    rule,
                    status: RuleStatus::default(),
                },
            );
        }
    }

    /// Add one rule; a worker spawns immediately while running
    pub fn add_rule(&self, rule: BridgeRule) -> bool {
        let rule_id = rule.rule_id.clone();
        let enabled = rule.enabled;
        {
            let mut map = self.shared.rules.lock().expect("rules mutex poisoned");
            if map.contains_key(&rule_id) {
                return false;
            }
            map.insert(
                rule_id.clone(),
                RuleEntry {
                    rule,
                    status: RuleStatus::default(),
                },
            );
        }

        if self.is_running() && enabled {
            self.spawn_worker(rule_id);
        }
        true
    }

    /// Remove a rule and cancel its worker
    pub fn remove_rule(&self, rule_id: &str) -> bool {
        let removed = self
            .shared
            .rules
            .lock()
            .expect("rules mutex poisoned")
            .remove(rule_id)
            .is_some();

        if removed {
            if let Some(handle) = self
                .workers
                .lock()
                .expect("workers mutex poisoned")
                .remove(rule_id)
            {
                handle.abort();
            }
        }
        removed
    }

    /// Rewrite a rule body, preserving its runtime counters.
    ///
    /// The worker is restarted so a permanently failed rule comes back to
    /// life once re-configured.
    pub fn update_rule(&self, rule_id: &str, mut rule: BridgeRule) -> bool {
        rule.rule_id = rule_id.to_string();
        let enabled = rule.enabled;
        {
            let mut map = self.shared.rules.lock().expect("rules mutex poisoned");
            let Some(entry) = map.get_mut(rule_id) else {
                return false;
            };
            entry.rule = rule;
        }

        if let Some(handle) = self
            .workers
            .lock()
            .expect("workers mutex poisoned")
            .remove(rule_id)
        {
            handle.abort();
        }
        if self.is_running() && enabled {
            self.spawn_worker(rule_id.to_string());
        }
        true
    }

    /// Spawn one worker per enabled rule
    pub fn start(&self) {
        if self.is_running() {
            return;
        }
        self.shared.running.store(true, Ordering::SeqCst);

        let rule_ids: Vec<String> = {
            let map = self.shared.rules.lock().expect("rules mutex poisoned");
            map.values()
                .filter(|entry| entry.rule.enabled)
                .map(|entry| entry.rule.rule_id.clone())
                .collect()
        };

        for rule_id in rule_ids {
            self.spawn_worker(rule_id);
        }

        info!(
            workers = self.workers.lock().expect("workers mutex poisoned").len(),
            "bridging engine started"
        );
    }

    /// Cancel all workers and join them
    pub async fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);

        let handles: Vec<(String, JoinHandle<()>)> = self
            .workers
            .lock()
            .expect("workers mutex poisoned")
            .drain()
            .collect();
        for (rule_id, handle) in handles {
            handle.abort();
            let _ = handle.await;
            info!(%rule_id, "rule worker stopped");
        }

        info!("bridging engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Execute one rule cycle on demand
    pub async fn sync_rule(&self, rule_id: &str) -> Result<f64> {
        let rule = {
            let map = self.shared.rules.lock().expect("rules mutex poisoned");
            map.get(rule_id)
                .map(|entry| entry.rule.clone())
                .ok_or_else(|| ComLinkError::Config(format!("unknown rule {}", rule_id)))?
        };
        execute_rule_once(&self.shared, &rule).await
    }

    /// Snapshot every rule with its runtime status
    pub fn all_rules(&self) -> Vec<(BridgeRule, RuleStatus)> {
        let map = self.shared.rules.lock().expect("rules mutex poisoned");
        map.values()
            .map(|entry| (entry.rule.clone(), entry.status.clone()))
            .collect()
    }

    /// Try to (re)connect the shared southbound/northbound clients.
    ///
    /// Called periodically by the daemon; while the RTU master is down all
    /// rule reads fail fast.
    pub async fn maintain_connections(&self) {
        {
            let mut rtu = self.shared.rtu.lock().await;
            if !rtu.is_connected() {
                if let Err(err) = rtu.connect() {
                    warn!(%err, "RTU master reconnect failed");
                }
            }
        }

        if let Some(s7) = &self.shared.s7 {
            let mut client = s7.lock().await;
            if !client.is_connected() {
                if let Err(err) = client.connect().await {
                    warn!(%err, "S7 client reconnect failed");
                }
            }
        }
    }

    fn spawn_worker(&self, rule_id: String) {
        let shared = self.shared.clone();
        let handle = tokio::spawn(rule_worker(shared, rule_id.clone()));
        self.workers
            .lock()
            .expect("workers mutex poisoned")
            .insert(rule_id, handle);
    }
}

/// One rule's poll loop
async fn rule_worker(shared: Arc<Shared>, rule_id: String) {
    info!(%rule_id, "rule worker started");

    while shared.running.load(Ordering::SeqCst) {
        // Snapshot under a short lock; the body may be rewritten live
        let rule = {
            let map = shared.rules.lock().expect("rules mutex poisoned");
            match map.get(&rule_id) {
                Some(entry) if entry.rule.enabled => entry.rule.clone(),
                _ => break,
            }
        };

        let outcome = execute_rule_once(&shared, &rule).await;
        let permanent_failure = matches!(&outcome, Err(ComLinkError::NotSupported(_)));

        {
            let mut map = shared.rules.lock().expect("rules mutex poisoned");
            if let Some(entry) = map.get_mut(&rule_id) {
                match &outcome {
                    Ok(value) => {
                        entry.status.read_count += 1;
                        entry.status.write_count += 1;
                        entry.status.last_value = *value;
                        entry.status.healthy = true;
                    },
                    Err(err) => {
                        entry.status.error_count += 1;
                        entry.status.healthy = false;
                        warn!(%rule_id, %err, "rule cycle failed");
                    },
                }
                entry.status.last_update_ms = chrono::Utc::now().timestamp_millis() as u64;
                entry.status.cycle = CycleState::Idle;
            }
        }

        if permanent_failure {
            // Misconfigured function code or destination: stay down until
            // the rule is rewritten
            warn!(%rule_id, "rule disabled until re-configured");
            break;
        }

        tokio::time::sleep(Duration::from_millis(rule.source.poll_interval_ms.max(1))).await;
    }

    info!(%rule_id, "rule worker exited");
}

/// One Idle -> Reading -> Decoded -> Transformed -> Writing cycle
async fn execute_rule_once(shared: &Shared, rule: &BridgeRule) -> Result<f64> {
    let rule_id = rule.rule_id.as_str();

    // Read the source window
    shared.set_cycle(rule_id, CycleState::Reading);
    let registers = {
        let mut master = shared.rtu.lock().await;
        if !master.is_connected() {
            return Err(ComLinkError::NotConnected);
        }
        match rule.source.function_code {
            3 => {
                master
                    .read_holding_registers(
                        rule.source.slave_id,
                        rule.source.start_address,
                        rule.source.register_count,
                    )
                    .await?
            },
            4 => {
                master
                    .read_input_registers(
                        rule.source.slave_id,
                        rule.source.start_address,
                        rule.source.register_count,
                    )
                    .await?
            },
            other => {
                return Err(ComLinkError::NotSupported(format!(
                    "source function code {}",
                    other
                )))
            },
        }
    };

    // Decode to a scalar
    let raw = registers_to_value(&registers, rule.source.data_type, rule.source.byte_order)?;
    shared.set_cycle(rule_id, CycleState::Decoded);

    // Apply the transform
    let value = rule.transform.apply(raw);
    shared.set_cycle(rule_id, CycleState::Transformed);

    // Write the destination
    shared.set_cycle(rule_id, CycleState::Writing);
    write_destination(shared, &rule.destination, value).await?;

    Ok(value)
}

/// Encode and deliver one transformed value
async fn write_destination(shared: &Shared, destination: &Destination, value: f64) -> Result<()> {
    match destination {
        Destination::ModbusTcp {
            function_code,
            start_address,
            data_type,
            byte_order,
            ..
        } => {
            let server = shared.tcp.as_ref().ok_or_else(|| {
                ComLinkError::NotSupported("Modbus TCP target not configured".to_string())
            })?;

            let clamped = clamp_to_data_type(value, *data_type);
            let registers = value_to_registers(clamped, *data_type, *byte_order)?;

            match function_code {
                6 => server.set_holding_registers(*start_address, &registers[..1]),
                16 => server.set_holding_registers(*start_address, &registers),
                other => Err(ComLinkError::NotSupported(format!(
                    "destination function code {}",
                    other
                ))),
            }
        },

        Destination::S7 {
            db_number,
            start_byte,
            bit_offset,
            data_type,
            ..
        } => {
            let s7 = shared.s7.as_ref().ok_or_else(|| {
                ComLinkError::NotSupported("S7 target not configured".to_string())
            })?;

            let mut client = s7.lock().await;
            if !client.is_connected() {
                return Err(ComLinkError::NotConnected);
            }

            if *data_type == DataType::Bit {
                return client
                    .write_db_bool(*db_number, *start_byte, *bit_offset, value != 0.0)
                    .await;
            }

            let clamped = clamp_to_data_type(value, *data_type);
            let bytes = value_to_s7_bytes(clamped, *data_type)?;
            client.write_db(*db_number, *start_byte, &bytes).await
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauge_comlink::{ByteOrder, Transform, TransformOp};
    use gauge_config::{BridgeRtuConfig, RtuSource};

    fn float_rule(rule_id: &str, scale: f64, dest_address: u16) -> BridgeRule {
        BridgeRule {
            rule_id: rule_id.to_string(),
            description: String::new(),
            enabled: true,
            source: RtuSource {
                slave_id: 1,
                function_code: 3,
                start_address: 100,
                register_count: 2,
                data_type: DataType::Float32,
                byte_order: ByteOrder::BigEndian,
                poll_interval_ms: 100,
                timeout_ms: 200,
                retry_count: 1,
            },
            destination: Destination::ModbusTcp {
                slave_id: 1,
                function_code: 16,
                start_address: dest_address,
                data_type: DataType::Float32,
                byte_order: ByteOrder::BigEndian,
            },
            transform: Transform {
                operation: TransformOp::Scale,
                scale,
                offset: 0.0,
                ..Default::default()
            },
        }
    }

    fn engine_with_tcp() -> (BridgeEngine, Arc<ModbusTcpServer>) {
        let server = Arc::new(ModbusTcpServer::new("127.0.0.1", 0, 4, 1000));
        let master = RtuMaster::new(BridgeRtuConfig::default());
        let engine = BridgeEngine::new(master, Some(server.clone()), None);
        (engine, server)
    }

    #[test]
    fn test_rule_crud_preserves_counters() {
        let (engine, _server) = engine_with_tcp();

        assert!(engine.add_rule(float_rule("r1", 1.0, 0)));
        assert!(!engine.add_rule(float_rule("r1", 1.0, 0)));

        // Simulate accumulated counters
        {
            let mut map = engine.shared.rules.lock().unwrap();
            map.get_mut("r1").unwrap().status.read_count = 7;
        }

        assert!(engine.update_rule("r1", float_rule("r1", 2.0, 4)));
        let rules = engine.all_rules();
        let (rule, status) = rules.iter().find(|(r, _)| r.rule_id == "r1").unwrap();
        assert_eq!(rule.transform.scale, 2.0);
        assert_eq!(status.read_count, 7);

        assert!(engine.remove_rule("r1"));
        assert!(!engine.remove_rule("r1"));
    }

    #[tokio::test]
    async fn test_transform_and_encode_path() {
        // Scenario: RTU returns 1.5, scale 10 => TCP image holds 15.0
        let (engine, server) = engine_with_tcp();

        let rule = float_rule("flow", 10.0, 200);
        let raw = registers_to_value(
            &[0x3FC0, 0x0000],
            rule.source.data_type,
            rule.source.byte_order,
        )
        .unwrap();
        let value = rule.transform.apply(raw);
        write_destination(&engine.shared, &rule.destination, value)
            .await
            .unwrap();

        assert_eq!(
            server.get_holding_registers(200, 2).unwrap(),
            vec![0x4170, 0x0000]
        );
    }

    #[tokio::test]
    async fn test_fc6_writes_single_register() {
        let (engine, server) = engine_with_tcp();
        let destination = Destination::ModbusTcp {
            slave_id: 1,
            function_code: 6,
            start_address: 10,
            data_type: DataType::Uint16,
            byte_order: ByteOrder::BigEndian,
        };

        write_destination(&engine.shared, &destination, 4660.0)
            .await
            .unwrap();
        assert_eq!(server.get_holding_registers(10, 1).unwrap(), vec![0x1234]);
    }

    #[tokio::test]
    async fn test_destination_clamps_to_type_range() {
        let (engine, server) = engine_with_tcp();
        let destination = Destination::ModbusTcp {
            slave_id: 1,
            function_code: 6,
            start_address: 0,
            data_type: DataType::Uint16,
            byte_order: ByteOrder::BigEndian,
        };

        write_destination(&engine.shared, &destination, 70000.0)
            .await
            .unwrap();
        assert_eq!(server.get_holding_registers(0, 1).unwrap(), vec![0xFFFF]);
    }

    #[tokio::test]
    async fn test_unsupported_destination_function_code() {
        let (engine, _server) = engine_with_tcp();
        let destination = Destination::ModbusTcp {
            slave_id: 1,
            function_code: 5,
            start_address: 0,
            data_type: DataType::Uint16,
            byte_order: ByteOrder::BigEndian,
        };

        let err = write_destination(&engine.shared, &destination, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ComLinkError::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_disconnected_rtu_fails_cycle() {
        let (engine, _server) = engine_with_tcp();
        let rule = float_rule("r1", 1.0, 0);
        // The master was never connected
        let err = execute_rule_once(&engine.shared, &rule).await.unwrap_err();
        assert!(matches!(err, ComLinkError::NotConnected));
    }

    #[tokio::test]
    async fn test_s7_destination_without_client() {
        let (engine, _server) = engine_with_tcp();
        let destination = Destination::S7 {
            db_number: 1,
            start_byte: 0,
            bit_offset: 0,
            data_type: DataType::Float32,
            byte_order: ByteOrder::BigEndian,
        };

        let err = write_destination(&engine.shared, &destination, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ComLinkError::NotSupported(_)));
    }
}
