//! Protocol driver capability trait

use async_trait::async_trait;
use gauge_comlink::Result;
use gauge_config::GatewayConfig;
use gauge_ring::NormalizedRecord;

/// The capability set a northbound publisher plugs into the runner.
///
/// Variants differ in connection semantics: the Modbus/TCP image serves
/// rather than connects and reports connected once bound, while the S7 and
/// OPC-UA drivers hold a real client session.
#[async_trait]
pub trait ProtocolDriver: Send {
    /// Component name: "modbus", "s7" or "opcua"
    fn name(&self) -> &'static str;

    /// Establish the outbound session (or bind, for serving drivers)
    async fn connect(&mut self) -> Result<()>;

    /// Tear the session down
    async fn disconnect(&mut self);

    /// Whether records can currently be emitted
    fn is_connected(&self) -> bool;

    /// Emit one CRC-verified record to the wire
    async fn write_record(&mut self, record: &NormalizedRecord) -> Result<()>;

    /// Absorb a fresh configuration snapshot after a signature change.
    ///
    /// The runner disconnects first; the next connect uses the new
    /// parameters.
    fn reconfigure(&mut self, _config: &GatewayConfig) {}

    /// Extra block included in the status sidecar document
    fn status_extra(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}
