//! Abstract OPC-UA transport layer

use async_trait::async_trait;
use gauge_comlink::{ComLinkError, Result};
use tracing::{debug, info};

/// Values writable to OPC-UA variable nodes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpcUaValue {
    Float(f32),
    Int64(i64),
    UInt32(u32),
    UInt16(u16),
}

impl std::fmt::Display for OpcUaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::UInt32(v) => write!(f, "{}", v),
            Self::UInt16(v) => write!(f, "{}", v),
        }
    }
}

/// Session transport the OPC-UA client drives.
///
/// Node ids use the string form `ns=<namespace>;s=<identifier>`.
#[async_trait]
pub trait OpcUaTransport: Send {
    /// Open a session against `endpoint`; credentials are empty for
    /// anonymous access
    async fn connect(&mut self, endpoint: &str, username: &str, password: &str) -> Result<()>;

    /// Close the session
    async fn disconnect(&mut self);

    /// Whether the session is open
    fn is_connected(&self) -> bool;

    /// Write one variable node value
    async fn write_value(&mut self, node_id: &str, value: OpcUaValue) -> Result<()>;
}

/// Simulated OPC-UA session.
///
/// Accepts any endpoint and traces every node write. Stands in for a real
/// client stack on bench systems without an OPC-UA server.
#[derive(Debug, Default)]
pub struct SimulatedTransport {
    endpoint: Option<String>,
    writes: u64,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of node writes performed over the session lifetime
    pub fn write_count(&self) -> u64 {
        self.writes
    }
}

#[async_trait]
impl OpcUaTransport for SimulatedTransport {
    async fn connect(&mut self, endpoint: &str, username: &str, _password: &str) -> Result<()> {
        info!(endpoint, username, "simulated OPC UA session opened");
        self.endpoint = Some(endpoint.to_string());
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.endpoint.take().is_some() {
            info!("simulated OPC UA session closed");
        }
    }

    fn is_connected(&self) -> bool {
        self.endpoint.is_some()
    }

    async fn write_value(&mut self, node_id: &str, value: OpcUaValue) -> Result<()> {
        if self.endpoint.is_none() {
            return Err(ComLinkError::NotConnected);
        }
        self.writes += 1;
        debug!(node_id, %value, "simulated OPC UA write");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_session_lifecycle() {
        let mut transport = SimulatedTransport::new();
        assert!(!transport.is_connected());

        transport
            .connect("opc.tcp://127.0.0.1:4840", "", "")
            .await
            .unwrap();
        assert!(transport.is_connected());

        transport
            .write_value("ns=2;s=Gateway.Thickness", OpcUaValue::Float(1.5))
            .await
            .unwrap();
        assert_eq!(transport.write_count(), 1);

        transport.disconnect().await;
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_write_requires_session() {
        let mut transport = SimulatedTransport::new();
        assert!(transport
            .write_value("ns=2;s=Gateway.Status", OpcUaValue::UInt16(0x0F))
            .await
            .is_err());
    }
}
