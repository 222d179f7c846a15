//! OPC-UA client wrapper
//!
//! High-level write API over a boxed transport, carrying the endpoint and
//! credential configuration.

use gauge_comlink::Result;
use gauge_config::OpcuaConfig;

use super::transport::{OpcUaTransport, OpcUaValue};

/// OPC-UA client bound to one server endpoint
pub struct OpcUaClient {
    config: OpcuaConfig,
    transport: Box<dyn OpcUaTransport>,
}

impl OpcUaClient {
    /// Create a client over the given transport
    pub fn new(config: OpcuaConfig, transport: Box<dyn OpcUaTransport>) -> Self {
        Self { config, transport }
    }

    /// Open the session (anonymous when no username is configured)
    pub async fn connect(&mut self) -> Result<()> {
        self.transport
            .connect(
                &self.config.server_url,
                &self.config.username,
                &self.config.password,
            )
            .await
    }

    /// Close the session
    pub async fn disconnect(&mut self) {
        self.transport.disconnect().await;
    }

    /// Whether the session is open
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Write one variable node in namespace 2 by string identifier
    pub async fn write_node(&mut self, identifier: &str, value: OpcUaValue) -> Result<()> {
        let node_id = format!("ns=2;s={}", identifier);
        self.transport.write_value(&node_id, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcua::transport::SimulatedTransport;

    #[tokio::test]
    async fn test_client_over_simulated_transport() {
        let config = OpcuaConfig {
            enabled: true,
            server_url: "opc.tcp://127.0.0.1:4840".to_string(),
            ..Default::default()
        };
        let mut client = OpcUaClient::new(config, Box::new(SimulatedTransport::new()));

        assert!(!client.is_connected());
        client.connect().await.unwrap();
        assert!(client.is_connected());

        client
            .write_node("Gateway.Sequence", OpcUaValue::UInt32(42))
            .await
            .unwrap();

        client.disconnect().await;
        assert!(!client.is_connected());
    }
}
