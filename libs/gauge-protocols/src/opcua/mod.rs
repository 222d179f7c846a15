//! OPC-UA client support
//!
//! The publisher drives an abstract transport so a full OPC-UA stack can be
//! plugged in without touching the data path. The default transport is the
//! simulated session used in bench deployments.

mod client;
mod transport;

pub use client::OpcUaClient;
pub use transport::{OpcUaTransport, OpcUaValue, SimulatedTransport};
