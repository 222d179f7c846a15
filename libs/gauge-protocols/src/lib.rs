//! GaugeLink Protocol Library
//!
//! Field-bus plumbing shared by the daemons:
//!
//! - `modbus` — PDU/frame handling, an async RTU master and a Modbus/TCP
//!   register-image server
//! - `s7` — ISO-on-TCP client for Siemens data blocks
//! - `opcua` — client wrapper over a pluggable transport

pub mod modbus;
pub mod opcua;
pub mod s7;
