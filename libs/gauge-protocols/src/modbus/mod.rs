//! Modbus protocol support
//!
//! PDU and frame handling are implemented here directly; the master and
//! server build on them.

pub mod frame;
pub mod master;
pub mod pdu;
pub mod server;

pub use frame::{crc16, MbapHeader};
pub use master::RtuMaster;
pub use pdu::{ModbusPdu, PduBuilder, MAX_PDU_SIZE};
pub use server::{ModbusTcpServer, RegisterBank, WriteCallback, DEFAULT_BANK_SIZE};

/// MBAP header length in bytes
pub const MBAP_HEADER_LEN: usize = 7;

/// Modbus exception codes used by this gateway
pub mod exception {
    pub const ILLEGAL_FUNCTION: u8 = 0x01;
    pub const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
    pub const ILLEGAL_DATA_VALUE: u8 = 0x03;
}
