//! Modbus/TCP server
//!
//! Serves a register image of four typed windows over MBAP framing. One
//! accept loop, one task per connection, connections beyond the cap are
//! dropped at accept. A write callback fires after FC 6/16 so the bridging
//! engine can observe peer writes into the same image.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use gauge_comlink::{ComLinkError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::exception;
use super::frame::{build_tcp_frame, MbapHeader};
use super::MBAP_HEADER_LEN;

/// Default cell count per register window
pub const DEFAULT_BANK_SIZE: usize = 1000;

/// Callback invoked after a peer write: `(start_address, written_values)`
pub type WriteCallback = Arc<dyn Fn(u16, &[u16]) + Send + Sync>;

// ============================================================================
// Register bank
// ============================================================================

/// The four typed register windows served to Modbus clients.
///
/// One mutex guards all accessors; out-of-range access is rejected and
/// leaves the image untouched.
pub struct RegisterBank {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    holding: Vec<u16>,
    input: Vec<u16>,
}

impl RegisterBank {
    /// Bank with `size` cells in every window
    pub fn new(size: usize) -> Self {
        Self {
            coils: vec![false; size],
            discrete_inputs: vec![false; size],
            holding: vec![0; size],
            input: vec![0; size],
        }
    }

    fn check_range(len: usize, address: u16, count: usize) -> Result<()> {
        let end = address as usize + count;
        if count == 0 || end > len {
            return Err(ComLinkError::AddressOutOfRange(format!(
                "window [{}..{}) exceeds {} cells",
                address, end, len
            )));
        }
        Ok(())
    }

    pub fn set_holding_registers(&mut self, address: u16, data: &[u16]) -> Result<()> {
        Self::check_range(self.holding.len(), address, data.len())?;
        self.holding[address as usize..address as usize + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn get_holding_registers(&self, address: u16, count: u16) -> Result<Vec<u16>> {
        Self::check_range(self.holding.len(), address, count as usize)?;
        Ok(self.holding[address as usize..address as usize + count as usize].to_vec())
    }

    pub fn set_input_registers(&mut self, address: u16, data: &[u16]) -> Result<()> {
        Self::check_range(self.input.len(), address, data.len())?;
        self.input[address as usize..address as usize + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn get_input_registers(&self, address: u16, count: u16) -> Result<Vec<u16>> {
        Self::check_range(self.input.len(), address, count as usize)?;
        Ok(self.input[address as usize..address as usize + count as usize].to_vec())
    }

    pub fn set_coils(&mut self, address: u16, data: &[bool]) -> Result<()> {
        Self::check_range(self.coils.len(), address, data.len())?;
        self.coils[address as usize..address as usize + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn get_coils(&self, address: u16, count: u16) -> Result<Vec<bool>> {
        Self::check_range(self.coils.len(), address, count as usize)?;
        Ok(self.coils[address as usize..address as usize + count as usize].to_vec())
    }

    pub fn set_discrete_inputs(&mut self, address: u16, data: &[bool]) -> Result<()> {
        Self::check_range(self.discrete_inputs.len(), address, data.len())?;
        self.discrete_inputs[address as usize..address as usize + data.len()]
            .copy_from_slice(data);
        Ok(())
    }

    pub fn get_discrete_inputs(&self, address: u16, count: u16) -> Result<Vec<bool>> {
        Self::check_range(self.discrete_inputs.len(), address, count as usize)?;
        Ok(self.discrete_inputs[address as usize..address as usize + count as usize].to_vec())
    }
}

// ============================================================================
// PDU servicing
// ============================================================================

/// Peer write observed while servicing a request
struct ObservedWrite {
    address: u16,
    values: Vec<u16>,
}

fn exception_pdu(function_code: u8, code: u8) -> Vec<u8> {
    vec![function_code | 0x80, code]
}

fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| bytes[i / 8] & (1 << (i % 8)) != 0)
        .collect()
}

/// Service one request PDU against the bank.
///
/// Returns the response PDU plus any peer write to report. Unknown function
/// codes answer exception 01, out-of-range addresses exception 02,
/// malformed counts exception 03.
fn process_pdu(bank: &mut RegisterBank, pdu: &[u8]) -> (Vec<u8>, Option<ObservedWrite>) {
    let Some(&function_code) = pdu.first() else {
        return (exception_pdu(0, exception::ILLEGAL_FUNCTION), None);
    };

    let addr_qty = |pdu: &[u8]| -> Option<(u16, u16)> {
        if pdu.len() < 5 {
            return None;
        }
        Some((
            u16::from_be_bytes([pdu[1], pdu[2]]),
            u16::from_be_bytes([pdu[3], pdu[4]]),
        ))
    };

    match function_code {
        // Read Coils / Read Discrete Inputs
        0x01 | 0x02 => {
            let Some((address, quantity)) = addr_qty(pdu) else {
                return (
                    exception_pdu(function_code, exception::ILLEGAL_DATA_VALUE),
                    None,
                );
            };
            if quantity == 0 || quantity > 2000 {
                return (
                    exception_pdu(function_code, exception::ILLEGAL_DATA_VALUE),
                    None,
                );
            }
            let bits = if function_code == 0x01 {
                bank.get_coils(address, quantity)
            } else {
                bank.get_discrete_inputs(address, quantity)
            };
            match bits {
                Ok(bits) => {
                    let bytes = pack_bits(&bits);
                    let mut response = vec![function_code, bytes.len() as u8];
                    response.extend_from_slice(&bytes);
                    (response, None)
                },
                Err(_) => (
                    exception_pdu(function_code, exception::ILLEGAL_DATA_ADDRESS),
                    None,
                ),
            }
        },

        // Read Holding Registers / Read Input Registers
        0x03 | 0x04 => {
            let Some((address, quantity)) = addr_qty(pdu) else {
                return (
                    exception_pdu(function_code, exception::ILLEGAL_DATA_VALUE),
                    None,
                );
            };
            if quantity == 0 || quantity > 125 {
                return (
                    exception_pdu(function_code, exception::ILLEGAL_DATA_VALUE),
                    None,
                );
            }
            let registers = if function_code == 0x03 {
                bank.get_holding_registers(address, quantity)
            } else {
                bank.get_input_registers(address, quantity)
            };
            match registers {
                Ok(registers) => {
                    let mut response = vec![function_code, (registers.len() * 2) as u8];
                    for reg in registers {
                        response.extend_from_slice(&reg.to_be_bytes());
                    }
                    (response, None)
                },
                Err(_) => (
                    exception_pdu(function_code, exception::ILLEGAL_DATA_ADDRESS),
                    None,
                ),
            }
        },

        // Write Single Coil
        0x05 => {
            let Some((address, value)) = addr_qty(pdu) else {
                return (
                    exception_pdu(function_code, exception::ILLEGAL_DATA_VALUE),
                    None,
                );
            };
            if value != 0xFF00 && value != 0x0000 {
                return (
                    exception_pdu(function_code, exception::ILLEGAL_DATA_VALUE),
                    None,
                );
            }
            match bank.set_coils(address, &[value == 0xFF00]) {
                Ok(()) => (pdu[..5].to_vec(), None),
                Err(_) => (
                    exception_pdu(function_code, exception::ILLEGAL_DATA_ADDRESS),
                    None,
                ),
            }
        },

        // Write Single Register
        0x06 => {
            let Some((address, value)) = addr_qty(pdu) else {
                return (
                    exception_pdu(function_code, exception::ILLEGAL_DATA_VALUE),
                    None,
                );
            };
            match bank.set_holding_registers(address, &[value]) {
                Ok(()) => (
                    pdu[..5].to_vec(),
                    Some(ObservedWrite {
                        address,
                        values: vec![value],
                    }),
                ),
                Err(_) => (
                    exception_pdu(function_code, exception::ILLEGAL_DATA_ADDRESS),
                    None,
                ),
            }
        },

        // Write Multiple Coils
        0x0F => {
            let Some((address, quantity)) = addr_qty(pdu) else {
                return (
                    exception_pdu(function_code, exception::ILLEGAL_DATA_VALUE),
                    None,
                );
            };
            let byte_count = pdu.get(5).copied().unwrap_or(0) as usize;
            let expected_bytes = (quantity as usize).div_ceil(8);
            if quantity == 0
                || quantity > 1968
                || byte_count != expected_bytes
                || pdu.len() < 6 + byte_count
            {
                return (
                    exception_pdu(function_code, exception::ILLEGAL_DATA_VALUE),
                    None,
                );
            }
            let bits = unpack_bits(&pdu[6..6 + byte_count], quantity as usize);
            match bank.set_coils(address, &bits) {
                Ok(()) => (pdu[..5].to_vec(), None),
                Err(_) => (
                    exception_pdu(function_code, exception::ILLEGAL_DATA_ADDRESS),
                    None,
                ),
            }
        },

        // Write Multiple Registers
        0x10 => {
            let Some((address, quantity)) = addr_qty(pdu) else {
                return (
                    exception_pdu(function_code, exception::ILLEGAL_DATA_VALUE),
                    None,
                );
            };
            let byte_count = pdu.get(5).copied().unwrap_or(0) as usize;
            if quantity == 0
                || quantity > 123
                || byte_count != quantity as usize * 2
                || pdu.len() < 6 + byte_count
            {
                return (
                    exception_pdu(function_code, exception::ILLEGAL_DATA_VALUE),
                    None,
                );
            }
            let values: Vec<u16> = pdu[6..6 + byte_count]
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            match bank.set_holding_registers(address, &values) {
                Ok(()) => (
                    pdu[..5].to_vec(),
                    Some(ObservedWrite { address, values }),
                ),
                Err(_) => (
                    exception_pdu(function_code, exception::ILLEGAL_DATA_ADDRESS),
                    None,
                ),
            }
        },

        _ => (
            exception_pdu(function_code, exception::ILLEGAL_FUNCTION),
            None,
        ),
    }
}

// ============================================================================
// Server
// ============================================================================

/// Async Modbus/TCP server over a shared register bank
pub struct ModbusTcpServer {
    listen_ip: String,
    port: u16,
    max_connections: usize,
    bank: Arc<Mutex<RegisterBank>>,
    write_callback: Arc<Mutex<Option<WriteCallback>>>,
    running: Arc<AtomicBool>,
    connections: Arc<AtomicUsize>,
    accept_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ModbusTcpServer {
    /// Create a server over a fresh bank of `bank_size` cells per window
    pub fn new(listen_ip: &str, port: u16, max_connections: usize, bank_size: usize) -> Self {
        Self {
            listen_ip: listen_ip.to_string(),
            port,
            max_connections,
            bank: Arc::new(Mutex::new(RegisterBank::new(bank_size))),
            write_callback: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            connections: Arc::new(AtomicUsize::new(0)),
            accept_task: Mutex::new(None),
        }
    }

    /// Bind the listener and start the accept loop.
    ///
    /// A bind failure is returned to the caller; daemons treat it as fatal.
    pub async fn start(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let addr: SocketAddr = format!("{}:{}", self.listen_ip, self.port)
            .parse()
            .map_err(|e| ComLinkError::Config(format!("bad listen address: {}", e)))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ComLinkError::Connection(format!("bind {} failed: {}", addr, e)))?;

        info!(%addr, "Modbus TCP server listening");
        self.running.store(true, Ordering::SeqCst);

        let bank = self.bank.clone();
        let callback = self.write_callback.clone();
        let running = self.running.clone();
        let connections = self.connections.clone();
        let max_connections = self.max_connections;

        let task = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        if running.load(Ordering::SeqCst) {
                            warn!(%err, "accept failed");
                            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        }
                        continue;
                    },
                };

                if connections.load(Ordering::SeqCst) >= max_connections {
                    warn!(%peer, "connection limit reached, dropping client");
                    drop(stream);
                    continue;
                }

                debug!(%peer, "client connected");
                connections.fetch_add(1, Ordering::SeqCst);

                let bank = bank.clone();
                let callback = callback.clone();
                let running = running.clone();
                let connections = connections.clone();
                tokio::spawn(async move {
                    if let Err(err) = serve_connection(stream, &bank, &callback, &running).await {
                        debug!(%peer, %err, "client session ended");
                    }
                    connections.fetch_sub(1, Ordering::SeqCst);
                    debug!(%peer, "client disconnected");
                });
            }
        });
        *self
            .accept_task
            .lock()
            .expect("accept task mutex poisoned") = Some(task);

        Ok(())
    }

    /// Stop accepting and tear the accept loop down
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let task = self
            .accept_task
            .lock()
            .expect("accept task mutex poisoned")
            .take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        info!("Modbus TCP server stopped");
    }

    /// Whether the accept loop is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Currently connected client count
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Shared handle to the register bank
    pub fn bank(&self) -> Arc<Mutex<RegisterBank>> {
        self.bank.clone()
    }

    /// Write into the holding window (engine-side access)
    pub fn set_holding_registers(&self, address: u16, data: &[u16]) -> Result<()> {
        self.bank
            .lock()
            .expect("register bank mutex poisoned")
            .set_holding_registers(address, data)
    }

    /// Read from the holding window (engine-side access)
    pub fn get_holding_registers(&self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.bank
            .lock()
            .expect("register bank mutex poisoned")
            .get_holding_registers(address, count)
    }

    /// Register the peer-write callback
    pub fn set_write_callback(&self, callback: WriteCallback) {
        *self
            .write_callback
            .lock()
            .expect("callback mutex poisoned") = Some(callback);
    }
}

/// Service one client until it closes, errors, or the server stops
async fn serve_connection(
    mut stream: TcpStream,
    bank: &Mutex<RegisterBank>,
    callback: &Mutex<Option<WriteCallback>>,
    running: &AtomicBool,
) -> Result<()> {
    let mut header_buf = [0u8; MBAP_HEADER_LEN];

    while running.load(Ordering::SeqCst) {
        if stream.read_exact(&mut header_buf).await.is_err() {
            // Peer closed
            return Ok(());
        }
        let header = MbapHeader::parse(&header_buf)?;

        let mut pdu = vec![0u8; header.pdu_len()];
        stream.read_exact(&mut pdu).await?;

        // The image lock is held for the whole request service, so one
        // reply always reflects one coherent image state.
        let (response_pdu, observed) = {
            let mut bank = bank.lock().expect("register bank mutex poisoned");
            process_pdu(&mut bank, &pdu)
        };

        let frame = build_tcp_frame(header.transaction_id, header.unit_id, &response_pdu);
        stream.write_all(&frame).await?;

        // Callback fires after the reply, outside the image lock
        if let Some(write) = observed {
            let cb = callback
                .lock()
                .expect("callback mutex poisoned")
                .clone();
            if let Some(cb) = cb {
                cb(write.address, &write.values);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_request(fc: u8, address: u16, quantity: u16) -> Vec<u8> {
        let mut pdu = vec![fc];
        pdu.extend_from_slice(&address.to_be_bytes());
        pdu.extend_from_slice(&quantity.to_be_bytes());
        pdu
    }

    // ========== Register bank ==========

    #[test]
    fn test_bank_bounds_are_enforced() {
        let mut bank = RegisterBank::new(1000);
        assert!(bank.set_holding_registers(998, &[1, 2]).is_ok());
        assert!(bank.set_holding_registers(999, &[1, 2]).is_err());
        assert!(bank.get_holding_registers(1000, 1).is_err());
        assert!(bank.get_input_registers(0, 1001).is_err());

        // The failed write left the image untouched
        assert_eq!(bank.get_holding_registers(999, 1).unwrap(), vec![0]);
    }

    #[test]
    fn test_bank_windows_are_independent() {
        let mut bank = RegisterBank::new(10);
        bank.set_holding_registers(0, &[7]).unwrap();
        bank.set_input_registers(0, &[9]).unwrap();
        bank.set_coils(0, &[true]).unwrap();

        assert_eq!(bank.get_holding_registers(0, 1).unwrap(), vec![7]);
        assert_eq!(bank.get_input_registers(0, 1).unwrap(), vec![9]);
        assert_eq!(bank.get_coils(0, 1).unwrap(), vec![true]);
        assert_eq!(bank.get_discrete_inputs(0, 1).unwrap(), vec![false]);
    }

    // ========== PDU servicing ==========

    #[test]
    fn test_fc3_reads_holding_registers() {
        let mut bank = RegisterBank::new(100);
        bank.set_holding_registers(0, &[0x3FC0, 0x0000, 0x1234]).unwrap();

        let (response, observed) = process_pdu(&mut bank, &read_request(0x03, 0, 3));
        assert!(observed.is_none());
        assert_eq!(
            response,
            vec![0x03, 6, 0x3F, 0xC0, 0x00, 0x00, 0x12, 0x34]
        );
    }

    #[test]
    fn test_fc6_writes_and_reports() {
        let mut bank = RegisterBank::new(100);
        let pdu = read_request(0x06, 5, 0xBEEF);

        let (response, observed) = process_pdu(&mut bank, &pdu);
        assert_eq!(response, pdu);
        let write = observed.expect("write observed");
        assert_eq!(write.address, 5);
        assert_eq!(write.values, vec![0xBEEF]);
        assert_eq!(bank.get_holding_registers(5, 1).unwrap(), vec![0xBEEF]);
    }

    #[test]
    fn test_fc16_writes_block() {
        let mut bank = RegisterBank::new(100);
        let mut pdu = read_request(0x10, 10, 2);
        pdu.push(4);
        pdu.extend_from_slice(&[0x41, 0x70, 0x00, 0x00]);

        let (response, observed) = process_pdu(&mut bank, &pdu);
        assert_eq!(response, &pdu[..5]);
        let write = observed.expect("write observed");
        assert_eq!(write.address, 10);
        assert_eq!(write.values, vec![0x4170, 0x0000]);
        assert_eq!(
            bank.get_holding_registers(10, 2).unwrap(),
            vec![0x4170, 0x0000]
        );
    }

    #[test]
    fn test_unknown_function_answers_exception_01() {
        let mut bank = RegisterBank::new(100);
        let (response, _) = process_pdu(&mut bank, &read_request(0x2B, 0, 1));
        assert_eq!(response, vec![0xAB, exception::ILLEGAL_FUNCTION]);
    }

    #[test]
    fn test_out_of_range_answers_exception_02() {
        let mut bank = RegisterBank::new(100);
        let (response, _) = process_pdu(&mut bank, &read_request(0x03, 99, 2));
        assert_eq!(response, vec![0x83, exception::ILLEGAL_DATA_ADDRESS]);

        let (response, _) = process_pdu(&mut bank, &read_request(0x06, 100, 1));
        assert_eq!(response, vec![0x86, exception::ILLEGAL_DATA_ADDRESS]);
    }

    #[test]
    fn test_bad_quantity_answers_exception_03() {
        let mut bank = RegisterBank::new(1000);
        let (response, _) = process_pdu(&mut bank, &read_request(0x03, 0, 126));
        assert_eq!(response, vec![0x83, exception::ILLEGAL_DATA_VALUE]);

        let (response, _) = process_pdu(&mut bank, &read_request(0x03, 0, 0));
        assert_eq!(response, vec![0x83, exception::ILLEGAL_DATA_VALUE]);
    }

    #[test]
    fn test_fc5_coil_write() {
        let mut bank = RegisterBank::new(100);
        let (response, _) = process_pdu(&mut bank, &read_request(0x05, 3, 0xFF00));
        assert_eq!(response, read_request(0x05, 3, 0xFF00));
        assert_eq!(bank.get_coils(3, 1).unwrap(), vec![true]);

        let (response, _) = process_pdu(&mut bank, &read_request(0x05, 3, 0x1234));
        assert_eq!(response, vec![0x85, exception::ILLEGAL_DATA_VALUE]);
    }

    #[test]
    fn test_fc1_bit_packing() {
        let mut bank = RegisterBank::new(100);
        bank.set_coils(0, &[true, false, true, true]).unwrap();

        let (response, _) = process_pdu(&mut bank, &read_request(0x01, 0, 4));
        // bits LSB-first: 1,0,1,1 -> 0b1101
        assert_eq!(response, vec![0x01, 1, 0x0D]);
    }

    #[test]
    fn test_fc15_roundtrip() {
        let mut bank = RegisterBank::new(100);
        let mut pdu = read_request(0x0F, 2, 10);
        pdu.push(2);
        pdu.extend_from_slice(&[0b0000_0101, 0b0000_0010]);

        let (response, _) = process_pdu(&mut bank, &pdu);
        assert_eq!(response, &pdu[..5]);
        assert_eq!(
            bank.get_coils(2, 10).unwrap(),
            vec![true, false, true, false, false, false, false, false, false, true]
        );
    }

    // ========== Server lifecycle ==========

    #[tokio::test]
    async fn test_server_start_stop() {
        let server = ModbusTcpServer::new("127.0.0.1", 0, 4, 100);
        // Port 0 lets the OS choose; we only exercise lifecycle here
        server.start().await.expect("server starts");
        assert!(server.is_running());
        server.stop().await;
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_server_bind_failure_is_error() {
        let server = ModbusTcpServer::new("not an ip", 502, 4, 100);
        assert!(server.start().await.is_err());
    }
}
