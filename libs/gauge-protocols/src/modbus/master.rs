//! Async Modbus RTU master
//!
//! One master per serial port. Reads are retried with a short pause between
//! attempts; all response frames are validated for slave id, function code
//! and CRC before any register leaves this module. Callers serialize access
//! through their own lock, the master itself is single-flight.

use std::time::Duration;

use gauge_comlink::{ComLinkError, Result};
use gauge_config::BridgeRtuConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::SerialStream;
use tracing::{debug, info, warn};

use super::frame::{build_rtu_frame, exception_description, parse_rtu_frame};
use super::pdu::PduBuilder;

/// Pause between read retries
const RETRY_PAUSE: Duration = Duration::from_millis(50);

/// Modbus RTU master over one serial port
pub struct RtuMaster {
    config: BridgeRtuConfig,
    stream: Option<SerialStream>,
}

impl RtuMaster {
    /// Create a disconnected master
    pub fn new(config: BridgeRtuConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    /// Open the serial port with the configured line parameters
    pub fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let builder = tokio_serial::new(&self.config.device, self.config.baudrate)
            .data_bits(parse_data_bits(self.config.data_bits))
            .stop_bits(parse_stop_bits(self.config.stop_bits))
            .parity(parse_parity(&self.config.parity))
            .timeout(Duration::from_millis(self.config.timeout_ms));

        let stream = SerialStream::open(&builder).map_err(|e| {
            ComLinkError::Connection(format!(
                "Failed to open RTU port {}: {}",
                self.config.device, e
            ))
        })?;

        info!(
            device = %self.config.device,
            baudrate = self.config.baudrate,
            "RTU master connected"
        );
        self.stream = Some(stream);
        Ok(())
    }

    /// Drop the serial port
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            debug!(device = %self.config.device, "RTU master disconnected");
        }
    }

    /// Whether the port is open
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// FC3: read holding registers
    pub async fn read_holding_registers(
        &mut self,
        slave_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        self.read_registers(0x03, slave_id, address, count).await
    }

    /// FC4: read input registers
    pub async fn read_input_registers(
        &mut self,
        slave_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        self.read_registers(0x04, slave_id, address, count).await
    }

    async fn read_registers(
        &mut self,
        function_code: u8,
        slave_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        if count == 0 || count > 125 {
            return Err(ComLinkError::Protocol(format!(
                "Register count out of range: {}",
                count
            )));
        }

        let pdu = PduBuilder::build_read_request(function_code, address, count)?;
        let frame = build_rtu_frame(slave_id, &pdu);
        // unit + fc + byte count + payload + crc
        let expected_len = 5 + 2 * count as usize;

        let attempts = self.config.retry_count.max(1);
        let mut last_error = ComLinkError::Internal("no attempt made".to_string());

        for attempt in 0..attempts {
            if attempt > 0 {
                debug!(attempt, slave_id, address, "retrying RTU read");
                tokio::time::sleep(RETRY_PAUSE).await;
            }

            match self.transact(&frame, expected_len).await {
                Ok(response) => {
                    return parse_read_response(&response, slave_id, function_code, count)
                },
                Err(err) => {
                    warn!(slave_id, address, %err, "RTU read failed");
                    last_error = err;
                },
            }
        }

        Err(last_error)
    }

    /// Send one frame and collect the response within the configured timeout
    async fn transact(&mut self, frame: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or(ComLinkError::NotConnected)?;

        debug!(tx = %hex::encode(frame), "RTU TX");
        stream.write_all(frame).await?;

        let mut buf: Vec<u8> = Vec::with_capacity(expected_len);
        let read_result = timeout(Duration::from_millis(self.config.timeout_ms), async {
            let mut chunk = [0u8; 64];
            loop {
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    return Err(ComLinkError::Connection(
                        "serial stream closed".to_string(),
                    ));
                }
                buf.extend_from_slice(&chunk[..n]);

                // Exception responses are always 5 bytes
                if buf.len() >= 5 && buf[1] & 0x80 != 0 {
                    return Ok(());
                }
                if buf.len() >= expected_len {
                    return Ok(());
                }
            }
        })
        .await;

        match read_result {
            Ok(Ok(())) => {
                debug!(rx = %hex::encode(&buf), "RTU RX");
                Ok(buf)
            },
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ComLinkError::Timeout(format!(
                "no RTU response within {} ms",
                self.config.timeout_ms
            ))),
        }
    }
}

/// Validate a read response frame and extract its registers
fn parse_read_response(
    response: &[u8],
    slave_id: u8,
    function_code: u8,
    count: u16,
) -> Result<Vec<u16>> {
    let (unit, pdu) = parse_rtu_frame(response)?;

    if unit != slave_id {
        return Err(ComLinkError::Protocol(format!(
            "Response from unexpected slave: {} (wanted {})",
            unit, slave_id
        )));
    }

    if pdu.is_exception() {
        let code = pdu.exception_code().unwrap_or(0);
        return Err(ComLinkError::Protocol(format!(
            "Modbus exception {:#04x}: {}",
            code,
            exception_description(code)
        )));
    }

    let data = pdu.as_slice();
    if data.first() != Some(&function_code) {
        return Err(ComLinkError::Protocol(format!(
            "Function code mismatch: expected {:#04x}, got {:#04x}",
            function_code,
            data.first().copied().unwrap_or(0)
        )));
    }

    let byte_count = *data
        .get(1)
        .ok_or_else(|| ComLinkError::Protocol("truncated read response".to_string()))?
        as usize;
    if byte_count != 2 * count as usize || data.len() < 2 + byte_count {
        return Err(ComLinkError::Protocol(format!(
            "Byte count mismatch: declared {}, expected {}",
            byte_count,
            2 * count
        )));
    }

    let registers = data[2..2 + byte_count]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    Ok(registers)
}

fn parse_parity(parity: &str) -> tokio_serial::Parity {
    match parity.to_uppercase().as_str() {
        "E" | "EVEN" => tokio_serial::Parity::Even,
        "O" | "ODD" => tokio_serial::Parity::Odd,
        _ => tokio_serial::Parity::None,
    }
}

fn parse_data_bits(bits: u8) -> tokio_serial::DataBits {
    match bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    }
}

fn parse_stop_bits(bits: u8) -> tokio_serial::StopBits {
    match bits {
        2 => tokio_serial::StopBits::Two,
        _ => tokio_serial::StopBits::One,
    }
}
