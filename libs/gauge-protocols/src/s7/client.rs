//! ISO-on-TCP S7 client
//!
//! Speaks RFC 1006 framing with a COTP connection handshake and the S7
//! communication-setup negotiation, then issues Read Var / Write Var jobs
//! against data blocks. Scalars inside a DB are always big-endian; BOOL
//! writes read-modify-write the target byte so sibling bits survive.

use std::time::Duration;

use gauge_comlink::{ComLinkError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

/// S7 protocol TCP port
const ISO_TCP_PORT: u16 = 102;

/// RFC 1006 version byte
const ISO_ID: u8 = 0x03;
/// S7 protocol id
const S7_ID: u8 = 0x32;
/// COTP connection request / confirm PDU types
const ISO_CONN_REQ: u8 = 0xE0;
const ISO_CONN_OK: u8 = 0xD0;
/// COTP end-of-transmission marker
const EOT: u8 = 0x80;

/// TPKT + COTP data header length
const TPKT_ISO_LEN: usize = 7;
/// COTP connection request telegram size
const ISO_CR_LEN: usize = 22;
/// PDU negotiation request/response telegram sizes
const ISO_PN_REQ_LEN: usize = 25;
const ISO_PN_RES_LEN: usize = 27;
/// PDU length requested during negotiation
const PDU_LEN_REQ: u16 = 480;

/// Data block area id
const S7_AREA_DB: u8 = 0x84;
/// Byte word length
const S7_WL_BYTE: u8 = 0x02;
/// Byte transport size in write jobs
const TS_RES_BYTE: u8 = 0x04;

/// Read/Write Var job header sizes
const READ_REQ_LEN: usize = 31;
const READ_RES_LEN: usize = 18;
const WRITE_RES_LEN: usize = 15;
/// Item return code offset inside the S7 part of a response
const RW_RES_OFFSET: usize = 14;

/// Item return codes
const RES_SUCCESS: u8 = 0xFF;
const RES_INVALID_ADDRESS: u8 = 0x05;
const RES_NOT_FOUND: u8 = 0x0A;

/// Connection type: programming device
const CT_PG: u16 = 0x0001;

/// Async S7 client bound to one PLC
pub struct S7Client {
    plc_ip: String,
    rack: u16,
    slot: u16,
    timeout_ms: u64,
    stream: Option<TcpStream>,
    pdu_length: u16,
}

impl S7Client {
    /// Create a disconnected client for `(ip, rack, slot)`
    pub fn new(plc_ip: &str, rack: u16, slot: u16) -> Self {
        Self {
            plc_ip: plc_ip.to_string(),
            rack,
            slot,
            timeout_ms: 2000,
            stream: None,
            pdu_length: 0,
        }
    }

    /// Change the operation timeout (applies to connect and jobs)
    pub fn set_timeout(&mut self, timeout_ms: u64) {
        if timeout_ms > 0 {
            self.timeout_ms = timeout_ms;
        }
    }

    /// Whether the session is established
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Negotiated PDU length, 0 while disconnected
    pub fn pdu_length(&self) -> u16 {
        self.pdu_length
    }

    /// TCP connect + COTP handshake + S7 PDU negotiation
    pub async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let addr = format!("{}:{}", self.plc_ip, ISO_TCP_PORT);
        let duration = Duration::from_millis(self.timeout_ms);

        let mut stream = timeout(duration, TcpStream::connect(&addr))
            .await
            .map_err(|_| ComLinkError::Timeout(format!("connect to {} timed out", addr)))?
            .map_err(|e| ComLinkError::Connection(format!("connect to {} failed: {}", addr, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ComLinkError::Connection(e.to_string()))?;

        let local_tsap: u16 = 0x0100;
        let remote_tsap: u16 = (CT_PG << 8) + (self.rack * 0x20) + self.slot;

        // COTP connection request
        let iso_cr: [u8; ISO_CR_LEN] = [
            ISO_ID,
            0x00,
            0x00,
            ISO_CR_LEN as u8,
            0x11, // COTP length
            ISO_CONN_REQ,
            0x00,
            0x00, // dst reference
            0x00,
            0x01, // src reference
            0x00, // class + options
            0xC0,
            0x01,
            0x0A, // PDU max length
            0xC1,
            0x02,
            (local_tsap >> 8) as u8,
            (local_tsap & 0xFF) as u8,
            0xC2,
            0x02,
            (remote_tsap >> 8) as u8,
            (remote_tsap & 0xFF) as u8,
        ];

        timeout(duration, stream.write_all(&iso_cr))
            .await
            .map_err(|_| ComLinkError::Timeout("COTP request timed out".to_string()))??;

        let mut iso_resp = [0u8; ISO_CR_LEN];
        timeout(duration, stream.read_exact(&mut iso_resp))
            .await
            .map_err(|_| ComLinkError::Timeout("COTP response timed out".to_string()))?
            .map_err(|e| ComLinkError::Connection(e.to_string()))?;

        if iso_resp[5] != ISO_CONN_OK {
            return Err(ComLinkError::Connection(
                "ISO-on-TCP connection refused".to_string(),
            ));
        }

        // S7 communication-setup negotiation
        let s7_pn: [u8; ISO_PN_REQ_LEN] = [
            ISO_ID,
            0x00,
            0x00,
            0x19,
            0x02,
            0xF0,
            EOT,
            S7_ID,
            0x01,
            0x00,
            0x00,
            0x04,
            0x00,
            0x00,
            0x08,
            0x00,
            0x00,
            0xF0,
            0x00,
            0x00,
            0x01,
            0x00,
            0x01,
            (PDU_LEN_REQ >> 8) as u8,
            (PDU_LEN_REQ & 0xFF) as u8,
        ];

        timeout(duration, stream.write_all(&s7_pn))
            .await
            .map_err(|_| ComLinkError::Timeout("PDU negotiation timed out".to_string()))??;

        let mut pn_resp = [0u8; ISO_PN_RES_LEN];
        timeout(duration, stream.read_exact(&mut pn_resp))
            .await
            .map_err(|_| ComLinkError::Timeout("PDU negotiation timed out".to_string()))?
            .map_err(|e| ComLinkError::Connection(e.to_string()))?;

        if pn_resp[0] != ISO_ID || pn_resp[7] != S7_ID || pn_resp[17] != 0x00 {
            return Err(ComLinkError::Protocol(
                "S7 PDU negotiation failed".to_string(),
            ));
        }

        self.pdu_length = u16::from_be_bytes([pn_resp[25], pn_resp[26]]);
        if self.pdu_length == 0 {
            return Err(ComLinkError::Protocol(
                "PLC negotiated zero PDU length".to_string(),
            ));
        }

        info!(
            plc = %self.plc_ip,
            rack = self.rack,
            slot = self.slot,
            pdu_length = self.pdu_length,
            "S7 session established"
        );
        self.stream = Some(stream);
        Ok(())
    }

    /// Tear the session down
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            self.pdu_length = 0;
            debug!(plc = %self.plc_ip, "S7 session closed");
        }
    }

    /// Read `buffer.len()` bytes from `DB<db_number>` starting at `start`
    pub async fn read_db(&mut self, db_number: u16, start: u16, buffer: &mut [u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(ComLinkError::NotConnected);
        }
        let max_chunk = self.pdu_length.saturating_sub(READ_RES_LEN as u16) as usize;
        if max_chunk == 0 {
            return Err(ComLinkError::Protocol("PDU length too small".to_string()));
        }

        let mut offset = 0usize;
        while offset < buffer.len() {
            let chunk = (buffer.len() - offset).min(max_chunk);
            let data = self
                .read_db_chunk(db_number, start + offset as u16, chunk)
                .await;
            match data {
                Ok(data) => buffer[offset..offset + chunk].copy_from_slice(&data),
                Err(err) => {
                    // A low-level failure leaves the session unusable
                    if matches!(err, ComLinkError::Io(_) | ComLinkError::Timeout(_)) {
                        self.disconnect();
                    }
                    return Err(err);
                },
            }
            offset += chunk;
        }
        Ok(())
    }

    async fn read_db_chunk(&mut self, db_number: u16, start: u16, size: usize) -> Result<Vec<u8>> {
        let mut request: [u8; READ_REQ_LEN] = [
            ISO_ID, 0x00, // TPKT
            0x00, READ_REQ_LEN as u8, // telegram length
            0x02, 0xF0, EOT,  // COTP data header
            S7_ID, // S7 protocol id
            0x01, // job
            0x00, 0x00, // redundancy id
            0x05, 0x00, // PDU reference
            0x00, 0x0E, // parameter length (14)
            0x00, 0x00, // data length
            0x04, // function: Read Var
            0x01, // item count
            0x12, 0x0A, 0x10, // var specification
            S7_WL_BYTE,
            0x00, 0x00, // payload size, patched below
            0x00, 0x00, // DB number, patched below
            S7_AREA_DB,
            0x00, 0x00, 0x00, // 24-bit bit address, patched below
        ];
        request[23..25].copy_from_slice(&(size as u16).to_be_bytes());
        request[25..27].copy_from_slice(&db_number.to_be_bytes());
        let bit_address = (start as u32) << 3;
        request[28] = (bit_address >> 16) as u8;
        request[29] = (bit_address >> 8) as u8;
        request[30] = (bit_address & 0xFF) as u8;

        let response = self.transact(&request).await?;
        if response.len() < READ_RES_LEN + size {
            return Err(ComLinkError::Protocol(
                "truncated S7 read response".to_string(),
            ));
        }
        check_item_return_code(response[RW_RES_OFFSET])?;
        Ok(response[READ_RES_LEN..READ_RES_LEN + size].to_vec())
    }

    /// Write `data` into `DB<db_number>` starting at `start`
    pub async fn write_db(&mut self, db_number: u16, start: u16, data: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(ComLinkError::NotConnected);
        }
        let max_chunk = (self.pdu_length.saturating_sub(28)) as usize;
        if max_chunk == 0 {
            return Err(ComLinkError::Protocol("PDU length too small".to_string()));
        }

        let mut offset = 0usize;
        while offset < data.len() {
            let chunk_size = (data.len() - offset).min(max_chunk);
            let chunk = &data[offset..offset + chunk_size];
            let result = self
                .write_db_chunk(db_number, start + offset as u16, chunk)
                .await;
            if let Err(err) = result {
                if matches!(err, ComLinkError::Io(_) | ComLinkError::Timeout(_)) {
                    self.disconnect();
                }
                return Err(err);
            }
            offset += chunk_size;
        }
        Ok(())
    }

    async fn write_db_chunk(&mut self, db_number: u16, start: u16, chunk: &[u8]) -> Result<()> {
        let bits_payload = (chunk.len() << 3) as u16;
        let data_len = (chunk.len() + 4) as u16;
        let total_len = (35 + chunk.len()) as u16;
        let bit_address = (start as u32) << 3;

        let mut request = Vec::with_capacity(35 + chunk.len());
        request.extend_from_slice(&[
            ISO_ID, 0x00, // TPKT
            (total_len >> 8) as u8,
            (total_len & 0xFF) as u8,
            0x02, 0xF0, EOT,  // COTP data header
            S7_ID,
            0x01, // job
            0x00, 0x00, // redundancy id
            0x05, 0x00, // PDU reference
            0x00, 0x0E, // parameter length (14)
            (data_len >> 8) as u8,
            (data_len & 0xFF) as u8,
            0x05, // function: Write Var
            0x01, // item count
            0x12, 0x0A, 0x10, // var specification
            S7_WL_BYTE,
            (chunk.len() >> 8) as u8,
            (chunk.len() & 0xFF) as u8,
            (db_number >> 8) as u8,
            (db_number & 0xFF) as u8,
            S7_AREA_DB,
            (bit_address >> 16) as u8,
            (bit_address >> 8) as u8,
            (bit_address & 0xFF) as u8,
            0x00, // reserved
            TS_RES_BYTE,
            (bits_payload >> 8) as u8,
            (bits_payload & 0xFF) as u8,
        ]);
        request.extend_from_slice(chunk);

        let response = self.transact(&request).await?;
        if response.len() < WRITE_RES_LEN {
            return Err(ComLinkError::Protocol(
                "truncated S7 write response".to_string(),
            ));
        }
        check_item_return_code(response[RW_RES_OFFSET])
    }

    /// Send one job telegram and collect the S7 part of the response
    async fn transact(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let duration = Duration::from_millis(self.timeout_ms);
        let stream = self.stream.as_mut().ok_or(ComLinkError::NotConnected)?;

        timeout(duration, stream.write_all(request))
            .await
            .map_err(|_| ComLinkError::Timeout("S7 write timed out".to_string()))??;

        let mut header = [0u8; TPKT_ISO_LEN];
        timeout(duration, stream.read_exact(&mut header))
            .await
            .map_err(|_| ComLinkError::Timeout("S7 response timed out".to_string()))?
            .map_err(|e| ComLinkError::Io(e.to_string()))?;

        if header[0] != ISO_ID || header[4] != 0x02 || header[5] != 0xF0 {
            return Err(ComLinkError::Protocol("invalid ISO header".to_string()));
        }
        if header[6] != EOT {
            return Err(ComLinkError::Protocol(
                "fragmented ISO packet".to_string(),
            ));
        }

        let telegram_len = u16::from_be_bytes([header[2], header[3]]) as usize;
        if telegram_len <= TPKT_ISO_LEN || telegram_len - TPKT_ISO_LEN > PDU_LEN_REQ as usize {
            return Err(ComLinkError::Protocol("invalid ISO telegram".to_string()));
        }

        let mut body = vec![0u8; telegram_len - TPKT_ISO_LEN];
        timeout(duration, stream.read_exact(&mut body))
            .await
            .map_err(|_| ComLinkError::Timeout("S7 response timed out".to_string()))?
            .map_err(|e| ComLinkError::Io(e.to_string()))?;
        Ok(body)
    }

    // ========================================================================
    // Typed helpers (big-endian inside the DB)
    // ========================================================================

    /// Write an IEEE-754 REAL
    pub async fn write_db_real(&mut self, db: u16, offset: u16, value: f32) -> Result<()> {
        self.write_db(db, offset, &value.to_be_bytes()).await
    }

    /// Write a DWORD
    pub async fn write_db_dword(&mut self, db: u16, offset: u16, value: u32) -> Result<()> {
        self.write_db(db, offset, &value.to_be_bytes()).await
    }

    /// Write a WORD
    pub async fn write_db_word(&mut self, db: u16, offset: u16, value: u16) -> Result<()> {
        self.write_db(db, offset, &value.to_be_bytes()).await
    }

    /// Write an INT
    pub async fn write_db_int(&mut self, db: u16, offset: u16, value: i16) -> Result<()> {
        self.write_db(db, offset, &value.to_be_bytes()).await
    }

    /// Read a BOOL by masking `bit_offset` inside the target byte
    pub async fn read_db_bool(&mut self, db: u16, offset: u16, bit_offset: u8) -> Result<bool> {
        let mut buffer = [0u8; 1];
        self.read_db(db, offset, &mut buffer).await?;
        Ok(buffer[0] & (1 << bit_offset) != 0)
    }

    /// Write a BOOL with a read-modify-write of the target byte
    pub async fn write_db_bool(
        &mut self,
        db: u16,
        offset: u16,
        bit_offset: u8,
        value: bool,
    ) -> Result<()> {
        let mut buffer = [0u8; 1];
        self.read_db(db, offset, &mut buffer).await?;

        buffer[0] = apply_bit(buffer[0], bit_offset, value);
        self.write_db(db, offset, &buffer).await
    }
}

/// Set or clear one bit, leaving the siblings untouched
fn apply_bit(byte: u8, bit_offset: u8, value: bool) -> u8 {
    if value {
        byte | (1 << bit_offset)
    } else {
        byte & !(1 << bit_offset)
    }
}

fn check_item_return_code(code: u8) -> Result<()> {
    match code {
        RES_SUCCESS => Ok(()),
        RES_NOT_FOUND => Err(ComLinkError::Protocol(
            "S7 resource not found (missing DB?)".to_string(),
        )),
        RES_INVALID_ADDRESS => Err(ComLinkError::Protocol(
            "S7 invalid address (out of DB bounds or optimized DB)".to_string(),
        )),
        other => Err(ComLinkError::Protocol(format!(
            "S7 item error {:#04x}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_client_is_disconnected() {
        let client = S7Client::new("192.168.0.5", 0, 1);
        assert!(!client.is_connected());
        assert_eq!(client.pdu_length(), 0);
    }

    #[test]
    fn test_remote_tsap_derivation() {
        // Remote TSAP = connection type in the high byte, rack*0x20+slot low
        let rack = 0u16;
        let slot = 2u16;
        let remote_tsap = (CT_PG << 8) + (rack * 0x20) + slot;
        assert_eq!(remote_tsap, 0x0102);

        let rack = 1u16;
        let slot = 3u16;
        let remote_tsap = (CT_PG << 8) + (rack * 0x20) + slot;
        assert_eq!(remote_tsap, 0x0123);
    }

    #[test]
    fn test_bit_write_preserves_sibling_bits() {
        assert_eq!(apply_bit(0b1010_0101, 1, true), 0b1010_0111);
        assert_eq!(apply_bit(0b1010_0111, 1, false), 0b1010_0101);
        assert_eq!(apply_bit(0b1111_1111, 7, false), 0b0111_1111);
        assert_eq!(apply_bit(0x00, 0, true), 0x01);
        // Re-applying is idempotent
        assert_eq!(apply_bit(apply_bit(0x42, 3, true), 3, true), 0x4A);
    }

    #[test]
    fn test_item_return_codes() {
        assert!(check_item_return_code(RES_SUCCESS).is_ok());
        assert!(check_item_return_code(RES_NOT_FOUND).is_err());
        assert!(check_item_return_code(RES_INVALID_ADDRESS).is_err());
        assert!(check_item_return_code(0x42).is_err());
    }

    #[tokio::test]
    async fn test_jobs_require_connection() {
        let mut client = S7Client::new("192.0.2.1", 0, 1);
        let mut buf = [0u8; 4];
        assert!(matches!(
            client.read_db(1, 0, &mut buf).await,
            Err(ComLinkError::NotConnected)
        ));
        assert!(matches!(
            client.write_db(1, 0, &[0; 4]).await,
            Err(ComLinkError::NotConnected)
        ));
    }
}
