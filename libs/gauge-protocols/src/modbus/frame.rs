//! Modbus frame handling
//!
//! MBAP framing for TCP and CRC-16 framing for RTU. The master and server
//! share these helpers; request tracking stays with the caller.

use gauge_comlink::{ComLinkError, Result};

use super::pdu::ModbusPdu;
use super::MBAP_HEADER_LEN;

/// Modbus TCP MBAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Transaction identifier, echoed in the response
    pub transaction_id: u16,
    /// Protocol identifier, fixed to 0
    pub protocol_id: u16,
    /// Unit id + PDU length
    pub length: u16,
    /// Unit identifier (slave ID)
    pub unit_id: u8,
}

impl MbapHeader {
    /// Parse the 7 header bytes
    pub fn parse(bytes: &[u8; MBAP_HEADER_LEN]) -> Result<Self> {
        let header = Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            unit_id: bytes[6],
        };

        if header.protocol_id != 0 {
            return Err(ComLinkError::Protocol(format!(
                "Invalid protocol ID: expected 0, got {}",
                header.protocol_id
            )));
        }
        if header.length < 2 || header.length as usize > super::pdu::MAX_PDU_SIZE + 1 {
            return Err(ComLinkError::Protocol(format!(
                "Invalid MBAP length: {}",
                header.length
            )));
        }

        Ok(header)
    }

    /// Encode the header for a PDU of `pdu_len` bytes
    pub fn encode(transaction_id: u16, unit_id: u8, pdu_len: usize) -> [u8; MBAP_HEADER_LEN] {
        let length = (pdu_len + 1) as u16;
        let mut bytes = [0u8; MBAP_HEADER_LEN];
        bytes[0..2].copy_from_slice(&transaction_id.to_be_bytes());
        // bytes 2..4: protocol_id = 0
        bytes[4..6].copy_from_slice(&length.to_be_bytes());
        bytes[6] = unit_id;
        bytes
    }

    /// PDU byte count following this header
    pub fn pdu_len(&self) -> usize {
        self.length as usize - 1
    }
}

/// Build a complete TCP frame (MBAP + PDU)
pub fn build_tcp_frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    frame.extend_from_slice(&MbapHeader::encode(transaction_id, unit_id, pdu.len()));
    frame.extend_from_slice(pdu);
    frame
}

/// Build a complete RTU frame (`unit_id` + PDU + CRC)
pub fn build_rtu_frame(unit_id: u8, pdu: &ModbusPdu) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + pdu.len() + 2);
    frame.push(unit_id);
    frame.extend_from_slice(pdu.as_slice());

    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Parse and CRC-check an RTU frame, returning `(unit_id, pdu)`
pub fn parse_rtu_frame(data: &[u8]) -> Result<(u8, ModbusPdu)> {
    if data.len() < 4 {
        return Err(ComLinkError::Protocol("RTU frame too short".to_string()));
    }

    let frame_len = data.len();
    let unit_id = data[0];
    let pdu_bytes = &data[1..frame_len - 2];
    let received_crc = u16::from_le_bytes([data[frame_len - 2], data[frame_len - 1]]);

    let calculated_crc = crc16(&data[..frame_len - 2]);
    if received_crc != calculated_crc {
        return Err(ComLinkError::Protocol(format!(
            "CRC mismatch: expected 0x{calculated_crc:04X}, got 0x{received_crc:04X}"
        )));
    }

    let pdu = ModbusPdu::from_slice(pdu_bytes)?;
    Ok((unit_id, pdu))
}

/// Calculate the Modbus RTU CRC-16 checksum
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// Get exception description
pub fn exception_description(exception_code: u8) -> &'static str {
    match exception_code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Slave Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Slave Device Busy",
        0x07 => "Negative Acknowledge",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::pdu::PduBuilder;

    #[test]
    fn test_crc16_reference_vectors() {
        // The placeholder thickness query: 01 03 00 00 00 02 -> CRC C4 0B on the wire
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]), 0x0BC4);
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), 0x0A84);
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_rtu_frame_roundtrip() {
        let pdu = PduBuilder::build_read_request(0x03, 0x0000, 0x0002).unwrap();
        let frame = build_rtu_frame(0x01, &pdu);
        assert_eq!(
            frame,
            vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]
        );

        let (unit, parsed) = parse_rtu_frame(&frame).unwrap();
        assert_eq!(unit, 0x01);
        assert_eq!(parsed.as_slice(), pdu.as_slice());
    }

    #[test]
    fn test_rtu_bad_crc_rejected() {
        let mut frame = build_rtu_frame(1, &PduBuilder::build_read_request(3, 0, 1).unwrap());
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(parse_rtu_frame(&frame).is_err());
    }

    #[test]
    fn test_rtu_short_frame_rejected() {
        assert!(parse_rtu_frame(&[0x01, 0x03, 0xAB]).is_err());
    }

    #[test]
    fn test_mbap_roundtrip() {
        let encoded = MbapHeader::encode(0x1234, 7, 5);
        let header = MbapHeader::parse(&encoded).unwrap();
        assert_eq!(header.transaction_id, 0x1234);
        assert_eq!(header.protocol_id, 0);
        assert_eq!(header.unit_id, 7);
        assert_eq!(header.pdu_len(), 5);
    }

    #[test]
    fn test_mbap_rejects_bad_protocol_id() {
        let mut encoded = MbapHeader::encode(1, 1, 5);
        encoded[3] = 0x01;
        assert!(MbapHeader::parse(&encoded).is_err());
    }

    #[test]
    fn test_tcp_frame_layout() {
        let pdu = PduBuilder::build_read_request(0x03, 0x0000, 0x0001).unwrap();
        let frame = build_tcp_frame(0x0001, 0x11, pdu.as_slice());
        assert_eq!(frame.len(), 12);
        assert_eq!(&frame[0..2], &[0x00, 0x01]); // transaction id
        assert_eq!(&frame[2..4], &[0x00, 0x00]); // protocol id
        assert_eq!(&frame[4..6], &[0x00, 0x06]); // length = pdu + unit
        assert_eq!(frame[6], 0x11); // unit id
        assert_eq!(&frame[7..], pdu.as_slice());
    }
}
