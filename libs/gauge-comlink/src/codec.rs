//! Typed register and byte-image codec
//!
//! Converts between Modbus 16-bit register windows and scalars, and between
//! S7 data-block byte images and scalars. S7 scalars are always big-endian
//! inside the DB.

use serde::{Deserialize, Serialize};

use crate::bytes::{
    bytes_to_regs_4, bytes_to_regs_8, regs_to_bytes_4, regs_to_bytes_8, ByteOrder,
};
use crate::error::{ComLinkError, Result};

/// Scalar data types carried by bridging rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Int16,
    Uint16,
    Int32,
    Uint32,
    /// IEEE-754 single precision over two registers
    Float32,
    /// IEEE-754 double precision over four registers
    Double,
    /// Single bit; one register on Modbus, one masked byte on S7
    Bit,
    /// Raw byte window, no scalar interpretation
    String,
}

impl DataType {
    /// Convert from the string spellings used in configuration files
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "int16" | "i16" => Some(Self::Int16),
            "uint16" | "u16" => Some(Self::Uint16),
            "int32" | "i32" => Some(Self::Int32),
            "uint32" | "u32" => Some(Self::Uint32),
            "float" | "float32" | "f32" => Some(Self::Float32),
            "double" | "float64" | "f64" => Some(Self::Double),
            "bit" | "bool" => Some(Self::Bit),
            "string" => Some(Self::String),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int16 => "int16",
            Self::Uint16 => "uint16",
            Self::Int32 => "int32",
            Self::Uint32 => "uint32",
            Self::Float32 => "float",
            Self::Double => "double",
            Self::Bit => "bit",
            Self::String => "string",
        }
    }

    /// Number of Modbus registers the type occupies
    pub fn register_count(&self) -> u16 {
        match self {
            Self::Int16 | Self::Uint16 | Self::Bit => 1,
            Self::Int32 | Self::Uint32 | Self::Float32 => 2,
            Self::Double => 4,
            Self::String => 0,
        }
    }

    /// Number of bytes the type occupies in an S7 data block
    pub fn byte_count(&self) -> usize {
        match self {
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Double => 8,
            Self::Bit => 1,
            Self::String => 0,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Clamp a value to the representable range of the target data type.
///
/// Prevents overflow when writing values that exceed the destination
/// register capacity (e.g. 70000 into a uint16 window).
pub fn clamp_to_data_type(value: f64, data_type: DataType) -> f64 {
    let (min, max): (f64, f64) = match data_type {
        DataType::Uint16 => (0.0, 65535.0),
        DataType::Int16 => (-32768.0, 32767.0),
        DataType::Uint32 => (0.0, 4294967295.0),
        DataType::Int32 => (-2147483648.0, 2147483647.0),
        DataType::Float32 => (f32::MIN as f64, f32::MAX as f64),
        DataType::Double => (f64::MIN, f64::MAX),
        // Bit and raw windows need no range clamping
        DataType::Bit | DataType::String => return value,
    };

    value.clamp(min, max)
}

// ============================================================================
// Modbus register window <-> scalar
// ============================================================================

fn take_2(registers: &[u16], data_type: DataType) -> Result<[u16; 2]> {
    if registers.len() < 2 {
        return Err(ComLinkError::DataConversion(format!(
            "Insufficient registers for {}: got {}",
            data_type,
            registers.len()
        )));
    }
    Ok([registers[0], registers[1]])
}

fn take_4(registers: &[u16], data_type: DataType) -> Result<[u16; 4]> {
    if registers.len() < 4 {
        return Err(ComLinkError::DataConversion(format!(
            "Insufficient registers for {}: got {}",
            data_type,
            registers.len()
        )));
    }
    Ok([registers[0], registers[1], registers[2], registers[3]])
}

/// Decode a register window to a scalar according to type and byte order
pub fn registers_to_value(
    registers: &[u16],
    data_type: DataType,
    byte_order: ByteOrder,
) -> Result<f64> {
    if registers.is_empty() {
        return Err(ComLinkError::DataConversion(
            "Empty register window".to_string(),
        ));
    }

    match data_type {
        DataType::Int16 => Ok(registers[0] as i16 as f64),
        DataType::Uint16 => Ok(registers[0] as f64),
        DataType::Bit => Ok(if registers[0] != 0 { 1.0 } else { 0.0 }),
        DataType::Int32 => {
            let bytes = regs_to_bytes_4(&take_2(registers, data_type)?, byte_order);
            Ok(i32::from_be_bytes(bytes) as f64)
        },
        DataType::Uint32 => {
            let bytes = regs_to_bytes_4(&take_2(registers, data_type)?, byte_order);
            Ok(u32::from_be_bytes(bytes) as f64)
        },
        DataType::Float32 => {
            let bytes = regs_to_bytes_4(&take_2(registers, data_type)?, byte_order);
            Ok(f32::from_be_bytes(bytes) as f64)
        },
        DataType::Double => {
            let bytes = regs_to_bytes_8(&take_4(registers, data_type)?, byte_order);
            Ok(f64::from_be_bytes(bytes))
        },
        DataType::String => Err(ComLinkError::NotSupported(
            "string windows have no scalar value".to_string(),
        )),
    }
}

/// Encode a scalar as a register window according to type and byte order
pub fn value_to_registers(
    value: f64,
    data_type: DataType,
    byte_order: ByteOrder,
) -> Result<Vec<u16>> {
    match data_type {
        DataType::Int16 => Ok(vec![value as i16 as u16]),
        DataType::Uint16 => Ok(vec![value as u16]),
        DataType::Bit => Ok(vec![u16::from(value != 0.0)]),
        DataType::Int32 => {
            let bytes = (value as i32).to_be_bytes();
            Ok(bytes_to_regs_4(&bytes, byte_order).to_vec())
        },
        DataType::Uint32 => {
            let bytes = (value as u32).to_be_bytes();
            Ok(bytes_to_regs_4(&bytes, byte_order).to_vec())
        },
        DataType::Float32 => {
            let bytes = (value as f32).to_be_bytes();
            Ok(bytes_to_regs_4(&bytes, byte_order).to_vec())
        },
        DataType::Double => {
            let bytes = value.to_be_bytes();
            Ok(bytes_to_regs_8(&bytes, byte_order).to_vec())
        },
        DataType::String => Err(ComLinkError::NotSupported(
            "string windows have no scalar value".to_string(),
        )),
    }
}

// ============================================================================
// S7 byte image <-> scalar
// ============================================================================

/// Encode a scalar as the big-endian byte image an S7 data block expects.
///
/// `Bit` is not handled here: BOOL writes require a read-modify-write of the
/// target byte and live with the S7 client.
pub fn value_to_s7_bytes(value: f64, data_type: DataType) -> Result<Vec<u8>> {
    match data_type {
        DataType::Int16 => Ok((value as i16).to_be_bytes().to_vec()),
        DataType::Uint16 => Ok((value as u16).to_be_bytes().to_vec()),
        DataType::Int32 => Ok((value as i32).to_be_bytes().to_vec()),
        DataType::Uint32 => Ok((value as u32).to_be_bytes().to_vec()),
        DataType::Float32 => Ok((value as f32).to_be_bytes().to_vec()),
        DataType::Double => Ok(value.to_be_bytes().to_vec()),
        DataType::Bit | DataType::String => Err(ComLinkError::NotSupported(format!(
            "{} has no direct S7 byte image",
            data_type
        ))),
    }
}

/// Decode an S7 big-endian byte image to a scalar
pub fn s7_bytes_to_value(bytes: &[u8], data_type: DataType) -> Result<f64> {
    let need = data_type.byte_count();
    if bytes.len() < need {
        return Err(ComLinkError::DataConversion(format!(
            "Insufficient bytes for {}: got {}, need {}",
            data_type,
            bytes.len(),
            need
        )));
    }

    match data_type {
        DataType::Int16 => Ok(i16::from_be_bytes([bytes[0], bytes[1]]) as f64),
        DataType::Uint16 => Ok(u16::from_be_bytes([bytes[0], bytes[1]]) as f64),
        DataType::Int32 => Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64),
        DataType::Uint32 => Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64),
        DataType::Float32 => {
            Ok(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64)
        },
        DataType::Double => Ok(f64::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ])),
        DataType::Bit => Ok(if bytes[0] != 0 { 1.0 } else { 0.0 }),
        DataType::String => Err(ComLinkError::NotSupported(
            "string windows have no scalar value".to_string(),
        )),
    }
}
