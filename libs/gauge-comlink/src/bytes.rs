//! Byte and word order utilities
//!
//! Register-level conversions between Modbus 16-bit register arrays and
//! numeric types under the four orderings industrial devices actually ship.

mod byte_order;
mod conversions;

pub use byte_order::ByteOrder;
pub use conversions::{
    bytes_to_regs_4, bytes_to_regs_8, regs_to_bytes_4, regs_to_bytes_8, regs_to_f32, regs_to_f64,
    regs_to_i32, regs_to_u32,
};
