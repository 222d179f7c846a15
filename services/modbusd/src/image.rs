//! Live-reading register image layout
//!
//! Holding registers served to Modbus clients:
//!
//! | Registers | Content |
//! |-----------|---------|
//! | 0-1       | thickness (IEEE-754 FP32, big-endian) |
//! | 2-5       | timestamp in ms (UInt64, big-endian)  |
//! | 6         | status word                           |
//! | 7         | sequence low word                     |

use gauge_ring::NormalizedRecord;

/// Number of holding registers in the live image
pub const IMAGE_SIZE: usize = 100;

/// Registers the live reading occupies
pub const IMAGE_REGS: usize = 8;

/// Encode one record into the image head
pub fn encode_record_image(record: &NormalizedRecord) -> [u16; IMAGE_REGS] {
    let mut regs = [0u16; IMAGE_REGS];

    let thickness_bits = record.thickness_mm.to_bits();
    regs[0] = (thickness_bits >> 16) as u16;
    regs[1] = (thickness_bits & 0xFFFF) as u16;

    let timestamp_ms = record.timestamp_ns / 1_000_000;
    regs[2] = ((timestamp_ms >> 48) & 0xFFFF) as u16;
    regs[3] = ((timestamp_ms >> 32) & 0xFFFF) as u16;
    regs[4] = ((timestamp_ms >> 16) & 0xFFFF) as u16;
    regs[5] = (timestamp_ms & 0xFFFF) as u16;

    regs[6] = record.status;
    regs[7] = (record.sequence & 0xFFFF) as u16;

    regs
}
