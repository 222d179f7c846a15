//! Numeric type conversions with byte order support
//!
//! Register arrays (u16) are normalized to the canonical big-endian byte
//! sequence of the value, then reinterpreted. Encoding is the exact inverse
//! of decoding for every ordering.

use super::ByteOrder;

// ============================================================================
// Register to canonical bytes
// ============================================================================

/// Normalize 2 registers laid out in `order` to the canonical big-endian
/// 4-byte sequence of the value.
pub fn regs_to_bytes_4(regs: &[u16; 2], order: ByteOrder) -> [u8; 4] {
    let [h0, h1] = [regs[0].to_be_bytes(), regs[1].to_be_bytes()];

    match order {
        ByteOrder::BigEndian => [h0[0], h0[1], h1[0], h1[1]], // AB CD
        ByteOrder::LittleEndian => [h1[0], h1[1], h0[0], h0[1]], // CD AB
        ByteOrder::BigSwap => [h0[1], h0[0], h1[1], h1[0]],   // BA DC
        ByteOrder::LittleSwap => [h1[1], h1[0], h0[1], h0[0]], // DC BA
    }
}

/// Normalize 4 registers laid out in `order` to the canonical big-endian
/// 8-byte sequence of the value.
pub fn regs_to_bytes_8(regs: &[u16; 4], order: ByteOrder) -> [u8; 8] {
    let [h0, h1, h2, h3] = [
        regs[0].to_be_bytes(),
        regs[1].to_be_bytes(),
        regs[2].to_be_bytes(),
        regs[3].to_be_bytes(),
    ];

    match order {
        ByteOrder::BigEndian => [
            h0[0], h0[1], h1[0], h1[1], h2[0], h2[1], h3[0], h3[1],
        ],
        ByteOrder::LittleEndian => [
            h3[0], h3[1], h2[0], h2[1], h1[0], h1[1], h0[0], h0[1],
        ],
        ByteOrder::BigSwap => [
            h0[1], h0[0], h1[1], h1[0], h2[1], h2[0], h3[1], h3[0],
        ],
        ByteOrder::LittleSwap => [
            h3[1], h3[0], h2[1], h2[0], h1[1], h1[0], h0[1], h0[0],
        ],
    }
}

// ============================================================================
// Canonical bytes to registers
// ============================================================================

/// Lay the canonical big-endian 4-byte sequence of a value out as 2
/// registers in `order`. Inverse of [`regs_to_bytes_4`].
pub fn bytes_to_regs_4(bytes: &[u8; 4], order: ByteOrder) -> [u16; 2] {
    let [a, b, c, d] = *bytes;
    let w = |hi: u8, lo: u8| u16::from_be_bytes([hi, lo]);

    match order {
        ByteOrder::BigEndian => [w(a, b), w(c, d)],
        ByteOrder::LittleEndian => [w(c, d), w(a, b)],
        ByteOrder::BigSwap => [w(b, a), w(d, c)],
        ByteOrder::LittleSwap => [w(d, c), w(b, a)],
    }
}

/// Lay the canonical big-endian 8-byte sequence of a value out as 4
/// registers in `order`. Inverse of [`regs_to_bytes_8`].
pub fn bytes_to_regs_8(bytes: &[u8; 8], order: ByteOrder) -> [u16; 4] {
    let [a, b, c, d, e, f, g, h] = *bytes;
    let w = |hi: u8, lo: u8| u16::from_be_bytes([hi, lo]);

    match order {
        ByteOrder::BigEndian => [w(a, b), w(c, d), w(e, f), w(g, h)],
        ByteOrder::LittleEndian => [w(g, h), w(e, f), w(c, d), w(a, b)],
        ByteOrder::BigSwap => [w(b, a), w(d, c), w(f, e), w(h, g)],
        ByteOrder::LittleSwap => [w(h, g), w(f, e), w(d, c), w(b, a)],
    }
}

// ============================================================================
// Register to numeric type
// ============================================================================

/// Convert 2 registers to f32
pub fn regs_to_f32(regs: &[u16; 2], order: ByteOrder) -> f32 {
    f32::from_be_bytes(regs_to_bytes_4(regs, order))
}

/// Convert 4 registers to f64
pub fn regs_to_f64(regs: &[u16; 4], order: ByteOrder) -> f64 {
    f64::from_be_bytes(regs_to_bytes_8(regs, order))
}

/// Convert 2 registers to u32
pub fn regs_to_u32(regs: &[u16; 2], order: ByteOrder) -> u32 {
    u32::from_be_bytes(regs_to_bytes_4(regs, order))
}

/// Convert 2 registers to i32
pub fn regs_to_i32(regs: &[u16; 2], order: ByteOrder) -> i32 {
    i32::from_be_bytes(regs_to_bytes_4(regs, order))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERS: [ByteOrder; 4] = [
        ByteOrder::BigEndian,
        ByteOrder::LittleEndian,
        ByteOrder::BigSwap,
        ByteOrder::LittleSwap,
    ];

    #[test]
    fn test_float_encoding_matrix() {
        // 1.5 in IEEE 754: 0x3FC00000
        let bytes = 1.5f32.to_be_bytes();

        assert_eq!(bytes_to_regs_4(&bytes, ByteOrder::BigEndian), [0x3FC0, 0x0000]);
        assert_eq!(
            bytes_to_regs_4(&bytes, ByteOrder::LittleEndian),
            [0x0000, 0x3FC0]
        );
        assert_eq!(bytes_to_regs_4(&bytes, ByteOrder::BigSwap), [0xC03F, 0x0000]);
        assert_eq!(
            bytes_to_regs_4(&bytes, ByteOrder::LittleSwap),
            [0x0000, 0xC03F]
        );
    }

    #[test]
    fn test_regs_to_bytes_4_all_orders() {
        // Value 0x12345678 laid out per ordering
        assert_eq!(
            regs_to_bytes_4(&[0x1234, 0x5678], ByteOrder::BigEndian),
            [0x12, 0x34, 0x56, 0x78]
        );
        assert_eq!(
            regs_to_bytes_4(&[0x5678, 0x1234], ByteOrder::LittleEndian),
            [0x12, 0x34, 0x56, 0x78]
        );
        assert_eq!(
            regs_to_bytes_4(&[0x3412, 0x7856], ByteOrder::BigSwap),
            [0x12, 0x34, 0x56, 0x78]
        );
        assert_eq!(
            regs_to_bytes_4(&[0x7856, 0x3412], ByteOrder::LittleSwap),
            [0x12, 0x34, 0x56, 0x78]
        );
    }

    #[test]
    fn test_roundtrip_4_all_orders() {
        let bytes = 0xDEADBEEFu32.to_be_bytes();
        for order in ORDERS {
            let regs = bytes_to_regs_4(&bytes, order);
            assert_eq!(regs_to_bytes_4(&regs, order), bytes, "order {}", order);
        }
    }

    #[test]
    fn test_roundtrip_8_all_orders() {
        let bytes = 0x0102030405060708u64.to_be_bytes();
        for order in ORDERS {
            let regs = bytes_to_regs_8(&bytes, order);
            assert_eq!(regs_to_bytes_8(&regs, order), bytes, "order {}", order);
        }
    }

    #[test]
    fn test_regs_to_f32() {
        // 25.0 in IEEE 754: 0x41C80000
        let value = regs_to_f32(&[0x41C8, 0x0000], ByteOrder::BigEndian);
        assert!((value - 25.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_regs_to_u32() {
        assert_eq!(regs_to_u32(&[0x1234, 0x5678], ByteOrder::BigEndian), 0x12345678);
        assert_eq!(
            regs_to_u32(&[0x1234, 0x5678], ByteOrder::LittleEndian),
            0x56781234
        );
    }
}
