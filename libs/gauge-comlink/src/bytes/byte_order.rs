//! Unified byte order representation for cross-protocol data conversion

use serde::{Deserialize, Serialize};

/// Byte/word order for multi-register values.
///
/// # Naming Convention
///
/// Uses ABCD notation where A is the most significant byte of the value and
/// D the least significant. The layouts below give the register stream for a
/// 32-bit value (each register transmitted big-endian on the wire):
///
/// - `BigEndian`: `[AB, CD]` — network order, the Modbus default
/// - `LittleEndian`: `[CD, AB]` — word-swapped, common on Schneider PLCs
/// - `BigSwap`: `[BA, DC]` — bytes swapped inside each word
/// - `LittleSwap`: `[DC, BA]` — fully reversed byte stream
///
/// For the float `1.5` (`0x3FC00000`) the four encodings are
/// `[0x3FC0, 0x0000]`, `[0x0000, 0x3FC0]`, `[0xC03F, 0x0000]` and
/// `[0x0000, 0xC03F]` respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// ABCD register stream (most significant word first)
    BigEndian,
    /// CDAB register stream (words swapped)
    LittleEndian,
    /// BADC register stream (bytes swapped inside each word)
    BigSwap,
    /// DCBA register stream (fully reversed)
    LittleSwap,
}

impl ByteOrder {
    /// Convert from the string spellings used in configuration files
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "big_endian" | "be" | "abcd" => Some(Self::BigEndian),
            "little_endian" | "le" => Some(Self::LittleEndian),
            "big_swap" => Some(Self::BigSwap),
            "little_swap" => Some(Self::LittleSwap),
            _ => None,
        }
    }

    /// Configuration-file spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BigEndian => "big_endian",
            Self::LittleEndian => "little_endian",
            Self::BigSwap => "big_swap",
            Self::LittleSwap => "little_swap",
        }
    }

    /// Whether bytes are swapped inside each 16-bit word
    pub fn has_byte_swap(&self) -> bool {
        matches!(self, Self::BigSwap | Self::LittleSwap)
    }

    /// Whether 16-bit words are emitted least significant first
    pub fn has_word_swap(&self) -> bool {
        matches!(self, Self::LittleEndian | Self::LittleSwap)
    }
}

impl std::fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for ByteOrder {
    /// Default to big-endian (network byte order)
    fn default() -> Self {
        Self::BigEndian
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_valid() {
        assert_eq!(ByteOrder::from_str("big_endian"), Some(ByteOrder::BigEndian));
        assert_eq!(ByteOrder::from_str("BIG_ENDIAN"), Some(ByteOrder::BigEndian));
        assert_eq!(
            ByteOrder::from_str("little_endian"),
            Some(ByteOrder::LittleEndian)
        );
        assert_eq!(ByteOrder::from_str("big_swap"), Some(ByteOrder::BigSwap));
        assert_eq!(
            ByteOrder::from_str("little_swap"),
            Some(ByteOrder::LittleSwap)
        );
    }

    #[test]
    fn test_from_str_invalid() {
        assert_eq!(ByteOrder::from_str("invalid"), None);
        assert_eq!(ByteOrder::from_str(""), None);
    }

    #[test]
    fn test_serde_spelling() {
        let json = serde_json::to_string(&ByteOrder::BigSwap).unwrap();
        assert_eq!(json, "\"big_swap\"");
        let back: ByteOrder = serde_json::from_str("\"little_endian\"").unwrap();
        assert_eq!(back, ByteOrder::LittleEndian);
    }

    #[test]
    fn test_properties() {
        assert!(!ByteOrder::BigEndian.has_byte_swap());
        assert!(!ByteOrder::BigEndian.has_word_swap());
        assert!(ByteOrder::LittleEndian.has_word_swap());
        assert!(ByteOrder::BigSwap.has_byte_swap());
        assert!(ByteOrder::LittleSwap.has_byte_swap());
        assert!(ByteOrder::LittleSwap.has_word_swap());
    }

    #[test]
    fn test_default() {
        assert_eq!(ByteOrder::default(), ByteOrder::BigEndian);
    }
}
