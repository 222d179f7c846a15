//! GaugeLink Communication Core Library
//!
//! Shared data-conversion machinery for the gateway daemons:
//!
//! - **Bytes Utilities**: byte/word order handling and register conversions
//! - **Codec**: typed register/scalar and S7 byte-image conversions
//! - **Transform**: per-rule scale/offset/clamp value transforms
//! - **Error**: unified error type for all protocol plumbing

pub mod bytes;
pub mod codec;
pub mod error;
pub mod transform;

// Re-export core types
pub use bytes::ByteOrder;
pub use codec::DataType;
pub use error::{ComLinkError, Result};
pub use transform::{Transform, TransformOp};
