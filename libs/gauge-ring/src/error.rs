//! Shared-memory ring error types

use thiserror::Error;

/// Result type for ring operations
pub type Result<T> = std::result::Result<T, RingError>;

/// Errors raised by shared-memory ring management
#[derive(Debug, Error)]
pub enum RingError {
    /// Shared-memory region could not be created
    #[error("Failed to create shared memory {name}: {source}")]
    CreateFailed {
        name: String,
        source: nix::errno::Errno,
    },

    /// Shared-memory region could not be opened
    #[error("Failed to open shared memory {name}: {source}")]
    OpenFailed {
        name: String,
        source: nix::errno::Errno,
    },

    /// Region exists but has the wrong size
    #[error("Shared memory {name} has size {actual}, expected {expected}")]
    SizeMismatch {
        name: String,
        actual: usize,
        expected: usize,
    },

    /// Mapping the region failed
    #[error("Failed to map shared memory: {0}")]
    MapFailed(#[from] std::io::Error),
}
