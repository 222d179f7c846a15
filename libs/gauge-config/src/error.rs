//! Configuration error types

use thiserror::Error;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised by configuration loading and persistence
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File-level IO failure
    #[error("Config IO error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// Document did not parse
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Semantically invalid configuration
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
