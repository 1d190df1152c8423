//! Error types for the tile cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the tile cache
///
/// A missing tile is never an error: lookups return `None` and adding an
/// absent payload is a no-op.
#[derive(Error, Debug)]
pub enum Error {
    /// Out-of-range configuration value, rejected before any state change
    #[error("Invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    /// Legacy operation this cache does not implement
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration parse error
    #[error("Failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Prometheus registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl Error {
    /// Shorthand for an [`Error::InvalidArgument`]
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
