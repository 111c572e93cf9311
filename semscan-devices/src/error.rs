//! Device error types.

use thiserror::Error;

/// Result type for device operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Device error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration document.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No device entry carries the requested lens name.
    #[error("no device entry for lens '{0}'")]
    UnknownLens(String),

    /// Unexpected reply from an instrument.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] semscan_core::Error),
}
