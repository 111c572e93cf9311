//! Error types for semscan-core.

use thiserror::Error;

use crate::device::ChannelId;

/// Result type alias for semscan operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for scan configuration, device access and image updates.
///
/// Errors are cloneable so a failed run can carry its cause inside the
/// completion report delivered to the display side.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Scan configuration rejected before any hardware I/O.
    #[error("invalid scan parameters: {0}")]
    InvalidParameters(String),

    /// Commanded value outside a channel's configured safety bounds.
    #[error("value {value} outside [{min}, {max}] on channel {channel}")]
    OutOfRange {
        channel: ChannelId,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Failure to write to or read from hardware.
    #[error("device I/O error: {0}")]
    DeviceIo(String),

    /// Pixel address outside the image. Always an internal bug.
    #[error("pixel ({row}, {col}) outside {resolution}x{resolution} image")]
    IndexOutOfRange {
        row: usize,
        col: usize,
        resolution: usize,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    /// Whether retrying the same operation may succeed.
    ///
    /// Only device I/O failures qualify; a bounds rejection repeats
    /// identically on every attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::DeviceIo(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::DeviceIo(err.to_string())
    }
}
