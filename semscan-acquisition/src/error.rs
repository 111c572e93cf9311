//! Acquisition error types.

use thiserror::Error;

/// Result type for acquisition operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Acquisition error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] semscan_core::Error),

    /// The acquisition thread panicked; its devices were lost with it.
    #[error("acquisition worker panicked")]
    WorkerPanicked,

    /// No devices to lend to a new run.
    #[error("scan devices unavailable after a failed run")]
    DevicesUnavailable,
}
