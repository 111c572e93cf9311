//! Message types passed from the acquisition worker to the controller.
//!
//! Events travel over one channel per run, so they arrive in the order the
//! engine emitted them: every pixel of the run in raster order, then exactly
//! one `Finished`.

use std::time::Duration;

use semscan_core::{Error, PixelUpdate};

/// Messages sent from the acquisition worker to the controller.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A pixel dwell completed.
    Pixel(PixelUpdate),

    /// The run reached a terminal state. Nothing follows it.
    Finished(ScanReport),
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanStatus {
    /// Every pixel was acquired.
    Completed,
    /// Cancellation was observed before the raster was exhausted.
    Cancelled,
    /// A device error ended the run.
    Failed(Error),
}

/// Payload of the completion notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    /// Controller-assigned run number.
    pub run_id: u64,
    /// Terminal status.
    pub status: ScanStatus,
    /// Pixel updates emitted.
    pub pixels_acquired: usize,
    /// Pixels in the full raster.
    pub total_pixels: usize,
    /// Wall time from start to terminal state.
    pub elapsed: Duration,
    /// First error raised while zeroing the outputs, if any.
    pub shutdown_error: Option<Error>,
}

impl ScanReport {
    /// Returns true if the run acquired the whole raster.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == ScanStatus::Completed
    }

    /// Returns true if the run ended on a device error.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.status, ScanStatus::Failed(_))
    }
}
