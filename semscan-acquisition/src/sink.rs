//! Display side of a scan.

use semscan_core::{PixelUpdate, ScanImage};

use crate::message::ScanReport;

/// Pixel progress of the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanProgress {
    /// Pixels received so far.
    pub done: usize,
    /// Pixels in the full raster.
    pub total: usize,
}

impl ScanProgress {
    /// Completion ratio in `[0, 1]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            (self.done as f32 / self.total as f32).min(1.0)
        }
    }
}

/// Receiver of scan updates, called on the controller's thread.
///
/// `image` is the accumulator right after the update was applied; sinks
/// that redraw on every pixel read it directly, throttled sinks redraw from
/// `on_progress`.
pub trait DisplaySink {
    /// A pixel was written to the image.
    fn on_pixel(&mut self, update: &PixelUpdate, image: &ScanImage);

    /// Throttled progress notification.
    fn on_progress(&mut self, _progress: ScanProgress, _image: &ScanImage) {}

    /// The run ended. Called exactly once per run, after outputs are zeroed.
    fn on_scan_completed(&mut self, report: &ScanReport);
}

impl DisplaySink for () {
    fn on_pixel(&mut self, _update: &PixelUpdate, _image: &ScanImage) {}

    fn on_scan_completed(&mut self, _report: &ScanReport) {}
}

impl<T: DisplaySink + ?Sized> DisplaySink for Box<T> {
    fn on_pixel(&mut self, update: &PixelUpdate, image: &ScanImage) {
        (**self).on_pixel(update, image);
    }

    fn on_progress(&mut self, progress: ScanProgress, image: &ScanImage) {
        (**self).on_progress(progress, image);
    }

    fn on_scan_completed(&mut self, report: &ScanReport) {
        (**self).on_scan_completed(report);
    }
}

/// Sink that keeps every notification it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    /// Pixel updates in arrival order.
    pub pixels: Vec<PixelUpdate>,
    /// Progress notifications in arrival order.
    pub progress: Vec<ScanProgress>,
    /// Completion reports in arrival order.
    pub completions: Vec<ScanReport>,
}

impl RecordingSink {
    /// Creates an empty recording sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&mut self) {
        self.pixels.clear();
        self.progress.clear();
        self.completions.clear();
    }
}

impl DisplaySink for RecordingSink {
    fn on_pixel(&mut self, update: &PixelUpdate, _image: &ScanImage) {
        self.pixels.push(*update);
    }

    fn on_progress(&mut self, progress: ScanProgress, _image: &ScanImage) {
        self.progress.push(progress);
    }

    fn on_scan_completed(&mut self, report: &ScanReport) {
        self.completions.push(report.clone());
    }
}
