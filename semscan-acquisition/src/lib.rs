//! semscan-acquisition: Raster-scan acquisition and scan lifecycle.
//!
//! - [`AcquisitionEngine`] runs the sample-by-sample loop on a worker
//!   thread: drive the deflection, read the detector, average each pixel
//!   dwell, stream pixel updates.
//! - [`ScanController`] owns the devices between runs, lends them to one
//!   engine at a time, relays engine events into the [`ScanImage`] and a
//!   [`DisplaySink`], and guarantees the outputs are zeroed when a run ends.
//!
//! [`ScanImage`]: semscan_core::ScanImage
#![warn(missing_docs)]

mod controller;
mod engine;
mod error;
mod message;
mod sink;

pub use controller::{RunState, ScanController};
pub use engine::{AcquisitionEngine, EngineState, SampleErrorPolicy};
pub use error::{Error, Result};
pub use message::{EngineEvent, ScanReport, ScanStatus};
pub use sink::{DisplaySink, RecordingSink, ScanProgress};

// Re-export the core types callers need to drive a scan
pub use semscan_core::{AxisChannels, PixelUpdate, ScanImage, ScanParameters};
