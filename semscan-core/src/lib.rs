//! semscan-core: Core traits and types for raster-scan imaging.
//!
//! This crate provides the foundational abstractions shared by the
//! acquisition engine and the device drivers: scan parameters, the raster
//! pattern generator, the image accumulator, and the capability traits for
//! beam deflection and detector sampling.
//!

pub mod device;
pub mod error;
pub mod image;
pub mod params;
pub mod pattern;
pub mod pixel;

pub use device::{AxisChannels, ChannelBounds, ChannelId, DeflectionActuator, DetectorSampler};
pub use error::{Error, Result};
pub use image::{Orientation, ScanImage};
pub use params::{ScanParameters, MAX_SAMPLES};
pub use pattern::{CoordinateSequence, ScanPattern, ScanPatternGenerator};
pub use pixel::PixelUpdate;
