//! Per-run scan configuration.

use crate::device::ChannelBounds;
use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Largest accepted `resolution² × samples_per_pixel`.
///
/// Each axis of the generated pattern holds this many `f64`, so the cap
/// bounds a pattern at 1 GiB.
pub const MAX_SAMPLES: usize = 1 << 26;

/// Configuration of one raster scan.
///
/// The same value range drives both axes, and the image is square.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScanParameters {
    /// `(min, max)` of the deflection quantity (e.g. coil current in A).
    pub value_range: (f64, f64),
    /// Pixels per side.
    pub resolution: usize,
    /// Detector samples averaged into each pixel.
    pub samples_per_pixel: usize,
}

impl Default for ScanParameters {
    fn default() -> Self {
        Self {
            value_range: (0.0, 0.1),
            resolution: 64,
            samples_per_pixel: 1,
        }
    }
}

impl ScanParameters {
    /// Creates validated scan parameters.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameters`] if the configuration is unusable.
    pub fn new(value_range: (f64, f64), resolution: usize, samples_per_pixel: usize) -> Result<Self> {
        let params = Self {
            value_range,
            resolution,
            samples_per_pixel,
        };
        params.validate()?;
        Ok(params)
    }

    /// Sets the value range.
    #[must_use]
    pub fn with_value_range(mut self, min: f64, max: f64) -> Self {
        self.value_range = (min, max);
        self
    }

    /// Sets the resolution.
    #[must_use]
    pub fn with_resolution(mut self, resolution: usize) -> Self {
        self.resolution = resolution;
        self
    }

    /// Sets the number of samples per pixel.
    #[must_use]
    pub fn with_samples_per_pixel(mut self, samples_per_pixel: usize) -> Self {
        self.samples_per_pixel = samples_per_pixel;
        self
    }

    /// Checks the parameter invariants.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameters`] when the resolution or the
    /// sample count is zero, a range end is not finite, `min > max`, or the
    /// total sample count exceeds [`MAX_SAMPLES`].
    pub fn validate(&self) -> Result<()> {
        let (min, max) = self.value_range;
        if self.resolution == 0 {
            return Err(Error::InvalidParameters(
                "resolution must be at least 1".to_string(),
            ));
        }
        if self.samples_per_pixel == 0 {
            return Err(Error::InvalidParameters(
                "samples per pixel must be at least 1".to_string(),
            ));
        }
        if !min.is_finite() || !max.is_finite() {
            return Err(Error::InvalidParameters(format!(
                "value range ({min}, {max}) must be finite"
            )));
        }
        if min > max {
            return Err(Error::InvalidParameters(format!(
                "value range minimum {min} exceeds maximum {max}"
            )));
        }
        let samples = self
            .resolution
            .checked_mul(self.resolution)
            .and_then(|pixels| pixels.checked_mul(self.samples_per_pixel));
        match samples {
            Some(n) if n <= MAX_SAMPLES => Ok(()),
            _ => Err(Error::InvalidParameters(format!(
                "{0}x{0} scan with {1} samples per pixel exceeds {MAX_SAMPLES} samples",
                self.resolution, self.samples_per_pixel
            ))),
        }
    }

    /// Checks that the whole value range fits inside channel bounds.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameters`] naming the offending axis.
    pub fn check_bounds(&self, axis: &str, bounds: &ChannelBounds) -> Result<()> {
        let (min, max) = self.value_range;
        if bounds.contains(min) && bounds.contains(max) {
            Ok(())
        } else {
            Err(Error::InvalidParameters(format!(
                "{axis} range ({min}, {max}) exceeds channel bounds [{}, {}]",
                bounds.min, bounds.max
            )))
        }
    }

    /// Number of pixels in the image.
    #[inline]
    #[must_use]
    pub fn total_pixels(&self) -> usize {
        self.resolution * self.resolution
    }

    /// Number of coordinate entries per axis.
    #[inline]
    #[must_use]
    pub fn total_samples(&self) -> usize {
        self.total_pixels() * self.samples_per_pixel
    }
}
