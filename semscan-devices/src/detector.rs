//! Detector front-ends.

use log::trace;
use semscan_core::{DetectorSampler, Error as CoreError};

/// Highest gray level produced by [`GrayLevelSampler`].
const GRAY_MAX: f64 = 255.0;

/// Source of raw detector voltages, e.g. one analog input of a DAQ card.
pub trait VoltageSource {
    /// Reads one voltage sample.
    ///
    /// # Errors
    /// Returns `DeviceIo` when the acquisition hardware fails.
    fn read_voltage(&mut self) -> semscan_core::Result<f64>;
}

impl<F> VoltageSource for F
where
    F: FnMut() -> semscan_core::Result<f64>,
{
    fn read_voltage(&mut self) -> semscan_core::Result<f64> {
        self()
    }
}

/// Maps a detector voltage window linearly onto gray levels 0..=255.
///
/// Voltages outside `[min_voltage, max_voltage]` are clamped first, then the
/// level is truncated to an integer.
#[derive(Debug, Clone)]
pub struct GrayLevelSampler<V> {
    source: V,
    min_voltage: f64,
    max_voltage: f64,
}

impl<V: VoltageSource> GrayLevelSampler<V> {
    /// Creates a sampler over `[min_voltage, max_voltage]`.
    ///
    /// # Errors
    /// Returns [`CoreError::ConfigError`] unless `min_voltage < max_voltage`.
    pub fn new(source: V, min_voltage: f64, max_voltage: f64) -> semscan_core::Result<Self> {
        if !(min_voltage.is_finite() && max_voltage.is_finite()) || max_voltage <= min_voltage {
            return Err(CoreError::ConfigError(format!(
                "detector window [{min_voltage}, {max_voltage}] is empty"
            )));
        }
        Ok(Self {
            source,
            min_voltage,
            max_voltage,
        })
    }

    /// Voltage window as `(min, max)`.
    #[must_use]
    pub fn window(&self) -> (f64, f64) {
        (self.min_voltage, self.max_voltage)
    }

    /// Converts one voltage into a gray level.
    #[must_use]
    pub fn gray_level(&self, voltage: f64) -> f64 {
        let clamped = voltage.clamp(self.min_voltage, self.max_voltage);
        (GRAY_MAX * (clamped - self.min_voltage) / (self.max_voltage - self.min_voltage)).floor()
    }
}

impl<V: VoltageSource> DetectorSampler for GrayLevelSampler<V> {
    fn read_intensity(&mut self) -> semscan_core::Result<f64> {
        let voltage = self.source.read_voltage()?;
        if !voltage.is_finite() {
            return Err(CoreError::DeviceIo(format!(
                "detector returned non-finite voltage {voltage}"
            )));
        }
        let level = self.gray_level(voltage);
        trace!("detector {voltage:.4} V -> {level}");
        Ok(level)
    }

    fn max_intensity(&self) -> f64 {
        GRAY_MAX
    }
}
