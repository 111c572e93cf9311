//! Capability traits for the deflection hardware and the detector.
//!
//! The acquisition engine only ever talks to hardware through these two
//! traits. Implementations live in `semscan-devices` (SCPI power supplies,
//! DAQ-backed detectors, the simulated column) or in test code.

use std::fmt;

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Output channel number on a deflection supply (1-based, as printed on the
/// front panel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChannelId(pub u8);

impl ChannelId {
    /// Creates a new channel identifier.
    #[inline]
    #[must_use]
    pub fn new(id: u8) -> Self {
        Self(id)
    }

    /// Returns the raw channel number.
    #[inline]
    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CH{}", self.0)
    }
}

/// Explicit mapping from logical scan axis to output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AxisChannels {
    /// Channel deflecting the beam horizontally.
    pub x: ChannelId,
    /// Channel deflecting the beam vertically.
    pub y: ChannelId,
}

impl AxisChannels {
    /// Creates an axis mapping.
    #[must_use]
    pub fn new(x: ChannelId, y: ChannelId) -> Self {
        Self { x, y }
    }

    /// Both channels, X first.
    #[must_use]
    pub fn both(&self) -> [ChannelId; 2] {
        [self.x, self.y]
    }
}

impl Default for AxisChannels {
    fn default() -> Self {
        Self {
            x: ChannelId(1),
            y: ChannelId(2),
        }
    }
}

/// Inclusive safety bounds for the driven quantity of one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChannelBounds {
    /// Lowest accepted commanded value.
    pub min: f64,
    /// Highest accepted commanded value.
    pub max: f64,
}

impl ChannelBounds {
    /// Creates channel bounds.
    #[must_use]
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Returns true if `value` lies within the bounds.
    #[inline]
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Checks a commanded value for `channel`.
    ///
    /// # Errors
    /// Returns [`Error::OutOfRange`] if the value lies outside the bounds.
    pub fn check(&self, channel: ChannelId, value: f64) -> Result<()> {
        if self.contains(value) {
            Ok(())
        } else {
            Err(Error::OutOfRange {
                channel,
                value,
                min: self.min,
                max: self.max,
            })
        }
    }
}

/// Hardware that positions the beam through independently driven channels.
///
/// Implementations reject out-of-bounds writes with [`Error::OutOfRange`]
/// without sending anything to the device.
pub trait DeflectionActuator {
    /// Commands the driven quantity (typically a coil current) on `channel`.
    ///
    /// # Errors
    /// Returns [`Error::OutOfRange`] outside the channel bounds and
    /// [`Error::DeviceIo`] when the write fails.
    fn set_commanded_value(&mut self, channel: ChannelId, value: f64) -> Result<()>;

    /// Switches the output stage of `channel` on or off.
    ///
    /// # Errors
    /// Returns [`Error::DeviceIo`] when the write fails.
    fn set_output_enabled(&mut self, channel: ChannelId, enabled: bool) -> Result<()>;

    /// Forces the commanded value and output level of `channel` to zero.
    ///
    /// # Errors
    /// Returns [`Error::DeviceIo`] when the write fails.
    fn zero(&mut self, channel: ChannelId) -> Result<()>;

    /// Safety bounds configured for `channel`, when known.
    fn bounds(&self, _channel: ChannelId) -> Option<ChannelBounds> {
        None
    }
}

/// Input measuring the detector signal at the current beam position.
pub trait DetectorSampler {
    /// Reads one sample, already clamped to `[0, max_intensity]`.
    ///
    /// # Errors
    /// Returns [`Error::DeviceIo`] when the read fails.
    fn read_intensity(&mut self) -> Result<f64>;

    /// Upper end of the intensity scale.
    fn max_intensity(&self) -> f64 {
        255.0
    }
}

impl<T: DeflectionActuator + ?Sized> DeflectionActuator for Box<T> {
    fn set_commanded_value(&mut self, channel: ChannelId, value: f64) -> Result<()> {
        (**self).set_commanded_value(channel, value)
    }

    fn set_output_enabled(&mut self, channel: ChannelId, enabled: bool) -> Result<()> {
        (**self).set_output_enabled(channel, enabled)
    }

    fn zero(&mut self, channel: ChannelId) -> Result<()> {
        (**self).zero(channel)
    }

    fn bounds(&self, channel: ChannelId) -> Option<ChannelBounds> {
        (**self).bounds(channel)
    }
}

impl<T: DetectorSampler + ?Sized> DetectorSampler for Box<T> {
    fn read_intensity(&mut self) -> Result<f64> {
        (**self).read_intensity()
    }

    fn max_intensity(&self) -> f64 {
        (**self).max_intensity()
    }
}
