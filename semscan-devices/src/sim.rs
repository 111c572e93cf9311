//! Simulated deflection column.
//!
//! A [`SimulatedColumn`] holds the beam state shared by one
//! [`SimulatedActuator`] and any number of [`SimulatedDetector`]s. The
//! detector images a synthetic [`Specimen`] at the position the actuator
//! currently deflects the beam to, so a scan over the column produces a
//! recognisable picture. Every accepted actuator call is appended to a
//! journal that tests inspect after a run.

use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::TAU;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::trace;
use semscan_core::{
    AxisChannels, ChannelBounds, ChannelId, DeflectionActuator, DetectorSampler,
    Error as CoreError,
};

use crate::error::Error;

/// Highest intensity a [`SimulatedDetector`] reports.
const SIM_MAX_INTENSITY: f64 = 255.0;

/// One accepted actuator call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActuatorCall {
    /// Commanded value written.
    SetValue {
        /// Target channel.
        channel: ChannelId,
        /// Value written.
        value: f64,
    },
    /// Output switched.
    SetOutput {
        /// Target channel.
        channel: ChannelId,
        /// New output state.
        enabled: bool,
    },
    /// Channel forced to zero.
    Zero {
        /// Target channel.
        channel: ChannelId,
    },
}

impl ActuatorCall {
    /// Channel the call targeted.
    #[must_use]
    pub fn channel(&self) -> ChannelId {
        match *self {
            ActuatorCall::SetValue { channel, .. }
            | ActuatorCall::SetOutput { channel, .. }
            | ActuatorCall::Zero { channel } => channel,
        }
    }
}

/// Output state of one simulated channel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChannelState {
    /// Last commanded value.
    pub value: f64,
    /// Whether the output is switched on.
    pub enabled: bool,
}

impl ChannelState {
    /// Deflection actually applied to the beam.
    #[must_use]
    pub fn level(&self) -> f64 {
        if self.enabled {
            self.value
        } else {
            0.0
        }
    }
}

#[derive(Debug, Default)]
struct ColumnState {
    channels: BTreeMap<ChannelId, ChannelState>,
    journal: Vec<ActuatorCall>,
    reads: usize,
}

/// Synthetic sample imaged by a [`SimulatedDetector`].
///
/// Coordinates are normalised to the column's field of view, `(0, 0)` at the
/// field minimum and `(1, 1)` at its maximum. Intensities span 0..=255.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Specimen {
    /// Brightness rising diagonally from the field minimum.
    Gradient,
    /// Alternating dark and bright squares, `cells` per side.
    Checkerboard {
        /// Squares per side.
        cells: u32,
    },
    /// Concentric rings around the field centre.
    Rings,
    /// Uniform brightness.
    Constant(f64),
}

impl Specimen {
    /// Intensity at normalised position `(u, v)`.
    #[must_use]
    pub fn intensity(&self, u: f64, v: f64) -> f64 {
        let u = u.clamp(0.0, 1.0);
        let v = v.clamp(0.0, 1.0);
        match *self {
            Specimen::Gradient => SIM_MAX_INTENSITY * (u + v) / 2.0,
            Specimen::Checkerboard { cells } => {
                let cells = f64::from(cells.max(1));
                let last = cells - 1.0;
                let cu = (u * cells).floor().min(last);
                let cv = (v * cells).floor().min(last);
                if (cu + cv) % 2.0 == 0.0 {
                    0.0
                } else {
                    SIM_MAX_INTENSITY
                }
            }
            Specimen::Rings => {
                let r = ((u - 0.5).powi(2) + (v - 0.5).powi(2)).sqrt();
                SIM_MAX_INTENSITY * (0.5 + 0.5 * (TAU * 4.0 * r).cos())
            }
            Specimen::Constant(level) => level.clamp(0.0, SIM_MAX_INTENSITY),
        }
    }
}

impl FromStr for Specimen {
    type Err = Error;

    /// Parses `gradient`, `rings`, `checkerboard[:cells]` or `constant:<level>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, arg) = match s.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (s, None),
        };
        let bad = || Error::Core(CoreError::ConfigError(format!("unknown specimen '{s}'")));
        match (name.to_ascii_lowercase().as_str(), arg) {
            ("gradient", None) => Ok(Specimen::Gradient),
            ("rings", None) => Ok(Specimen::Rings),
            ("checkerboard", None) => Ok(Specimen::Checkerboard { cells: 8 }),
            ("checkerboard", Some(cells)) => cells
                .parse()
                .map(|cells| Specimen::Checkerboard { cells })
                .map_err(|_| bad()),
            ("constant", Some(level)) => level
                .parse::<f64>()
                .ok()
                .filter(|level| level.is_finite())
                .map(Specimen::Constant)
                .ok_or_else(bad),
            _ => Err(bad()),
        }
    }
}

/// Shared beam state of a simulated column.
#[derive(Debug, Clone)]
pub struct SimulatedColumn {
    state: Arc<Mutex<ColumnState>>,
    field: ChannelBounds,
}

impl Default for SimulatedColumn {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedColumn {
    /// Creates a column whose field of view spans 0..1 on both axes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_field(ChannelBounds::new(0.0, 1.0))
    }

    /// Creates a column with the given field of view (commanded units).
    #[must_use]
    pub fn with_field(field: ChannelBounds) -> Self {
        Self {
            state: Arc::new(Mutex::new(ColumnState::default())),
            field,
        }
    }

    /// Field of view in commanded units.
    #[must_use]
    pub fn field(&self) -> ChannelBounds {
        self.field
    }

    fn lock(&self) -> MutexGuard<'_, ColumnState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Actuator driving this column. Its bounds default to the field of view.
    #[must_use]
    pub fn actuator(&self) -> SimulatedActuator {
        SimulatedActuator {
            column: self.clone(),
            bounds: Some(self.field),
            latency: Duration::ZERO,
        }
    }

    /// Detector imaging `specimen` at the beam position set on `channels`.
    #[must_use]
    pub fn detector(&self, specimen: Specimen, channels: AxisChannels) -> SimulatedDetector {
        SimulatedDetector {
            column: self.clone(),
            specimen,
            channels,
            latency: Duration::ZERO,
            failures: BTreeSet::new(),
        }
    }

    /// Every accepted actuator call so far, in order.
    #[must_use]
    pub fn journal(&self) -> Vec<ActuatorCall> {
        self.lock().journal.clone()
    }

    /// Forgets the journal.
    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    /// Current state of `channel`. Untouched channels read as off at zero.
    #[must_use]
    pub fn channel(&self, channel: ChannelId) -> ChannelState {
        self.lock()
            .channels
            .get(&channel)
            .copied()
            .unwrap_or_default()
    }

    /// Number of detector reads attempted so far.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.lock().reads
    }
}

/// Simulated deflection supply.
#[derive(Debug, Clone)]
pub struct SimulatedActuator {
    column: SimulatedColumn,
    bounds: Option<ChannelBounds>,
    latency: Duration,
}

impl SimulatedActuator {
    /// Replaces the bounds enforced on every channel. `None` disables checks.
    #[must_use]
    pub fn with_bounds(mut self, bounds: Option<ChannelBounds>) -> Self {
        self.bounds = bounds;
        self
    }

    /// Adds a delay to every call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn settle(&self) {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
    }
}

impl DeflectionActuator for SimulatedActuator {
    fn set_commanded_value(&mut self, channel: ChannelId, value: f64) -> semscan_core::Result<()> {
        if let Some(bounds) = self.bounds {
            bounds.check(channel, value)?;
        }
        self.settle();
        let mut state = self.column.lock();
        state.channels.entry(channel).or_default().value = value;
        state.journal.push(ActuatorCall::SetValue { channel, value });
        Ok(())
    }

    fn set_output_enabled(&mut self, channel: ChannelId, enabled: bool) -> semscan_core::Result<()> {
        self.settle();
        let mut state = self.column.lock();
        state.channels.entry(channel).or_default().enabled = enabled;
        state.journal.push(ActuatorCall::SetOutput { channel, enabled });
        Ok(())
    }

    fn zero(&mut self, channel: ChannelId) -> semscan_core::Result<()> {
        self.settle();
        let mut state = self.column.lock();
        state.channels.entry(channel).or_default().value = 0.0;
        state.journal.push(ActuatorCall::Zero { channel });
        Ok(())
    }

    fn bounds(&self, _channel: ChannelId) -> Option<ChannelBounds> {
        self.bounds
    }
}

/// Simulated detector.
#[derive(Debug, Clone)]
pub struct SimulatedDetector {
    column: SimulatedColumn,
    specimen: Specimen,
    channels: AxisChannels,
    latency: Duration,
    failures: BTreeSet<usize>,
}

impl SimulatedDetector {
    /// Adds a delay to every read.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes the reads with the given column-wide indices (0-based, counting
    /// every attempt) fail with a device error.
    #[must_use]
    pub fn with_read_failures<I: IntoIterator<Item = usize>>(mut self, indices: I) -> Self {
        self.failures.extend(indices);
        self
    }

    fn normalise(&self, level: f64) -> f64 {
        let span = self.column.field.max - self.column.field.min;
        if span <= 0.0 {
            0.0
        } else {
            (level - self.column.field.min) / span
        }
    }
}

impl DetectorSampler for SimulatedDetector {
    fn read_intensity(&mut self) -> semscan_core::Result<f64> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        let (index, x, y) = {
            let mut state = self.column.lock();
            let index = state.reads;
            state.reads += 1;
            let level = |ch: ChannelId| state.channels.get(&ch).map_or(0.0, ChannelState::level);
            (index, level(self.channels.x), level(self.channels.y))
        };
        if self.failures.contains(&index) {
            return Err(CoreError::DeviceIo(format!("simulated read failure #{index}")));
        }
        let intensity = self
            .specimen
            .intensity(self.normalise(x), self.normalise(y));
        trace!("sim read #{index} at ({x:.4}, {y:.4}) -> {intensity:.1}");
        Ok(intensity)
    }

    fn max_intensity(&self) -> f64 {
        SIM_MAX_INTENSITY
    }
}
