//! semscan-devices: Deflection supplies, detectors and device configuration.
//!
//! # Key Components
//!
//! - [`DeviceList`] - persisted device document, resolved into explicit
//!   per-axis channels and bounds
//! - [`ScpiPowerSupply`] - programmable supply driven over a line-oriented
//!   SCPI transport
//! - [`GrayLevelSampler`] - maps a detector voltage onto gray levels
//! - [`sim`] - simulated deflection column for demos and tests

mod config;
mod detector;
mod error;
mod scpi;
pub mod sim;

pub use config::{ChannelEntry, ChannelLimits, DeviceList, ScanAxes};
pub use detector::{GrayLevelSampler, VoltageSource};
pub use error::{Error, Result};
pub use scpi::{ChannelSettings, ScpiPowerSupply, StreamTransport, Transport};
pub use sim::{ActuatorCall, SimulatedActuator, SimulatedColumn, SimulatedDetector, Specimen};

// Re-export core device traits for convenience
pub use semscan_core::{AxisChannels, ChannelBounds, ChannelId, DeflectionActuator, DetectorSampler};
