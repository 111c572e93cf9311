//! Persisted device list.
//!
//! The document is a JSON array with one entry per supply channel:
//!
//! ```json
//! [
//!   {"Adress": "ASRL5::INSTR", "Lens": "Deflector X", "Vmin": 0, "Vmax": 12000, "Imin": 0, "Imax": 1000},
//!   {"Adress": "ASRL5::INSTR", "Lens": "Deflector Y", "Vmin": 0, "Vmax": 12000, "Imin": 0, "Imax": 1000}
//! ]
//! ```
//!
//! Limits are in mV and mA. An entry may carry an explicit `"Channel"`;
//! otherwise channels are numbered 1, 2, ... in document order per address.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use semscan_core::{AxisChannels, ChannelBounds, ChannelId};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// Intermediate struct matching the persisted schema
#[derive(Deserialize)]
struct JsonEntry {
    #[serde(rename = "Adress", alias = "Address")]
    address: String,
    #[serde(rename = "Lens")]
    lens: String,
    #[serde(rename = "Channel", default)]
    channel: Option<u8>,
    #[serde(rename = "Vmin")]
    vmin: f64,
    #[serde(rename = "Vmax")]
    vmax: f64,
    #[serde(rename = "Imin")]
    imin: f64,
    #[serde(rename = "Imax")]
    imax: f64,
}

/// Voltage and current limits of one channel, in mV and mA.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelLimits {
    /// Lowest accepted voltage set point (mV).
    pub vmin_mv: f64,
    /// Highest accepted voltage set point (mV).
    pub vmax_mv: f64,
    /// Lowest accepted current set point (mA).
    pub imin_ma: f64,
    /// Highest accepted current set point (mA).
    pub imax_ma: f64,
}

impl ChannelLimits {
    /// Current bounds in A, the unit the deflection is commanded in.
    #[must_use]
    pub fn current_bounds(&self) -> ChannelBounds {
        ChannelBounds::new(self.imin_ma / 1000.0, self.imax_ma / 1000.0)
    }

    /// Voltage bounds in V.
    #[must_use]
    pub fn voltage_bounds(&self) -> ChannelBounds {
        ChannelBounds::new(self.vmin_mv / 1000.0, self.vmax_mv / 1000.0)
    }

    fn validate(&self, lens: &str) -> Result<()> {
        let all = [self.vmin_mv, self.vmax_mv, self.imin_ma, self.imax_ma];
        if all.iter().any(|v| !v.is_finite()) {
            return Err(config_error(format!("lens '{lens}': limits must be finite")));
        }
        if self.vmin_mv > self.vmax_mv {
            return Err(config_error(format!(
                "lens '{lens}': Vmin {} exceeds Vmax {}",
                self.vmin_mv, self.vmax_mv
            )));
        }
        if self.imin_ma > self.imax_ma {
            return Err(config_error(format!(
                "lens '{lens}': Imin {} exceeds Imax {}",
                self.imin_ma, self.imax_ma
            )));
        }
        Ok(())
    }
}

/// One supply channel from the device list, with its channel resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEntry {
    /// Instrument address (VISA resource string or host:port).
    pub address: String,
    /// Lens (or deflector) driven by this channel.
    pub lens: String,
    /// Output channel on the supply.
    pub channel: ChannelId,
    /// Configured limits.
    pub limits: ChannelLimits,
}

/// The two deflection channels of a scan, resolved from a [`DeviceList`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScanAxes {
    /// Address of the supply driving both axes.
    pub address: String,
    /// Role to channel mapping.
    pub channels: AxisChannels,
    /// Limits of the X channel.
    pub x: ChannelLimits,
    /// Limits of the Y channel.
    pub y: ChannelLimits,
}

/// Parsed device list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceList {
    entries: Vec<ChannelEntry>,
}

impl DeviceList {
    /// Load the device list from a JSON file.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the file cannot be read, [`Error::Json`] if it
    /// is not a device list, and a configuration error for invalid entries.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let entries: Vec<JsonEntry> = serde_json::from_reader(reader)?;
        Self::from_json_entries(entries)
    }

    /// Load the device list from a JSON string.
    ///
    /// # Errors
    /// Returns [`Error::Json`] for a malformed document and a configuration
    /// error for invalid entries.
    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<JsonEntry> = serde_json::from_str(json)?;
        Self::from_json_entries(entries)
    }

    fn from_json_entries(raw: Vec<JsonEntry>) -> Result<Self> {
        let mut next_channel: BTreeMap<String, u8> = BTreeMap::new();
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(raw.len());

        for entry in raw {
            let counter = next_channel.entry(entry.address.clone()).or_insert(1);
            let channel = entry.channel.unwrap_or(*counter);
            *counter = counter.saturating_add(1);

            if channel == 0 {
                return Err(config_error(format!(
                    "lens '{}': channels are numbered from 1",
                    entry.lens
                )));
            }
            if !seen.insert((entry.address.clone(), channel)) {
                return Err(config_error(format!(
                    "channel {channel} of {} assigned twice",
                    entry.address
                )));
            }

            let limits = ChannelLimits {
                vmin_mv: entry.vmin,
                vmax_mv: entry.vmax,
                imin_ma: entry.imin,
                imax_ma: entry.imax,
            };
            limits.validate(&entry.lens)?;

            entries.push(ChannelEntry {
                address: entry.address,
                lens: entry.lens,
                channel: ChannelId(channel),
                limits,
            });
        }

        Ok(Self { entries })
    }

    /// All entries in document order.
    #[must_use]
    pub fn entries(&self) -> &[ChannelEntry] {
        &self.entries
    }

    /// Distinct supply addresses in document order.
    #[must_use]
    pub fn addresses(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if !out.contains(&entry.address.as_str()) {
                out.push(&entry.address);
            }
        }
        out
    }

    /// Entries belonging to one supply.
    pub fn channels_for<'a>(&'a self, address: &'a str) -> impl Iterator<Item = &'a ChannelEntry> {
        self.entries.iter().filter(move |e| e.address == address)
    }

    /// Looks up an entry by lens name.
    #[must_use]
    pub fn find_lens(&self, lens: &str) -> Option<&ChannelEntry> {
        self.entries.iter().find(|e| e.lens == lens)
    }

    /// Resolves the X and Y deflection channels by lens name.
    ///
    /// Both lenses must be driven by the same supply.
    ///
    /// # Errors
    /// Returns [`Error::UnknownLens`] for a missing lens, or a configuration
    /// error when the lenses sit on different supplies or share a channel.
    pub fn resolve_axes(&self, x_lens: &str, y_lens: &str) -> Result<ScanAxes> {
        let x = self
            .find_lens(x_lens)
            .ok_or_else(|| Error::UnknownLens(x_lens.to_string()))?;
        let y = self
            .find_lens(y_lens)
            .ok_or_else(|| Error::UnknownLens(y_lens.to_string()))?;

        if x.address != y.address {
            return Err(config_error(format!(
                "X deflector on {} and Y deflector on {} must share one supply",
                x.address, y.address
            )));
        }
        if x.channel == y.channel {
            return Err(config_error(format!(
                "X and Y deflectors both map to {}",
                x.channel
            )));
        }

        Ok(ScanAxes {
            address: x.address.clone(),
            channels: AxisChannels::new(x.channel, y.channel),
            x: x.limits,
            y: y.limits,
        })
    }
}

fn config_error(msg: String) -> Error {
    Error::Core(semscan_core::Error::ConfigError(msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const TWO_SUPPLIES: &str = r#"[
        {"Adress": "ASRL5::INSTR", "Lens": "Deflector X", "Vmin": 0, "Vmax": 12000, "Imin": 0, "Imax": 1000},
        {"Adress": "ASRL5::INSTR", "Lens": "Deflector Y", "Vmin": 0, "Vmax": 12000, "Imin": 0, "Imax": 800},
        {"Adress": "ASRL4::INSTR", "Lens": "Condenser", "Vmin": 0, "Vmax": 30000, "Imin": 0, "Imax": 3000}
    ]"#;

    #[test]
    fn test_channels_follow_document_order() {
        let list = DeviceList::from_json(TWO_SUPPLIES).expect("Failed to parse JSON");
        let channels: Vec<(String, u8)> = list
            .entries()
            .iter()
            .map(|e| (e.lens.clone(), e.channel.get()))
            .collect();
        assert_eq!(
            channels,
            vec![
                ("Deflector X".to_string(), 1),
                ("Deflector Y".to_string(), 2),
                ("Condenser".to_string(), 1),
            ]
        );
        assert_eq!(list.addresses(), vec!["ASRL5::INSTR", "ASRL4::INSTR"]);
        assert_eq!(list.channels_for("ASRL5::INSTR").count(), 2);
    }

    #[test]
    fn test_resolve_axes() {
        let list = DeviceList::from_json(TWO_SUPPLIES).unwrap();
        let axes = list.resolve_axes("Deflector X", "Deflector Y").unwrap();
        assert_eq!(axes.address, "ASRL5::INSTR");
        assert_eq!(axes.channels, AxisChannels::new(ChannelId(1), ChannelId(2)));
        assert_relative_eq!(axes.y.current_bounds().max, 0.8);
        assert_relative_eq!(axes.x.voltage_bounds().max, 12.0);
    }

    #[test]
    fn test_swapped_axes() {
        let list = DeviceList::from_json(TWO_SUPPLIES).unwrap();
        let axes = list.resolve_axes("Deflector Y", "Deflector X").unwrap();
        assert_eq!(axes.channels, AxisChannels::new(ChannelId(2), ChannelId(1)));
    }

    #[test]
    fn test_unknown_lens() {
        let list = DeviceList::from_json(TWO_SUPPLIES).unwrap();
        let err = list.resolve_axes("Deflector X", "Stigmator").unwrap_err();
        assert!(matches!(err, Error::UnknownLens(ref name) if name == "Stigmator"));
    }

    #[test]
    fn test_axes_on_different_supplies_rejected() {
        let list = DeviceList::from_json(TWO_SUPPLIES).unwrap();
        assert!(list.resolve_axes("Deflector X", "Condenser").is_err());
    }

    #[test]
    fn test_explicit_channel() {
        let json = r#"[
            {"Address": "10.0.0.7:5025", "Lens": "X", "Channel": 3, "Vmin": 0, "Vmax": 5000, "Imin": 0, "Imax": 500},
            {"Address": "10.0.0.7:5025", "Lens": "Y", "Vmin": 0, "Vmax": 5000, "Imin": 0, "Imax": 500}
        ]"#;
        let list = DeviceList::from_json(json).unwrap();
        let axes = list.resolve_axes("X", "Y").unwrap();
        assert_eq!(axes.channels, AxisChannels::new(ChannelId(3), ChannelId(2)));
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let json = r#"[
            {"Adress": "A", "Lens": "X", "Vmin": 0, "Vmax": 1, "Imin": 0, "Imax": 1},
            {"Adress": "A", "Lens": "Y", "Channel": 1, "Vmin": 0, "Vmax": 1, "Imin": 0, "Imax": 1}
        ]"#;
        let err = DeviceList::from_json(json).unwrap_err();
        assert!(err.to_string().contains("assigned twice"), "{}", err);
    }

    #[test]
    fn test_inverted_limits_rejected() {
        let json = r#"[{"Adress": "A", "Lens": "X", "Vmin": 10, "Vmax": 1, "Imin": 0, "Imax": 1}]"#;
        let err = DeviceList::from_json(json).unwrap_err();
        assert!(err.to_string().contains("Vmin"), "{}", err);
    }

    #[test]
    fn test_missing_field_is_json_error() {
        let json = r#"[{"Adress": "A", "Lens": "X", "Vmin": 0, "Vmax": 1, "Imin": 0}]"#;
        assert!(matches!(DeviceList::from_json(json), Err(Error::Json(_))));
    }
}
