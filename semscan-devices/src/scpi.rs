//! Programmable power supply driven over a line-oriented SCPI dialect.
//!
//! Command set:
//!
//! | Operation        | Command                       |
//! |------------------|-------------------------------|
//! | remote mode      | `SYSTem:REMote`               |
//! | identify         | `*IDN?`                       |
//! | voltage set      | `VSET<ch>:<volts:.3>`         |
//! | current set      | `ISET<ch>:<amps:.3>`          |
//! | output on/off    | `:OUTPut<ch>:STATe ON\|OFF`   |
//! | read back        | `VSET<ch>?` `ISET<ch>?` `VOUT<ch>?` `IOUT<ch>?` |
//!
//! Set points are checked against per-channel limits (mV / mA) before
//! anything is written; a rejected value never reaches the wire.

use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use log::{debug, info};
use semscan_core::{ChannelBounds, ChannelId, DeflectionActuator};

use crate::config::ChannelLimits;
use crate::error::{Error, Result};

/// Delay after switching an output, giving the supply time to settle.
const OUTPUT_SETTLE: Duration = Duration::from_millis(100);

/// Line-oriented command channel to an instrument.
pub trait Transport {
    /// Sends one command line.
    ///
    /// # Errors
    /// Returns the underlying I/O error.
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Sends a query and returns the trimmed reply line.
    ///
    /// # Errors
    /// Returns the underlying I/O error, or `UnexpectedEof` when no reply
    /// arrives.
    fn query(&mut self, line: &str) -> io::Result<String>;
}

/// [`Transport`] over any byte stream, newline terminated.
#[derive(Debug)]
pub struct StreamTransport<S: Read + Write> {
    inner: BufReader<S>,
}

impl<S: Read + Write> StreamTransport<S> {
    /// Wraps a connected stream.
    #[must_use]
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufReader::new(stream),
        }
    }

    /// The underlying stream.
    #[must_use]
    pub fn get_ref(&self) -> &S {
        self.inner.get_ref()
    }

    /// Returns the underlying stream.
    #[must_use]
    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }
}

impl StreamTransport<TcpStream> {
    /// Connects to a LAN instrument (raw socket, typically port 5025).
    ///
    /// # Errors
    /// Returns the I/O error of connecting or configuring the socket.
    pub fn connect<A: ToSocketAddrs>(addr: A, timeout: Duration) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S: Read + Write> Transport for StreamTransport<S> {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let stream = self.inner.get_mut();
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()
    }

    fn query(&mut self, line: &str) -> io::Result<String> {
        self.write_line(line)?;
        let mut reply = String::new();
        if self.inner.read_line(&mut reply)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("no reply to '{line}'"),
            ));
        }
        Ok(reply.trim().to_string())
    }
}

/// Set points and measured outputs of one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSettings {
    /// Voltage set point (V).
    pub voltage_set: f64,
    /// Current set point (A).
    pub current_set: f64,
    /// Measured output voltage (V).
    pub voltage_out: f64,
    /// Measured output current (A).
    pub current_out: f64,
}

/// Multi-channel programmable supply.
///
/// As a [`DeflectionActuator`] the commanded quantity is the channel
/// current in A; `zero` writes current 0 and then voltage 0.
#[derive(Debug)]
pub struct ScpiPowerSupply<T: Transport> {
    transport: T,
    name: Option<String>,
    limits: BTreeMap<ChannelId, ChannelLimits>,
    output_settle: Duration,
}

impl<T: Transport> ScpiPowerSupply<T> {
    /// Creates a supply on `transport` with no channel configured.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            name: None,
            limits: BTreeMap::new(),
            output_settle: OUTPUT_SETTLE,
        }
    }

    /// Configures the limits of one channel. Unconfigured channels reject
    /// every set point.
    #[must_use]
    pub fn with_channel_limits(mut self, channel: ChannelId, limits: ChannelLimits) -> Self {
        self.limits.insert(channel, limits);
        self
    }

    /// Overrides the delay after output switching.
    #[must_use]
    pub fn with_output_settle(mut self, settle: Duration) -> Self {
        self.output_settle = settle;
        self
    }

    /// Switches the supply to remote mode and reads its identity.
    ///
    /// # Errors
    /// Returns [`Error::Io`] on transport failure and [`Error::Protocol`]
    /// for an empty identity.
    pub fn open(&mut self) -> Result<String> {
        self.transport.write_line("SYSTem:REMote")?;
        let name = self.transport.query("*IDN?")?;
        if name.is_empty() {
            return Err(Error::Protocol("empty *IDN? reply".to_string()));
        }
        info!("connected to {name}");
        self.name = Some(name.clone());
        Ok(name)
    }

    /// Identity string read by [`ScpiPowerSupply::open`].
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn channel_limits(&self, channel: ChannelId) -> semscan_core::Result<&ChannelLimits> {
        self.limits.get(&channel).ok_or_else(|| {
            semscan_core::Error::ConfigError(format!("no limits configured for {channel}"))
        })
    }

    /// Sets the output voltage of `channel` in V.
    ///
    /// # Errors
    /// Returns `OutOfRange` outside the configured limits (nothing is
    /// written), `ConfigError` for an unconfigured channel, or `DeviceIo`.
    pub fn set_voltage(&mut self, channel: ChannelId, volts: f64) -> semscan_core::Result<()> {
        self.channel_limits(channel)?
            .voltage_bounds()
            .check(channel, volts)?;
        self.write_voltage(channel, volts)
    }

    /// Sets the current limit of `channel` in A.
    ///
    /// # Errors
    /// As [`ScpiPowerSupply::set_voltage`].
    pub fn set_current(&mut self, channel: ChannelId, amps: f64) -> semscan_core::Result<()> {
        self.channel_limits(channel)?
            .current_bounds()
            .check(channel, amps)?;
        self.write_current(channel, amps)
    }

    fn write_voltage(&mut self, channel: ChannelId, volts: f64) -> semscan_core::Result<()> {
        let cmd = format!("VSET{}:{volts:.3}", channel.get());
        debug!("{cmd}");
        self.transport.write_line(&cmd)?;
        Ok(())
    }

    fn write_current(&mut self, channel: ChannelId, amps: f64) -> semscan_core::Result<()> {
        let cmd = format!("ISET{}:{amps:.3}", channel.get());
        debug!("{cmd}");
        self.transport.write_line(&cmd)?;
        Ok(())
    }

    /// Switches the output of `channel`.
    ///
    /// # Errors
    /// Returns `DeviceIo` on transport failure.
    pub fn set_output(&mut self, channel: ChannelId, on: bool) -> semscan_core::Result<()> {
        let state = if on { "ON" } else { "OFF" };
        self.transport
            .write_line(&format!(":OUTPut{}:STATe {state}", channel.get()))?;
        if !self.output_settle.is_zero() {
            thread::sleep(self.output_settle);
        }
        Ok(())
    }

    /// Reads back the set points and measured outputs of `channel`.
    ///
    /// # Errors
    /// Returns [`Error::Io`] on transport failure and [`Error::Protocol`]
    /// for a reply that is not a number.
    pub fn settings(&mut self, channel: ChannelId) -> Result<ChannelSettings> {
        let ch = channel.get();
        Ok(ChannelSettings {
            voltage_set: self.query_number(&format!("VSET{ch}?"))?,
            current_set: self.query_number(&format!("ISET{ch}?"))?,
            voltage_out: self.query_number(&format!("VOUT{ch}?"))?,
            current_out: self.query_number(&format!("IOUT{ch}?"))?,
        })
    }

    /// Sets voltage and current of `channel`, then reads back its settings.
    ///
    /// # Errors
    /// Any error of [`ScpiPowerSupply::set_voltage`] or
    /// [`ScpiPowerSupply::settings`].
    pub fn update_set_point(
        &mut self,
        channel: ChannelId,
        volts: f64,
        amps: f64,
    ) -> Result<ChannelSettings> {
        self.set_voltage(channel, volts)?;
        self.set_current(channel, amps)?;
        self.settings(channel)
    }

    /// Regulation mode reported by the supply (`CV` or `CC`).
    ///
    /// # Errors
    /// Returns [`Error::Io`] on transport failure.
    pub fn query_mode(&mut self) -> Result<String> {
        Ok(self.transport.query("MODE?")?)
    }

    /// Turns off over-voltage and over-current protection.
    ///
    /// # Errors
    /// Returns [`Error::Io`] on transport failure.
    pub fn disable_protections(&mut self) -> Result<()> {
        self.transport.write_line("OVP OFF")?;
        self.transport.write_line("OCP OFF")?;
        Ok(())
    }

    fn query_number(&mut self, cmd: &str) -> Result<f64> {
        let reply = self.transport.query(cmd)?;
        // some firmware appends the unit
        let trimmed = reply.trim_end_matches(|c: char| c.is_ascii_alphabetic());
        trimmed
            .parse()
            .map_err(|_| Error::Protocol(format!("'{cmd}' returned '{reply}'")))
    }
}

impl<T: Transport> DeflectionActuator for ScpiPowerSupply<T> {
    fn set_commanded_value(&mut self, channel: ChannelId, value: f64) -> semscan_core::Result<()> {
        self.set_current(channel, value)
    }

    fn set_output_enabled(&mut self, channel: ChannelId, enabled: bool) -> semscan_core::Result<()> {
        self.set_output(channel, enabled)
    }

    fn zero(&mut self, channel: ChannelId) -> semscan_core::Result<()> {
        // zero is always safe, even when a channel's minimum lies above it
        self.write_current(channel, 0.0)?;
        self.write_voltage(channel, 0.0)
    }

    fn bounds(&self, channel: ChannelId) -> Option<ChannelBounds> {
        self.limits.get(&channel).map(ChannelLimits::current_bounds)
    }
}
