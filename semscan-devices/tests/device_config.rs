#![allow(clippy::float_cmp)]
use std::io::{Read, Write};

use approx::assert_relative_eq;
use semscan_devices::{
    ChannelId, DeflectionActuator, DeviceList, Error, ScpiPowerSupply, StreamTransport,
};

const BENCH: &str = r#"[
    {"Adress": "ASRL5::INSTR", "Lens": "Deflector X", "Vmin": 0, "Vmax": 12000, "Imin": 0, "Imax": 1000},
    {"Adress": "ASRL5::INSTR", "Lens": "Deflector Y", "Vmin": 0, "Vmax": 12000, "Imin": 100, "Imax": 800},
    {"Adress": "ASRL4::INSTR", "Lens": "Objective", "Vmin": 0, "Vmax": 30000, "Imin": 0, "Imax": 3000}
]"#;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(contents.as_bytes())
        .expect("Failed to write config");
    file
}

#[test]
fn test_load_and_resolve_from_file() {
    let file = write_config(BENCH);
    let list = DeviceList::from_file(file.path()).expect("Failed to load device list");

    assert_eq!(list.addresses(), vec!["ASRL5::INSTR", "ASRL4::INSTR"]);
    assert_eq!(list.channels_for("ASRL5::INSTR").count(), 2);

    let axes = list
        .resolve_axes("Deflector X", "Deflector Y")
        .expect("Failed to resolve axes");
    assert_eq!(axes.channels.x, ChannelId(1));
    assert_eq!(axes.channels.y, ChannelId(2));
    assert_relative_eq!(axes.y.current_bounds().min, 0.1);
    assert_relative_eq!(axes.y.current_bounds().max, 0.8);
    assert_relative_eq!(axes.x.voltage_bounds().max, 12.0);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let err = DeviceList::from_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn test_malformed_file_is_json_error() {
    let file = write_config(r#"[{"Adress": "ASRL5::INSTR", "Lens": 3}]"#);
    let err = DeviceList::from_file(file.path()).unwrap_err();
    assert!(matches!(err, Error::Json(_)));
}

#[test]
fn test_axes_across_supplies_rejected() {
    let list = DeviceList::from_json(BENCH).unwrap();
    assert!(matches!(
        list.resolve_axes("Deflector X", "Objective"),
        Err(Error::Core(_))
    ));
    assert!(matches!(
        list.resolve_axes("Deflector X", "Stigmator"),
        Err(Error::UnknownLens(_))
    ));
}

/// Byte stream with a canned reply buffer that records everything written.
struct Loopback {
    replies: std::io::Cursor<Vec<u8>>,
    written: Vec<u8>,
}

impl std::io::Read for Loopback {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.replies.read(buf)
    }
}

impl std::io::Write for Loopback {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_supply_configured_from_device_list() {
    let list = DeviceList::from_json(BENCH).unwrap();
    let axes = list.resolve_axes("Deflector X", "Deflector Y").unwrap();

    let stream = Loopback {
        replies: std::io::Cursor::new(b"GPP-2323\n".to_vec()),
        written: Vec::new(),
    };
    let mut psu = ScpiPowerSupply::new(StreamTransport::new(stream))
        .with_channel_limits(axes.channels.x, axes.x)
        .with_channel_limits(axes.channels.y, axes.y)
        .with_output_settle(std::time::Duration::ZERO);

    assert_eq!(psu.open().unwrap(), "GPP-2323");
    assert_eq!(psu.bounds(axes.channels.y).unwrap().min, 0.1);

    // below Imin on the Y channel
    assert!(psu.set_commanded_value(axes.channels.y, 0.05).is_err());
    psu.set_commanded_value(axes.channels.y, 0.5).unwrap();
    psu.zero(axes.channels.y).unwrap();

    let written = String::from_utf8(psu.transport().get_ref().written.clone()).unwrap();
    assert_eq!(
        written,
        "SYSTem:REMote\n*IDN?\nISET2:0.500\nISET2:0.000\nVSET2:0.000\n"
    );
}
