//! semscan command-line interface.
//!
//! Drives raster scans against the simulated deflection column and inspects
//! scan patterns and device lists.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Parser, Subcommand};

use log::info;
use semscan_acquisition::{
    DisplaySink, SampleErrorPolicy, ScanController, ScanProgress, ScanReport, ScanStatus,
};
use semscan_core::{
    AxisChannels, ChannelBounds, DetectorSampler, Orientation, PixelUpdate, ScanImage,
    ScanParameters, ScanPattern,
};
use semscan_devices::sim::{SimulatedColumn, Specimen};
use semscan_devices::DeviceList;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("Core error: {0}")]
    Core(#[from] semscan_core::Error),

    #[error("Acquisition error: {0}")]
    Acquisition(#[from] semscan_acquisition::Error),

    #[error("Device error: {0}")]
    Devices(#[from] semscan_devices::Error),

    #[error("scan ended without a report")]
    NoReport,
}

/// Gray ramp used for the terminal preview, dark to bright.
const PREVIEW_RAMP: &[u8] = b" .:-=+*#%@";

/// Raster-scan acquisition for beam-deflection imaging.
#[derive(Parser)]
#[command(name = "semscan")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire one image from the simulated column
    Scan {
        /// Lowest commanded deflection value
        #[arg(long, default_value = "0.0", allow_negative_numbers = true)]
        min: f64,

        /// Highest commanded deflection value
        #[arg(long, default_value = "0.1", allow_negative_numbers = true)]
        max: f64,

        /// Pixels per side
        #[arg(short, long, default_value = "64")]
        resolution: usize,

        /// Detector samples averaged per pixel
        #[arg(short, long, default_value = "1")]
        samples_per_pixel: usize,

        /// Simulated latency of every actuator call (microseconds)
        #[arg(long, default_value = "0")]
        latency_us: u64,

        /// Specimen: gradient, rings, checkerboard[:cells], constant:<level>
        #[arg(long, default_value = "gradient")]
        specimen: Specimen,

        /// Extra attempts for a sample after a transient device error
        #[arg(long, default_value = "0")]
        retries: u32,

        /// Stop the scan after this many milliseconds
        #[arg(long)]
        stop_after_ms: Option<u64>,

        /// Device list JSON used to pick channels and bounds
        #[arg(long)]
        devices: Option<PathBuf>,

        /// Lens name of the X deflector in the device list
        #[arg(long, default_value = "Deflector X")]
        x_lens: String,

        /// Lens name of the Y deflector in the device list
        #[arg(long, default_value = "Deflector Y")]
        y_lens: String,

        /// Print an ASCII rendering of the image
        #[arg(long)]
        preview: bool,
    },

    /// Print the X/Y coordinate sequences as CSV
    Pattern {
        /// Lowest commanded deflection value
        #[arg(long, default_value = "0.0", allow_negative_numbers = true)]
        min: f64,

        /// Highest commanded deflection value
        #[arg(long, default_value = "0.1", allow_negative_numbers = true)]
        max: f64,

        /// Pixels per side
        #[arg(short, long, default_value = "4")]
        resolution: usize,

        /// Detector samples per pixel
        #[arg(short, long, default_value = "1")]
        samples_per_pixel: usize,
    },

    /// Show a device list and the channels it resolves to
    Devices {
        /// Device list JSON file
        input: PathBuf,

        /// Lens name of the X deflector
        #[arg(long)]
        x_lens: Option<String>,

        /// Lens name of the Y deflector
        #[arg(long)]
        y_lens: Option<String>,
    },
}

/// Logs throttled progress.
#[derive(Default)]
struct TerminalSink {
    last_percent: Option<u32>,
}

impl DisplaySink for TerminalSink {
    fn on_pixel(&mut self, _update: &PixelUpdate, _image: &ScanImage) {}

    fn on_progress(&mut self, progress: ScanProgress, _image: &ScanImage) {
        let percent = (progress.fraction() * 100.0) as u32;
        if self.last_percent != Some(percent) {
            info!("{}/{} pixels ({}%)", progress.done, progress.total, percent);
            self.last_percent = Some(percent);
        }
    }

    fn on_scan_completed(&mut self, report: &ScanReport) {
        info!("run {} ended: {:?}", report.run_id, report.status);
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            min,
            max,
            resolution,
            samples_per_pixel,
            latency_us,
            specimen,
            retries,
            stop_after_ms,
            devices,
            x_lens,
            y_lens,
            preview,
        } => {
            let params = ScanParameters::new((min, max), resolution, samples_per_pixel)?;

            let (channels, field, bounds) = match devices {
                Some(path) => {
                    let list = DeviceList::from_file(&path)?;
                    let axes = list.resolve_axes(&x_lens, &y_lens)?;
                    let x_bounds = axes.x.current_bounds();
                    let y_bounds = axes.y.current_bounds();
                    info!(
                        "{}: X on {} [{}, {}] A, Y on {} [{}, {}] A",
                        axes.address,
                        axes.channels.x,
                        x_bounds.min,
                        x_bounds.max,
                        axes.channels.y,
                        y_bounds.min,
                        y_bounds.max
                    );
                    let shared = ChannelBounds::new(
                        x_bounds.min.max(y_bounds.min),
                        x_bounds.max.min(y_bounds.max),
                    );
                    (axes.channels, x_bounds, shared)
                }
                None => {
                    let field = ChannelBounds::new(min.min(0.0), max.max(0.0));
                    (AxisChannels::default(), field, field)
                }
            };

            let column = SimulatedColumn::with_field(field);
            let actuator = column
                .actuator()
                .with_bounds(Some(bounds))
                .with_latency(Duration::from_micros(latency_us));
            let detector = column.detector(specimen, channels);
            let policy = if retries == 0 {
                SampleErrorPolicy::Abort
            } else {
                SampleErrorPolicy::Retry {
                    max_attempts: retries.saturating_add(1),
                }
            };

            let mut controller =
                ScanController::new(actuator, detector, channels, TerminalSink::default())
                    .with_policy(policy);

            let start = Instant::now();
            controller.start(params)?;
            match stop_after_ms.map(Duration::from_millis) {
                Some(limit) => {
                    while controller.is_running() {
                        controller.poll()?;
                        if start.elapsed() >= limit {
                            info!("stop requested after {} ms", limit.as_millis());
                            controller.stop()?;
                            break;
                        }
                        thread::sleep(Duration::from_millis(5));
                    }
                }
                None => {
                    controller.wait()?;
                }
            }

            let report = controller.last_report().cloned().ok_or(CliError::NoReport)?;

            println!("Run {}", report.run_id);
            match &report.status {
                ScanStatus::Completed => println!("Status: completed"),
                ScanStatus::Cancelled => println!("Status: cancelled"),
                ScanStatus::Failed(err) => println!("Status: failed ({})", err),
            }
            println!(
                "Pixels: {}/{} in {:.3}s",
                report.pixels_acquired,
                report.total_pixels,
                report.elapsed.as_secs_f64()
            );
            if let Some(err) = &report.shutdown_error {
                println!("Shutdown error: {}", err);
            }

            let full_scale = controller
                .sampler()
                .map_or(255.0, DetectorSampler::max_intensity);
            let image = controller.image();
            if let Some((lo, hi, mean)) = image.stats() {
                println!("Intensity: min {:.2}, max {:.2}, mean {:.2}", lo, hi, mean);
            }
            if preview {
                print_preview(image, full_scale);
            }
        }

        Commands::Pattern {
            min,
            max,
            resolution,
            samples_per_pixel,
        } => {
            let params = ScanParameters::new((min, max), resolution, samples_per_pixel)?;
            let pattern = ScanPattern::new(params)?;
            println!("index,x,y");
            for i in 0..pattern.len() {
                if let Some((x, y)) = pattern.sample(i) {
                    println!("{},{},{}", i, x, y);
                }
            }
        }

        Commands::Devices {
            input,
            x_lens,
            y_lens,
        } => {
            let list = DeviceList::from_file(&input)?;
            println!("File: {}", input.display());
            for address in list.addresses() {
                println!("{}", address);
                for entry in list.channels_for(address) {
                    let v = entry.limits.voltage_bounds();
                    let i = entry.limits.current_bounds();
                    let channel = entry.channel.to_string();
                    println!(
                        "  {:<4} {:<20} V [{:.3}, {:.3}]  I [{:.3}, {:.3}]",
                        channel,
                        entry.lens,
                        v.min,
                        v.max,
                        i.min,
                        i.max
                    );
                }
            }

            if let (Some(x_lens), Some(y_lens)) = (x_lens, y_lens) {
                let axes = list.resolve_axes(&x_lens, &y_lens)?;
                println!(
                    "Scan axes on {}: X = {}, Y = {}",
                    axes.address, axes.channels.x, axes.channels.y
                );
            }
        }
    }

    Ok(())
}

fn print_preview(image: &ScanImage, max_intensity: f64) {
    let snapshot = image.snapshot(Orientation::RowMajor);
    let steps = PREVIEW_RAMP.len() - 1;
    // one terminal row per two image rows keeps the aspect ratio
    for row in snapshot.rows().into_iter().step_by(2) {
        let line: String = row
            .iter()
            .map(|v| {
                let level = (v / max_intensity).clamp(0.0, 1.0);
                PREVIEW_RAMP[(level * steps as f64).round() as usize] as char
            })
            .collect();
        println!("{}", line);
    }
}
