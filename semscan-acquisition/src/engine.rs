//! Sample-by-sample raster acquisition.
//!
//! The engine runs on a worker thread and owns the devices for the duration
//! of one run. For every pixel it commands the deflection for each sample of
//! the dwell, reads the detector, and emits the mean as a [`PixelUpdate`].
//!
//! Cancellation is cooperative: the flag is checked at every pixel boundary
//! and before every sample attempt, so a stop request is honored within one
//! in-flight device call. A pixel interrupted by cancellation is discarded.
//!
//! Whatever the outcome, both axis outputs are zeroed exactly once before
//! the single `Finished` event is sent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::time::Instant;

use log::{debug, error, info, warn};
use semscan_core::{
    AxisChannels, DeflectionActuator, DetectorSampler, Error, PixelUpdate, Result, ScanParameters,
    ScanPattern,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::message::{EngineEvent, ScanReport, ScanStatus};

/// What to do when a single actuator write or detector read fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SampleErrorPolicy {
    /// End the run on the first failure.
    #[default]
    Abort,
    /// Re-attempt a failed sample while the error is transient, up to
    /// `max_attempts` attempts in total, then end the run.
    Retry {
        /// Total attempts per sample, including the first.
        max_attempts: u32,
    },
}

impl SampleErrorPolicy {
    /// Total attempts allowed for one sample.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::Abort => 1,
            Self::Retry { max_attempts } => (*max_attempts).max(1),
        }
    }
}

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, not yet started.
    Ready,
    /// Acquiring.
    Running,
    /// The whole raster was acquired.
    Completed,
    /// Stopped early, by request or by a device error.
    Cancelled,
}

/// Outcome of the inner acquisition loop.
enum Halt {
    Exhausted,
    Cancelled,
}

/// One acquisition run over a generated raster.
#[derive(Debug)]
pub struct AcquisitionEngine {
    pattern: ScanPattern,
    channels: AxisChannels,
    policy: SampleErrorPolicy,
    run_id: u64,
    state: EngineState,
    acquired: usize,
}

impl AcquisitionEngine {
    /// Creates an engine for `pattern`, driving the given axis channels.
    #[must_use]
    pub fn new(pattern: ScanPattern, channels: AxisChannels) -> Self {
        Self {
            pattern,
            channels,
            policy: SampleErrorPolicy::default(),
            run_id: 0,
            state: EngineState::Ready,
            acquired: 0,
        }
    }

    /// Sets the per-sample error policy.
    #[must_use]
    pub fn with_policy(mut self, policy: SampleErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Tags the run's report with `run_id`.
    #[must_use]
    pub fn with_run_id(mut self, run_id: u64) -> Self {
        self.run_id = run_id;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Parameters of the raster being acquired.
    #[must_use]
    pub fn params(&self) -> &ScanParameters {
        self.pattern.params()
    }

    /// Pixel updates emitted so far.
    #[must_use]
    pub fn acquired(&self) -> usize {
        self.acquired
    }

    /// Runs the acquisition to a terminal state.
    ///
    /// Pixel updates and the final report are sent on `tx`; the report is
    /// also returned. A dropped receiver is treated as a cancellation
    /// request. Calling `run` on an engine that already ran returns a
    /// failed report without touching the devices or sending anything.
    pub fn run<A, S>(
        &mut self,
        actuator: &mut A,
        sampler: &mut S,
        cancel: &AtomicBool,
        tx: &Sender<EngineEvent>,
    ) -> ScanReport
    where
        A: DeflectionActuator + ?Sized,
        S: DetectorSampler + ?Sized,
    {
        let start = Instant::now();
        let total_pixels = self.params().total_pixels();

        if self.state != EngineState::Ready {
            warn!("scan run {}: engine already ran", self.run_id);
            return ScanReport {
                run_id: self.run_id,
                status: ScanStatus::Failed(Error::InvalidParameters(
                    "acquisition engine has already run".to_string(),
                )),
                pixels_acquired: self.acquired,
                total_pixels,
                elapsed: start.elapsed(),
                shutdown_error: None,
            };
        }

        let params = *self.params();
        info!(
            "scan run {}: {}x{} pixels, {} samples/pixel, range {:?}",
            self.run_id,
            params.resolution,
            params.resolution,
            params.samples_per_pixel,
            params.value_range
        );
        self.state = EngineState::Running;

        let status = match self
            .enable_outputs(actuator)
            .and_then(|()| self.acquire(actuator, sampler, cancel, tx))
        {
            Ok(Halt::Exhausted) => ScanStatus::Completed,
            Ok(Halt::Cancelled) => ScanStatus::Cancelled,
            Err(err) => {
                error!("scan run {} aborted: {err}", self.run_id);
                ScanStatus::Failed(err)
            }
        };

        let shutdown_error = self.zero_outputs(actuator);
        self.state = match status {
            ScanStatus::Completed => EngineState::Completed,
            ScanStatus::Cancelled | ScanStatus::Failed(_) => EngineState::Cancelled,
        };

        let report = ScanReport {
            run_id: self.run_id,
            status,
            pixels_acquired: self.acquired,
            total_pixels,
            elapsed: start.elapsed(),
            shutdown_error,
        };
        info!(
            "scan run {} finished: {:?}, {}/{} pixels in {:.2}s",
            self.run_id,
            report.status,
            report.pixels_acquired,
            report.total_pixels,
            report.elapsed.as_secs_f64()
        );
        let _ = tx.send(EngineEvent::Finished(report.clone()));
        report
    }

    fn enable_outputs<A>(&self, actuator: &mut A) -> Result<()>
    where
        A: DeflectionActuator + ?Sized,
    {
        for channel in self.channels.both() {
            actuator.set_output_enabled(channel, true)?;
        }
        Ok(())
    }

    fn acquire<A, S>(
        &mut self,
        actuator: &mut A,
        sampler: &mut S,
        cancel: &AtomicBool,
        tx: &Sender<EngineEvent>,
    ) -> Result<Halt>
    where
        A: DeflectionActuator + ?Sized,
        S: DetectorSampler + ?Sized,
    {
        let resolution = self.params().resolution;
        let samples_per_pixel = self.params().samples_per_pixel;

        for pixel in 0..self.params().total_pixels() {
            if cancel.load(Ordering::SeqCst) {
                return Ok(Halt::Cancelled);
            }

            let mut sum = 0.0;
            for sample in 0..samples_per_pixel {
                let index = pixel * samples_per_pixel + sample;
                match self.acquire_sample(actuator, sampler, index, cancel)? {
                    Some(value) => sum += value,
                    None => return Ok(Halt::Cancelled),
                }
            }

            #[allow(clippy::cast_precision_loss)]
            let mean = sum / samples_per_pixel as f64;
            let update = PixelUpdate::from_index(pixel, resolution, mean);
            if tx.send(EngineEvent::Pixel(update)).is_err() {
                debug!("scan run {}: event receiver gone, stopping", self.run_id);
                return Ok(Halt::Cancelled);
            }
            self.acquired += 1;
        }

        Ok(Halt::Exhausted)
    }

    /// Commands the deflection for sample `index` and reads the detector.
    ///
    /// Returns `Ok(None)` when cancellation is observed before an attempt.
    fn acquire_sample<A, S>(
        &self,
        actuator: &mut A,
        sampler: &mut S,
        index: usize,
        cancel: &AtomicBool,
    ) -> Result<Option<f64>>
    where
        A: DeflectionActuator + ?Sized,
        S: DetectorSampler + ?Sized,
    {
        let x = self.pattern.x()[index];
        let y = self.pattern.y()[index];
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1;

        loop {
            if cancel.load(Ordering::SeqCst) {
                return Ok(None);
            }

            let reading = actuator
                .set_commanded_value(self.channels.x, x)
                .and_then(|()| actuator.set_commanded_value(self.channels.y, y))
                .and_then(|()| sampler.read_intensity());

            match reading {
                Ok(value) => return Ok(Some(value)),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    warn!(
                        "scan run {}: sample {index} attempt {attempt}/{max_attempts} failed: {err}",
                        self.run_id
                    );
                    attempt += 1;
                }
                Err(err) => {
                    warn!("scan run {}: sample {index} failed: {err}", self.run_id);
                    return Err(err);
                }
            }
        }
    }

    /// Zeroes both axis channels, attempting each even if the other fails.
    fn zero_outputs<A>(&self, actuator: &mut A) -> Option<Error>
    where
        A: DeflectionActuator + ?Sized,
    {
        let mut first_error = None;
        for channel in self.channels.both() {
            if let Err(err) = actuator.zero(channel) {
                error!(
                    "scan run {}: failed to zero {channel}: {err}",
                    self.run_id
                );
                first_error.get_or_insert(err);
            }
        }
        first_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use semscan_core::ChannelId;
    use std::collections::VecDeque;
    use std::sync::mpsc::channel;

    #[derive(Default)]
    struct FakeActuator {
        writes: Vec<(ChannelId, f64)>,
        zeroed: Vec<ChannelId>,
        enabled: Vec<ChannelId>,
        fail_writes: usize,
    }

    impl DeflectionActuator for FakeActuator {
        fn set_commanded_value(&mut self, channel: ChannelId, value: f64) -> Result<()> {
            if self.fail_writes > 0 {
                self.fail_writes -= 1;
                return Err(Error::DeviceIo("bus timeout".to_string()));
            }
            self.writes.push((channel, value));
            Ok(())
        }

        fn set_output_enabled(&mut self, channel: ChannelId, enabled: bool) -> Result<()> {
            if enabled {
                self.enabled.push(channel);
            }
            Ok(())
        }

        fn zero(&mut self, channel: ChannelId) -> Result<()> {
            self.zeroed.push(channel);
            Ok(())
        }
    }

    struct ScriptedSampler {
        readings: VecDeque<Result<f64>>,
    }

    impl ScriptedSampler {
        fn new(readings: impl IntoIterator<Item = Result<f64>>) -> Self {
            Self {
                readings: readings.into_iter().collect(),
            }
        }
    }

    impl DetectorSampler for ScriptedSampler {
        fn read_intensity(&mut self) -> Result<f64> {
            self.readings.pop_front().unwrap_or(Ok(0.0))
        }
    }

    fn engine(resolution: usize, samples_per_pixel: usize) -> AcquisitionEngine {
        let params = ScanParameters::new((0.0, 10.0), resolution, samples_per_pixel).unwrap();
        AcquisitionEngine::new(ScanPattern::new(params).unwrap(), AxisChannels::default())
    }

    fn pixels(rx: &std::sync::mpsc::Receiver<EngineEvent>) -> Vec<PixelUpdate> {
        rx.try_iter()
            .filter_map(|event| match event {
                EngineEvent::Pixel(update) => Some(update),
                EngineEvent::Finished(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_mean_of_dwell_samples() {
        let mut engine = engine(1, 3);
        let mut actuator = FakeActuator::default();
        let mut sampler = ScriptedSampler::new([Ok(10.0), Ok(20.0), Ok(30.0)]);
        let (tx, rx) = channel();

        let report = engine.run(&mut actuator, &mut sampler, &AtomicBool::new(false), &tx);

        assert!(report.is_completed());
        let updates = pixels(&rx);
        assert_eq!(updates.len(), 1);
        assert_relative_eq!(updates[0].intensity, 20.0);
    }

    #[test]
    fn test_commands_follow_pattern() {
        let mut engine = engine(2, 2);
        let mut actuator = FakeActuator::default();
        let mut sampler = ScriptedSampler::new([]);
        let (tx, _rx) = channel();

        engine.run(&mut actuator, &mut sampler, &AtomicBool::new(false), &tx);

        let xs: Vec<f64> = actuator
            .writes
            .iter()
            .filter(|(ch, _)| *ch == ChannelId(1))
            .map(|(_, v)| *v)
            .collect();
        let ys: Vec<f64> = actuator
            .writes
            .iter()
            .filter(|(ch, _)| *ch == ChannelId(2))
            .map(|(_, v)| *v)
            .collect();
        assert_eq!(xs, vec![0.0, 0.0, 10.0, 10.0, 0.0, 0.0, 10.0, 10.0]);
        assert_eq!(ys, vec![0.0, 0.0, 0.0, 0.0, 10.0, 10.0, 10.0, 10.0]);
        assert_eq!(actuator.enabled, vec![ChannelId(1), ChannelId(2)]);
    }

    #[test]
    fn test_finished_is_last_event() {
        let mut engine = engine(3, 1);
        let (tx, rx) = channel();
        engine.run(
            &mut FakeActuator::default(),
            &mut ScriptedSampler::new([]),
            &AtomicBool::new(false),
            &tx,
        );

        let events: Vec<EngineEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 10);
        assert!(matches!(events.last(), Some(EngineEvent::Finished(_))));
        let finished = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::Finished(_)))
            .count();
        assert_eq!(finished, 1);
        assert_eq!(engine.state(), EngineState::Completed);
    }

    #[test]
    fn test_pre_cancelled_run_zeroes_once() {
        let mut engine = engine(4, 2);
        let mut actuator = FakeActuator::default();
        let (tx, rx) = channel();

        let report = engine.run(
            &mut actuator,
            &mut ScriptedSampler::new([]),
            &AtomicBool::new(true),
            &tx,
        );

        assert_eq!(report.status, ScanStatus::Cancelled);
        assert_eq!(report.pixels_acquired, 0);
        assert!(actuator.writes.is_empty());
        assert_eq!(actuator.zeroed, vec![ChannelId(1), ChannelId(2)]);
        assert!(pixels(&rx).is_empty());
        assert_eq!(engine.state(), EngineState::Cancelled);
    }

    /// Raises the cancel flag once `cancel_after` readings have been taken.
    struct CancellingSampler<'a> {
        cancel: &'a AtomicBool,
        cancel_after: usize,
        reads: usize,
    }

    impl DetectorSampler for CancellingSampler<'_> {
        fn read_intensity(&mut self) -> Result<f64> {
            self.reads += 1;
            if self.reads == self.cancel_after {
                self.cancel.store(true, Ordering::SeqCst);
            }
            Ok(7.0)
        }
    }

    #[test]
    fn test_cancel_mid_dwell_discards_partial_pixel() {
        let mut engine = engine(2, 3);
        let mut actuator = FakeActuator::default();
        let cancel = AtomicBool::new(false);
        // first reading of the second pixel
        let mut sampler = CancellingSampler {
            cancel: &cancel,
            cancel_after: 4,
            reads: 0,
        };
        let (tx, rx) = channel();

        let report = engine.run(&mut actuator, &mut sampler, &cancel, &tx);

        assert_eq!(report.status, ScanStatus::Cancelled);
        assert_eq!(report.pixels_acquired, 1);
        assert_eq!(sampler.reads, 4);
        assert_eq!(actuator.writes.len(), 4 * 2);
        assert_eq!(actuator.zeroed, vec![ChannelId(1), ChannelId(2)]);

        let events: Vec<EngineEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        match &events[0] {
            EngineEvent::Pixel(update) => {
                assert_eq!((update.row, update.col), (0, 0));
                assert_relative_eq!(update.intensity, 7.0);
            }
            EngineEvent::Finished(_) => panic!("expected the first pixel"),
        }
        assert!(matches!(events[1], EngineEvent::Finished(_)));
        assert_eq!(engine.acquired(), 1);
        assert_eq!(engine.state(), EngineState::Cancelled);
    }

    #[test]
    fn test_abort_policy_fails_on_first_error() {
        let mut engine = engine(2, 1);
        let mut actuator = FakeActuator::default();
        let mut sampler = ScriptedSampler::new([
            Ok(1.0),
            Err(Error::DeviceIo("read timeout".to_string())),
            Ok(3.0),
        ]);
        let (tx, rx) = channel();

        let report = engine.run(&mut actuator, &mut sampler, &AtomicBool::new(false), &tx);

        assert_eq!(
            report.status,
            ScanStatus::Failed(Error::DeviceIo("read timeout".to_string()))
        );
        assert_eq!(report.pixels_acquired, 1);
        assert_eq!(pixels(&rx).len(), 1);
        assert_eq!(actuator.zeroed.len(), 2);
        assert_eq!(engine.state(), EngineState::Cancelled);
    }

    #[test]
    fn test_retry_policy_recovers_transient_errors() {
        let mut engine = engine(2, 1).with_policy(SampleErrorPolicy::Retry { max_attempts: 3 });
        let mut actuator = FakeActuator {
            fail_writes: 2,
            ..FakeActuator::default()
        };
        let mut sampler = ScriptedSampler::new([Ok(5.0), Ok(5.0), Ok(5.0), Ok(5.0)]);
        let (tx, rx) = channel();

        let report = engine.run(&mut actuator, &mut sampler, &AtomicBool::new(false), &tx);

        assert!(report.is_completed());
        assert_eq!(pixels(&rx).len(), 4);
    }

    #[test]
    fn test_retry_policy_gives_up() {
        let mut engine = engine(2, 1).with_policy(SampleErrorPolicy::Retry { max_attempts: 2 });
        let mut actuator = FakeActuator {
            fail_writes: 2,
            ..FakeActuator::default()
        };
        let (tx, _rx) = channel();

        let report = engine.run(
            &mut actuator,
            &mut ScriptedSampler::new([]),
            &AtomicBool::new(false),
            &tx,
        );

        assert!(report.is_failed());
        assert_eq!(report.pixels_acquired, 0);
    }

    #[test]
    fn test_out_of_range_is_never_retried() {
        let mut engine = engine(2, 1).with_policy(SampleErrorPolicy::Retry { max_attempts: 5 });
        let out_of_range = Error::OutOfRange {
            channel: ChannelId(1),
            value: 2.0,
            min: 0.0,
            max: 1.0,
        };
        let mut sampler = ScriptedSampler::new([Err(out_of_range.clone()), Ok(1.0)]);
        let (tx, _rx) = channel();

        let report = engine.run(
            &mut FakeActuator::default(),
            &mut sampler,
            &AtomicBool::new(false),
            &tx,
        );

        assert_eq!(report.status, ScanStatus::Failed(out_of_range));
    }

    #[test]
    fn test_second_run_is_rejected() {
        let mut engine = engine(1, 1);
        let mut actuator = FakeActuator::default();
        let (tx, rx) = channel();
        engine.run(
            &mut actuator,
            &mut ScriptedSampler::new([]),
            &AtomicBool::new(false),
            &tx,
        );
        let _ = rx.try_iter().count();

        let report = engine.run(
            &mut actuator,
            &mut ScriptedSampler::new([]),
            &AtomicBool::new(false),
            &tx,
        );

        assert!(report.is_failed());
        assert_eq!(actuator.zeroed.len(), 2);
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn test_policy_attempts() {
        assert_eq!(SampleErrorPolicy::Abort.max_attempts(), 1);
        assert_eq!(SampleErrorPolicy::Retry { max_attempts: 0 }.max_attempts(), 1);
        assert_eq!(SampleErrorPolicy::Retry { max_attempts: 4 }.max_attempts(), 4);
    }
}
