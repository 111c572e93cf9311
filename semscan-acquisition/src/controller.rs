//! Scan lifecycle: start, stop, restart and event relay.
//!
//! The controller lives on the interactive thread. It never performs an
//! actuator write or detector read while a run is active: the devices are
//! moved into the worker thread for the run's duration and handed back when
//! the worker is joined. Only after that join does the controller zero the
//! outputs a second time, so the two zeroings can never interleave.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use semscan_core::{
    AxisChannels, ChannelBounds, DeflectionActuator, DetectorSampler, PixelUpdate, ScanImage,
    ScanParameters, ScanPattern,
};

use crate::engine::{AcquisitionEngine, SampleErrorPolicy};
use crate::error::{Error, Result};
use crate::message::{EngineEvent, ScanReport, ScanStatus};
use crate::sink::{DisplaySink, ScanProgress};

/// Default minimum spacing of progress notifications.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No run has been started.
    Idle,
    /// A worker is acquiring.
    Running,
    /// Cancellation signalled, waiting for the worker to exit.
    ///
    /// Only held for the duration of [`ScanController::stop`], which joins
    /// the worker before returning, so callers observe `Finished` afterwards.
    StopRequested,
    /// The last run reached a terminal state.
    Finished,
}

struct Devices<A, S> {
    actuator: A,
    sampler: S,
}

struct ActiveRun<A, S> {
    id: u64,
    cancel: Arc<AtomicBool>,
    worker: JoinHandle<Devices<A, S>>,
    events: Receiver<EngineEvent>,
}

/// Owns the scan devices and runs at most one acquisition at a time.
pub struct ScanController<A, S, K>
where
    A: DeflectionActuator + Send + 'static,
    S: DetectorSampler + Send + 'static,
    K: DisplaySink,
{
    devices: Option<Devices<A, S>>,
    channels: AxisChannels,
    bounds: [Option<ChannelBounds>; 2],
    policy: SampleErrorPolicy,
    progress_interval: Duration,
    image: ScanImage,
    sink: K,
    state: RunState,
    run: Option<ActiveRun<A, S>>,
    next_run_id: u64,
    progress: ScanProgress,
    last_progress: Instant,
    last_report: Option<ScanReport>,
}

impl<A, S, K> ScanController<A, S, K>
where
    A: DeflectionActuator + Send + 'static,
    S: DetectorSampler + Send + 'static,
    K: DisplaySink,
{
    /// Creates a controller owning `actuator` and `sampler`.
    ///
    /// Channel bounds are read from the actuator once, here, so parameter
    /// checks never need the devices while they are lent out.
    #[must_use]
    pub fn new(actuator: A, sampler: S, channels: AxisChannels, sink: K) -> Self {
        let bounds = [actuator.bounds(channels.x), actuator.bounds(channels.y)];
        Self {
            devices: Some(Devices { actuator, sampler }),
            channels,
            bounds,
            policy: SampleErrorPolicy::default(),
            progress_interval: PROGRESS_INTERVAL,
            image: ScanImage::default(),
            sink,
            state: RunState::Idle,
            run: None,
            next_run_id: 1,
            progress: ScanProgress::default(),
            last_progress: Instant::now(),
            last_report: None,
        }
    }

    /// Sets the per-sample error policy for subsequent runs.
    #[must_use]
    pub fn with_policy(mut self, policy: SampleErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the minimum spacing of progress notifications.
    #[must_use]
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Returns true while a worker is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// The image of the current (or last) run.
    #[must_use]
    pub fn image(&self) -> &ScanImage {
        &self.image
    }

    /// The display sink.
    #[must_use]
    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// The display sink, mutably.
    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }

    /// Report of the most recently finished run.
    #[must_use]
    pub fn last_report(&self) -> Option<&ScanReport> {
        self.last_report.as_ref()
    }

    /// Pixel progress of the current (or last) run.
    #[must_use]
    pub fn progress(&self) -> ScanProgress {
        self.progress
    }

    /// The actuator, when no run holds it.
    #[must_use]
    pub fn actuator(&self) -> Option<&A> {
        self.devices.as_ref().map(|d| &d.actuator)
    }

    /// The sampler, when no run holds it.
    #[must_use]
    pub fn sampler(&self) -> Option<&S> {
        self.devices.as_ref().map(|d| &d.sampler)
    }

    /// Starts a new scan.
    ///
    /// Parameters are validated (including against the axis channel bounds)
    /// before anything else happens; a rejected configuration leaves any
    /// active run untouched. A run still in flight is then fully stopped,
    /// zeroed and joined before the new worker is launched.
    ///
    /// # Errors
    /// Returns [`semscan_core::Error::InvalidParameters`] for a rejected
    /// configuration, or the error of stopping the previous run.
    pub fn start(&mut self, params: ScanParameters) -> Result<()> {
        params.validate()?;
        for (axis, bounds) in [("x", &self.bounds[0]), ("y", &self.bounds[1])] {
            if let Some(bounds) = bounds {
                params.check_bounds(axis, bounds)?;
            }
        }
        let pattern = ScanPattern::new(params)?;

        if self.run.is_some() {
            debug!("restart requested, stopping the active run first");
            self.stop()?;
        }

        let Devices {
            mut actuator,
            mut sampler,
        } = self.devices.take().ok_or(Error::DevicesUnavailable)?;

        self.image.reset(params.resolution);
        self.progress = ScanProgress {
            done: 0,
            total: params.total_pixels(),
        };
        self.last_progress = Instant::now();

        let id = self.next_run_id;
        self.next_run_id += 1;
        let mut engine = AcquisitionEngine::new(pattern, self.channels)
            .with_policy(self.policy)
            .with_run_id(id);

        let (tx, events) = channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let worker = thread::spawn(move || {
            engine.run(&mut actuator, &mut sampler, &flag, &tx);
            Devices { actuator, sampler }
        });

        self.run = Some(ActiveRun {
            id,
            cancel,
            worker,
            events,
        });
        self.state = RunState::Running;
        debug!("scan run {id} launched");
        Ok(())
    }

    /// Stops the active run and waits for its worker to exit.
    ///
    /// When this returns the outputs have been zeroed and no further pixel
    /// update will be delivered for the run. A no-op without an active run.
    ///
    /// # Errors
    /// Returns [`Error::WorkerPanicked`] if the worker died, or an image
    /// error raised while applying the last pixel updates.
    pub fn stop(&mut self) -> Result<()> {
        let Some(run) = self.run.take() else {
            return Ok(());
        };
        debug!("scan run {}: stop requested", run.id);
        self.state = RunState::StopRequested;
        run.cancel.store(true, Ordering::SeqCst);
        self.finish_run(run, None).map(|_| ())
    }

    /// Applies pending worker events without blocking.
    ///
    /// Call this from the interactive loop. Returns the report when the run
    /// finished during this call.
    ///
    /// # Errors
    /// See [`ScanController::stop`].
    pub fn poll(&mut self) -> Result<Option<ScanReport>> {
        loop {
            let next = match self.run.as_ref() {
                Some(run) => run.events.try_recv(),
                None => return Ok(None),
            };
            match next {
                Ok(EngineEvent::Pixel(update)) => self.apply_pixel(&update)?,
                Ok(EngineEvent::Finished(report)) => return self.finish_taken(Some(report)),
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => return self.finish_taken(None),
            }
        }
    }

    /// Blocks until the active run finishes, applying its events.
    ///
    /// Returns `None` if no run is active.
    ///
    /// # Errors
    /// See [`ScanController::stop`].
    pub fn wait(&mut self) -> Result<Option<ScanReport>> {
        loop {
            let next = match self.run.as_ref() {
                Some(run) => run.events.recv(),
                None => return Ok(None),
            };
            match next {
                Ok(EngineEvent::Pixel(update)) => self.apply_pixel(&update)?,
                Ok(EngineEvent::Finished(report)) => return self.finish_taken(Some(report)),
                Err(_) => return self.finish_taken(None),
            }
        }
    }

    fn apply_pixel(&mut self, update: &PixelUpdate) -> Result<()> {
        self.image.apply(update)?;
        self.progress.done += 1;
        self.sink.on_pixel(update, &self.image);
        if self.last_progress.elapsed() >= self.progress_interval {
            self.sink.on_progress(self.progress, &self.image);
            self.last_progress = Instant::now();
        }
        Ok(())
    }

    fn finish_taken(&mut self, report: Option<ScanReport>) -> Result<Option<ScanReport>> {
        match self.run.take() {
            Some(run) => self.finish_run(run, report).map(Some),
            None => Ok(None),
        }
    }

    /// Joins the worker, drains its remaining events, re-zeroes the outputs
    /// and notifies the sink.
    fn finish_run(
        &mut self,
        run: ActiveRun<A, S>,
        report: Option<ScanReport>,
    ) -> Result<ScanReport> {
        let ActiveRun {
            id, worker, events, ..
        } = run;

        let joined = worker.join();

        let mut report = report;
        let mut image_error = None;
        for event in events.try_iter() {
            match event {
                EngineEvent::Pixel(update) => {
                    if let Err(err) = self.apply_pixel(&update) {
                        image_error.get_or_insert(err);
                    }
                }
                EngineEvent::Finished(finished) => report = Some(finished),
            }
        }

        let panicked = match joined {
            Ok(devices) => {
                self.devices = Some(devices);
                false
            }
            Err(_) => {
                error!("scan run {id}: acquisition worker panicked, devices lost");
                true
            }
        };

        let mut report = report.unwrap_or_else(|| ScanReport {
            run_id: id,
            status: ScanStatus::Failed(semscan_core::Error::DeviceIo(
                "acquisition worker exited without a report".to_string(),
            )),
            pixels_acquired: self.progress.done,
            total_pixels: self.progress.total,
            elapsed: Duration::ZERO,
            shutdown_error: None,
        });

        if let Some(devices) = self.devices.as_mut() {
            for channel in self.channels.both() {
                if let Err(err) = devices.actuator.zero(channel) {
                    warn!("scan run {id}: failed to re-zero {channel}: {err}");
                    report.shutdown_error.get_or_insert(err);
                }
            }
        }

        self.state = RunState::Finished;
        self.sink.on_progress(self.progress, &self.image);
        self.sink.on_scan_completed(&report);
        info!("scan run {id} closed: {:?}", report.status);
        self.last_report = Some(report.clone());

        if panicked {
            return Err(Error::WorkerPanicked);
        }
        if let Some(err) = image_error {
            return Err(err);
        }
        Ok(report)
    }
}

impl<A, S, K> Drop for ScanController<A, S, K>
where
    A: DeflectionActuator + Send + 'static,
    S: DetectorSampler + Send + 'static,
    K: DisplaySink,
{
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            error!("failed to stop scan on shutdown: {err}");
        }
    }
}
