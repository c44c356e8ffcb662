//! Deadline-paced acquisition loop.
//!
//! Each cycle has a fixed deadline of `start + period`. Within a cycle the
//! scheduler grabs the freshest camera frame, pulses the trigger, performs one
//! bounded receiver read, validates the fix and hands the assembled sample to
//! the sink. Whatever time is left until the deadline is slept away; a cycle
//! that finishes late reports the overrun and the next one starts at once.
//!
//! ```text
//! Initializing ──both open──▶ Running ◀──reconnect ok──┐
//!       │                       │                      │
//!       │                   device lost ──▶ Degraded ──┘
//!       └──────── shutdown flag ────────▶ ShuttingDown
//! ```
//!
//! The loop is single threaded. Shutdown is observed only between cycles and
//! between initialization attempts.

use chrono::{DateTime, Utc};
use std::fmt;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::CaptureConfig;
use crate::error::AcquisitionError;
use crate::fix::{classify_fix, NavigationFix};
use crate::frame::ImageFrame;
use crate::ingest::{FrameSource, ImagingAdapter};
use crate::sample::{AcquisitionSample, Disposition};
use crate::sbf::{Decoded, SbfReader};
use crate::sink::TelemetrySink;
use crate::trigger::{DisabledTrigger, Trigger};

/// Time source for pacing.
pub trait Clock {
    fn now(&self) -> Instant;

    fn sleep(&mut self, duration: Duration);

    fn wall_time(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Opens the two acquisition devices. Called again after a device is lost.
pub trait DeviceProvider {
    type Stream: Read;
    type Camera: FrameSource;

    fn open_receiver(&mut self) -> Result<Self::Stream, AcquisitionError>;

    fn open_camera(&mut self) -> Result<Self::Camera, AcquisitionError>;
}

/// Which samples are forwarded downstream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ForwardPolicy {
    /// Forward only samples whose fix passed validation.
    #[default]
    ValidOnly,
    /// Bench mode: forward everything, still flagging invalid fixes.
    Always,
}

#[derive(Clone, Debug)]
pub struct SchedulerSettings {
    pub period: Duration,
    pub retry_interval: Duration,
    pub stale_frames: usize,
    pub forward: ForwardPolicy,
    /// Stop after this many cycles; `None` runs until shutdown.
    pub max_cycles: Option<u64>,
}

impl SchedulerSettings {
    pub fn from_config(cfg: &CaptureConfig) -> Self {
        Self {
            period: cfg.period,
            retry_interval: cfg.retry_interval,
            stale_frames: cfg.camera.stale_frames,
            forward: if cfg.forward_invalid {
                ForwardPolicy::Always
            } else {
                ForwardPolicy::ValidOnly
            },
            max_cycles: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Initializing,
    Running,
    Degraded,
    ShuttingDown,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Initializing => "initializing",
            SchedulerState::Running => "running",
            SchedulerState::Degraded => "degraded",
            SchedulerState::ShuttingDown => "shutting down",
        };
        f.write_str(name)
    }
}

/// Outcome of one call to [`Scheduler::run_cycle`].
#[derive(Clone, Debug, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    /// State after the cycle completed.
    pub state: SchedulerState,
    pub produced_sample: bool,
    pub valid_fix: bool,
    pub disposition: Option<Disposition>,
    /// Set when the cycle finished after its deadline.
    pub overrun: Option<Duration>,
    pub slept: Duration,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub cycles: u64,
    pub samples: u64,
    pub forwarded: u64,
    pub suppressed: u64,
    pub invalid_fixes: u64,
    pub capture_failures: u64,
    pub overruns: u64,
    pub skipped: u64,
    pub init_attempts: u64,
    /// Reconnection attempts made while degraded.
    pub reconnects: u64,
    pub sink_errors: u64,
}

impl fmt::Display for SchedulerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycles={} samples={} forwarded={} suppressed={} invalid_fixes={} \
             capture_failures={} overruns={} skipped={} reconnects={}",
            self.cycles,
            self.samples,
            self.forwarded,
            self.suppressed,
            self.invalid_fixes,
            self.capture_failures,
            self.overruns,
            self.skipped,
            self.reconnects
        )
    }
}

pub struct Scheduler<P: DeviceProvider, S, C> {
    settings: SchedulerSettings,
    provider: P,
    sink: S,
    clock: C,
    trigger: Box<dyn Trigger>,
    shutdown: Arc<AtomicBool>,
    state: SchedulerState,
    receiver: Option<SbfReader<P::Stream>>,
    camera: Option<ImagingAdapter<P::Camera>>,
    cycle: u64,
    stats: SchedulerStats,
}

impl<P, S, C> Scheduler<P, S, C>
where
    P: DeviceProvider,
    S: TelemetrySink,
    C: Clock,
{
    pub fn new(settings: SchedulerSettings, provider: P, sink: S, clock: C) -> Self {
        Self {
            settings,
            provider,
            sink,
            clock,
            trigger: Box::new(DisabledTrigger),
            shutdown: Arc::new(AtomicBool::new(false)),
            state: SchedulerState::Initializing,
            receiver: None,
            camera: None,
            cycle: 0,
            stats: SchedulerStats::default(),
        }
    }

    pub fn with_trigger(mut self, trigger: Box<dyn Trigger>) -> Self {
        self.trigger = trigger;
        self
    }

    /// Share an externally owned shutdown flag (e.g. set by a signal handler).
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Open both devices, retrying every `retry_interval` until they are open
    /// or shutdown is requested. Returns the resulting state.
    pub fn initialize(&mut self) -> SchedulerState {
        loop {
            if self.shutdown_requested() {
                self.state = SchedulerState::ShuttingDown;
                return self.state;
            }
            self.stats.init_attempts += 1;
            if self.connect_missing() {
                self.transition(SchedulerState::Running);
                return self.state;
            }
            self.clock.sleep(self.settings.retry_interval);
        }
    }

    /// Run one paced cycle. Returns `None` once the scheduler is shutting down.
    pub fn run_cycle(&mut self) -> Option<CycleReport> {
        if self.state == SchedulerState::Initializing
            && self.initialize() == SchedulerState::ShuttingDown
        {
            return None;
        }
        if self.state == SchedulerState::ShuttingDown {
            return None;
        }

        let start = self.clock.now();
        let target = start + self.settings.period;
        let cycle_started_at = self.clock.wall_time();
        self.cycle += 1;
        self.stats.cycles += 1;

        if self.state == SchedulerState::Degraded {
            self.stats.reconnects += 1;
            if self.connect_missing() {
                self.transition(SchedulerState::Running);
            } else {
                self.stats.skipped += 1;
                log::debug!("cycle {} skipped while degraded", self.cycle);
                let (overrun, slept) = self.pace(target);
                return Some(CycleReport {
                    cycle: self.cycle,
                    state: self.state,
                    produced_sample: false,
                    valid_fix: false,
                    disposition: None,
                    overrun,
                    slept,
                });
            }
        }

        let image = self.acquire_frame();
        if let Err(err) = self.trigger.pulse() {
            self.report(log::Level::Warn, format!("trigger pulse failed: {}", err));
        }
        let fix = self.acquire_fix();

        let verdict = classify_fix(fix.as_ref());
        let overrun = self.clock.now().saturating_duration_since(target);
        let sample = AcquisitionSample {
            cycle: self.cycle,
            cycle_started_at,
            image,
            fix,
            valid: verdict.is_ok(),
            rejection: verdict.err(),
            overrun,
        };
        let disposition = self.dispose(&sample);
        if let Err(err) = self.sink.publish(&sample, disposition) {
            self.stats.sink_errors += 1;
            log::error!("telemetry sink rejected cycle {}: {:#}", sample.cycle, err);
        }
        self.stats.samples += 1;

        if self.receiver.is_none() || self.camera.is_none() {
            self.transition(SchedulerState::Degraded);
        }

        let (overrun, slept) = self.pace(target);
        Some(CycleReport {
            cycle: self.cycle,
            state: self.state,
            produced_sample: true,
            valid_fix: sample.valid,
            disposition: Some(disposition),
            overrun,
            slept,
        })
    }

    /// Initialize, then cycle until shutdown or `max_cycles`. Device handles
    /// are released before returning.
    pub fn run(mut self) -> SchedulerStats {
        log::info!(
            "acquisition loop starting: period {:?}, forwarding {:?}",
            self.settings.period,
            self.settings.forward
        );
        loop {
            if self.shutdown_requested() {
                log::info!("shutdown requested");
                break;
            }
            if let Some(max) = self.settings.max_cycles {
                if self.cycle >= max {
                    log::info!("reached {} cycles", max);
                    break;
                }
            }
            if self.run_cycle().is_none() {
                break;
            }
        }
        self.finish()
    }

    fn finish(mut self) -> SchedulerStats {
        self.transition(SchedulerState::ShuttingDown);
        self.release_receiver();
        self.camera = None;
        if let Err(err) = self.sink.flush() {
            log::error!("telemetry flush failed: {:#}", err);
        }
        log::info!("acquisition loop stopped: {}", self.stats);
        self.stats
    }

    /// Try to open each device that is not currently open. Returns true when
    /// both are open afterwards.
    fn connect_missing(&mut self) -> bool {
        if self.receiver.is_none() {
            match self.provider.open_receiver() {
                Ok(stream) => {
                    log::info!("receiver connected");
                    self.receiver = Some(SbfReader::new(stream));
                }
                Err(err) => self.report(log::Level::Error, err.to_string()),
            }
        }
        if self.camera.is_none() {
            match self.provider.open_camera() {
                Ok(camera) => {
                    log::info!("camera connected");
                    self.camera = Some(ImagingAdapter::new(camera, self.settings.stale_frames));
                }
                Err(err) => self.report(log::Level::Error, err.to_string()),
            }
        }
        self.receiver.is_some() && self.camera.is_some()
    }

    fn acquire_frame(&mut self) -> Option<ImageFrame> {
        match self.camera.as_mut().map(|camera| camera.latest_frame())? {
            Ok(frame) => Some(frame),
            Err(err) if err.is_device_unavailable() => {
                self.camera = None;
                self.report(log::Level::Error, format!("camera lost: {}", err));
                None
            }
            Err(err) => {
                self.stats.capture_failures += 1;
                self.report(log::Level::Warn, format!("failed to capture image: {}", err));
                None
            }
        }
    }

    fn acquire_fix(&mut self) -> Option<NavigationFix> {
        match self.receiver.as_mut().map(|receiver| receiver.read())? {
            Ok(outcome) => {
                if let Err(err) = self.sink.archive_raw(&outcome.raw) {
                    self.stats.sink_errors += 1;
                    log::error!("raw archive write failed: {:#}", err);
                }
                match outcome.decoded {
                    Decoded::FixRecord(fix) => Some(fix),
                    Decoded::Ignored(id) => {
                        self.report(
                            log::Level::Warn,
                            format!("no fix block this cycle; last block was {}", id),
                        );
                        None
                    }
                    Decoded::NoMessage => {
                        self.report(
                            log::Level::Warn,
                            "no parsable data from the receiver".to_string(),
                        );
                        None
                    }
                }
            }
            Err(err) => {
                self.release_receiver();
                self.report(log::Level::Error, format!("receiver lost: {}", err));
                None
            }
        }
    }

    fn dispose(&mut self, sample: &AcquisitionSample) -> Disposition {
        if let Some(reason) = sample.rejection {
            self.stats.invalid_fixes += 1;
            self.report(log::Level::Warn, format!("invalid fix: {}", reason));
        }
        let disposition = if sample.valid || self.settings.forward == ForwardPolicy::Always {
            self.stats.forwarded += 1;
            Disposition::Forward
        } else {
            self.stats.suppressed += 1;
            Disposition::Suppress
        };
        log::debug!("cycle {} disposition {:?}", sample.cycle, disposition);
        disposition
    }

    /// Sleep until `target`, or report how late the cycle already is.
    fn pace(&mut self, target: Instant) -> (Option<Duration>, Duration) {
        let now = self.clock.now();
        match now.checked_duration_since(target) {
            Some(late) if !late.is_zero() => {
                self.stats.overruns += 1;
                self.report(
                    log::Level::Warn,
                    format!("cycle {} overran its period by {:?}", self.cycle, late),
                );
                (Some(late), Duration::ZERO)
            }
            _ => {
                let remaining = target.saturating_duration_since(now);
                self.clock.sleep(remaining);
                (None, remaining)
            }
        }
    }

    fn release_receiver(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            let stats = receiver.stats();
            log::info!(
                "receiver released: {} reads, {} bytes, {} blocks, {} fixes, {} malformed",
                stats.reads,
                stats.bytes,
                stats.blocks,
                stats.fixes,
                stats.malformed
            );
        }
    }

    fn transition(&mut self, next: SchedulerState) {
        if self.state != next {
            let message = format!("scheduler {} -> {}", self.state, next);
            self.state = next;
            self.report(log::Level::Info, message);
        }
    }

    /// Log and mirror into the capture log.
    fn report(&mut self, level: log::Level, message: String) {
        log::log!(level, "{}", message);
        if let Err(err) = self.sink.note(level, &message) {
            self.stats.sink_errors += 1;
            log::error!("telemetry note failed: {:#}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bench_mode_forwards_everything() {
        let mut cfg = CaptureConfig::default();
        assert_eq!(
            SchedulerSettings::from_config(&cfg).forward,
            ForwardPolicy::ValidOnly
        );
        cfg.forward_invalid = true;
        let settings = SchedulerSettings::from_config(&cfg);
        assert_eq!(settings.forward, ForwardPolicy::Always);
        assert_eq!(settings.period, Duration::from_secs(1));
        assert_eq!(settings.max_cycles, None);
    }

    #[test]
    fn stats_summary_is_single_line() {
        let stats = SchedulerStats {
            cycles: 4,
            samples: 3,
            skipped: 1,
            ..SchedulerStats::default()
        };
        let line = stats.to_string();
        assert!(line.starts_with("cycles=4 samples=3"));
        assert!(line.contains("skipped=1"));
        assert!(!line.contains('\n'));
    }
}
