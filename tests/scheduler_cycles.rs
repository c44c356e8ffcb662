use std::cell::{Cell, RefCell};
use std::io::{self, Read};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nav_capture::error::{AcquisitionError, Device};
use nav_capture::sbf::{encode_pvt_geodetic, BlockId, PvtGeodetic, PVT_GEODETIC};
use nav_capture::{
    AcquisitionSample, Clock, DeviceProvider, Disposition, FixRejection, ForwardPolicy,
    FrameSource, ImageFrame, Scheduler, SchedulerSettings, SchedulerState, TelemetrySink,
    Trigger,
};

const PERIOD: Duration = Duration::from_secs(1);

#[derive(Clone)]
struct ManualClock {
    now: Rc<Cell<Instant>>,
    sleeps: Rc<RefCell<Vec<Duration>>>,
}

impl ManualClock {
    fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
            sleeps: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }

    fn sleep(&mut self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        self.advance(duration);
    }
}

#[derive(Clone)]
enum StreamMode {
    Blocks(Vec<u8>),
    Silent,
    Garbage,
    Disconnected,
}

struct Script {
    stream: StreamMode,
    read_delay: Duration,
    receiver_open_failures: u32,
    camera_open_failures: u32,
    receiver_opens: u32,
    camera_opens: u32,
    camera_read_fails: bool,
    camera_lost: bool,
    live_streams: i32,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            stream: StreamMode::Blocks(fix_bytes(true)),
            read_delay: Duration::ZERO,
            receiver_open_failures: 0,
            camera_open_failures: 0,
            receiver_opens: 0,
            camera_opens: 0,
            camera_read_fails: false,
            camera_lost: false,
            live_streams: 0,
        }
    }
}

type Shared = Rc<RefCell<Script>>;

struct ScriptedStream {
    script: Shared,
    clock: ManualClock,
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (mode, delay) = {
            let script = self.script.borrow();
            (script.stream.clone(), script.read_delay)
        };
        self.clock.advance(delay);
        match mode {
            StreamMode::Blocks(bytes) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            StreamMode::Silent => Err(io::Error::new(io::ErrorKind::TimedOut, "no data")),
            StreamMode::Garbage => {
                let junk = b"\x00\x11$@\xff\xff\x07\x00garbage";
                let n = junk.len().min(buf.len());
                buf[..n].copy_from_slice(&junk[..n]);
                Ok(n)
            }
            StreamMode::Disconnected => {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "cable pulled"))
            }
        }
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.script.borrow_mut().live_streams -= 1;
    }
}

struct ScriptedCamera {
    script: Shared,
    sequence: u64,
}

impl FrameSource for ScriptedCamera {
    fn grab(&mut self) -> Result<(), AcquisitionError> {
        if self.script.borrow().camera_lost {
            return Err(AcquisitionError::unavailable(Device::Camera, "device unplugged"));
        }
        self.sequence += 1;
        Ok(())
    }

    fn read(&mut self) -> Result<ImageFrame, AcquisitionError> {
        if self.script.borrow().camera_lost {
            return Err(AcquisitionError::unavailable(Device::Camera, "device unplugged"));
        }
        self.sequence += 1;
        if self.script.borrow().camera_read_fails {
            return Err(AcquisitionError::CaptureFailure("select timeout".into()));
        }
        Ok(ImageFrame::from_rgb(vec![64; 4 * 3], 2, 2, self.sequence))
    }
}

struct ScriptedDevices {
    script: Shared,
    clock: ManualClock,
}

impl DeviceProvider for ScriptedDevices {
    type Stream = ScriptedStream;
    type Camera = ScriptedCamera;

    fn open_receiver(&mut self) -> Result<ScriptedStream, AcquisitionError> {
        let mut script = self.script.borrow_mut();
        script.receiver_opens += 1;
        if script.receiver_open_failures > 0 {
            script.receiver_open_failures -= 1;
            return Err(AcquisitionError::unavailable(Device::Receiver, "no such port"));
        }
        script.live_streams += 1;
        Ok(ScriptedStream {
            script: Rc::clone(&self.script),
            clock: self.clock.clone(),
        })
    }

    fn open_camera(&mut self) -> Result<ScriptedCamera, AcquisitionError> {
        let mut script = self.script.borrow_mut();
        script.camera_opens += 1;
        if script.camera_open_failures > 0 {
            script.camera_open_failures -= 1;
            return Err(AcquisitionError::unavailable(Device::Camera, "no such device"));
        }
        Ok(ScriptedCamera {
            script: Rc::clone(&self.script),
            sequence: 0,
        })
    }
}

struct Published {
    cycle: u64,
    valid: bool,
    rejection: Option<FixRejection>,
    disposition: Disposition,
    overrun: Duration,
    has_image: bool,
    has_fix: bool,
}

#[derive(Default)]
struct Recorded {
    raw: Vec<u8>,
    published: Vec<Published>,
    notes: Vec<String>,
    flushed: bool,
}

#[derive(Clone, Default)]
struct RecordingSink {
    recorded: Rc<RefCell<Recorded>>,
}

impl TelemetrySink for RecordingSink {
    fn archive_raw(&mut self, raw: &[u8]) -> anyhow::Result<()> {
        self.recorded.borrow_mut().raw.extend_from_slice(raw);
        Ok(())
    }

    fn publish(
        &mut self,
        sample: &AcquisitionSample,
        disposition: Disposition,
    ) -> anyhow::Result<()> {
        self.recorded.borrow_mut().published.push(Published {
            cycle: sample.cycle,
            valid: sample.valid,
            rejection: sample.rejection,
            disposition,
            overrun: sample.overrun,
            has_image: sample.image.is_some(),
            has_fix: sample.fix.is_some(),
        });
        Ok(())
    }

    fn note(&mut self, _level: log::Level, message: &str) -> anyhow::Result<()> {
        self.recorded.borrow_mut().notes.push(message.to_string());
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.recorded.borrow_mut().flushed = true;
        Ok(())
    }
}

struct CountingTrigger(Rc<Cell<u32>>);

impl Trigger for CountingTrigger {
    fn pulse(&mut self) -> Result<(), AcquisitionError> {
        self.0.set(self.0.get() + 1);
        Ok(())
    }
}

/// Requests shutdown through the shared flag on its `limit`th pulse.
struct StopAfter {
    pulses: u32,
    limit: u32,
    shutdown: Arc<AtomicBool>,
}

impl Trigger for StopAfter {
    fn pulse(&mut self) -> Result<(), AcquisitionError> {
        self.pulses += 1;
        if self.pulses == self.limit {
            self.shutdown.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

fn fix_bytes(valid: bool) -> Vec<u8> {
    let pvt = if valid {
        PvtGeodetic {
            time_of_week_ms: 345_600_000,
            week_number: 2345,
            mode: 1,
            error: 0,
            latitude_rad: 0.9104,
            longitude_rad: 0.0794,
            height_m: 96.5,
            undulation_m: 47.1,
            velocity_north_mps: 0.0,
            velocity_east_mps: 0.0,
            velocity_up_mps: 0.0,
            course_over_ground_deg: -2e10,
            time_system: 0,
            datum: 0,
            satellites_used: 11,
            horizontal_accuracy_cm: 120,
            vertical_accuracy_cm: 210,
        }
    } else {
        PvtGeodetic::no_fix(345_600_000, 2345)
    };
    encode_pvt_geodetic(BlockId::new(PVT_GEODETIC, 2), &pvt)
}

struct Rig {
    script: Shared,
    clock: ManualClock,
    sink: RecordingSink,
    scheduler: Scheduler<ScriptedDevices, RecordingSink, ManualClock>,
}

fn rig(forward: ForwardPolicy, script: Script) -> Rig {
    let script = Rc::new(RefCell::new(script));
    let clock = ManualClock::new();
    let sink = RecordingSink::default();
    let settings = SchedulerSettings {
        period: PERIOD,
        retry_interval: Duration::from_secs(1),
        stale_frames: 5,
        forward,
        max_cycles: None,
    };
    let devices = ScriptedDevices {
        script: Rc::clone(&script),
        clock: clock.clone(),
    };
    let scheduler = Scheduler::new(settings, devices, sink.clone(), clock.clone());
    Rig {
        script,
        clock,
        sink,
        scheduler,
    }
}

#[test]
fn sleeps_the_remainder_of_the_period() {
    let mut rig = rig(
        ForwardPolicy::ValidOnly,
        Script {
            read_delay: Duration::from_millis(300),
            ..Script::default()
        },
    );

    let report = rig.scheduler.run_cycle().expect("cycle");
    assert!(report.produced_sample);
    assert_eq!(report.overrun, None);
    assert_eq!(report.slept, Duration::from_millis(700));
    assert_eq!(rig.clock.sleeps(), vec![Duration::from_millis(700)]);
}

#[test]
fn overrun_is_reported_and_next_cycle_starts_immediately() {
    let mut rig = rig(
        ForwardPolicy::ValidOnly,
        Script {
            read_delay: Duration::from_millis(1300),
            ..Script::default()
        },
    );

    let report = rig.scheduler.run_cycle().expect("cycle");
    assert_eq!(report.overrun, Some(Duration::from_millis(300)));
    assert_eq!(report.slept, Duration::ZERO);
    assert!(rig.clock.sleeps().is_empty());
    assert_eq!(rig.scheduler.stats().overruns, 1);

    let recorded = rig.sink.recorded.borrow();
    assert_eq!(recorded.published[0].overrun, Duration::from_millis(300));
    assert!(recorded.notes.iter().any(|note| note.contains("overran")));
}

#[test]
fn exact_deadline_is_not_an_overrun() {
    let mut rig = rig(
        ForwardPolicy::ValidOnly,
        Script {
            read_delay: PERIOD,
            ..Script::default()
        },
    );

    let report = rig.scheduler.run_cycle().expect("cycle");
    assert_eq!(report.overrun, None);
    assert_eq!(report.slept, Duration::ZERO);
}

#[test]
fn one_sample_per_cycle_when_receiver_never_delivers() {
    for mode in [StreamMode::Silent, StreamMode::Garbage] {
        let mut rig = rig(
            ForwardPolicy::ValidOnly,
            Script {
                stream: mode,
                ..Script::default()
            },
        );
        for _ in 0..5 {
            let report = rig.scheduler.run_cycle().expect("cycle");
            assert!(report.produced_sample);
            assert!(!report.valid_fix);
            assert_eq!(report.state, SchedulerState::Running);
        }

        let recorded = rig.sink.recorded.borrow();
        assert_eq!(recorded.published.len(), 5);
        let cycles: Vec<u64> = recorded.published.iter().map(|p| p.cycle).collect();
        assert_eq!(cycles, vec![1, 2, 3, 4, 5]);
        for sample in &recorded.published {
            assert!(sample.has_image);
            assert!(!sample.has_fix);
            assert_eq!(sample.rejection, Some(FixRejection::Missing));
            assert_eq!(sample.disposition, Disposition::Suppress);
        }
        assert_eq!(rig.scheduler.stats().samples, 5);
        assert_eq!(rig.scheduler.stats().suppressed, 5);
    }
}

#[test]
fn initialization_retries_at_fixed_interval_until_devices_open() {
    let mut rig = rig(
        ForwardPolicy::ValidOnly,
        Script {
            receiver_open_failures: 3,
            camera_open_failures: 1,
            ..Script::default()
        },
    );

    assert_eq!(rig.scheduler.state(), SchedulerState::Initializing);
    assert_eq!(rig.scheduler.initialize(), SchedulerState::Running);
    assert_eq!(rig.clock.sleeps(), vec![Duration::from_secs(1); 3]);

    let script = rig.script.borrow();
    assert_eq!(script.receiver_opens, 4);
    // The camera is not reopened once it is up.
    assert_eq!(script.camera_opens, 2);
    assert_eq!(script.live_streams, 1);
    assert_eq!(rig.scheduler.stats().init_attempts, 4);
}

#[test]
fn shutdown_interrupts_initialization() {
    let mut rig = rig(
        ForwardPolicy::ValidOnly,
        Script {
            receiver_open_failures: u32::MAX,
            ..Script::default()
        },
    );
    rig.scheduler.shutdown_handle().store(true, Ordering::SeqCst);

    assert_eq!(rig.scheduler.initialize(), SchedulerState::ShuttingDown);
    assert!(rig.scheduler.run_cycle().is_none());
    assert_eq!(rig.script.borrow().receiver_opens, 0);
}

#[test]
fn lost_receiver_degrades_and_skips_cycles_until_reconnected() {
    let mut rig = rig(
        ForwardPolicy::ValidOnly,
        Script {
            stream: StreamMode::Disconnected,
            ..Script::default()
        },
    );

    let report = rig.scheduler.run_cycle().expect("cycle");
    assert!(report.produced_sample);
    assert_eq!(report.state, SchedulerState::Degraded);
    assert_eq!(rig.script.borrow().live_streams, 0);

    {
        let mut script = rig.script.borrow_mut();
        script.receiver_open_failures = 2;
        script.stream = StreamMode::Blocks(fix_bytes(true));
    }

    for _ in 0..2 {
        let report = rig.scheduler.run_cycle().expect("cycle");
        assert!(!report.produced_sample);
        assert_eq!(report.state, SchedulerState::Degraded);
        assert_eq!(report.slept, PERIOD);
    }

    let report = rig.scheduler.run_cycle().expect("cycle");
    assert!(report.produced_sample);
    assert!(report.valid_fix);
    assert_eq!(report.state, SchedulerState::Running);
    assert_eq!(report.disposition, Some(Disposition::Forward));

    let stats = rig.scheduler.stats();
    assert_eq!(stats.cycles, 4);
    assert_eq!(stats.samples, 2);
    assert_eq!(stats.skipped, 2);
    assert_eq!(stats.reconnects, 3);
    assert_eq!(rig.sink.recorded.borrow().published.len(), 2);
}

#[test]
fn lost_camera_degrades_and_skips_cycles_until_reconnected() {
    let mut rig = rig(
        ForwardPolicy::ValidOnly,
        Script {
            camera_lost: true,
            ..Script::default()
        },
    );

    let report = rig.scheduler.run_cycle().expect("cycle");
    assert!(report.produced_sample);
    assert!(report.valid_fix);
    assert_eq!(report.state, SchedulerState::Degraded);
    {
        let recorded = rig.sink.recorded.borrow();
        assert!(!recorded.published[0].has_image);
        assert!(recorded.published[0].has_fix);
        assert!(recorded.notes.iter().any(|note| note.starts_with("camera lost: ")));
    }
    assert_eq!(rig.scheduler.stats().capture_failures, 0);

    {
        let mut script = rig.script.borrow_mut();
        script.camera_lost = false;
        script.camera_open_failures = 1;
    }

    let report = rig.scheduler.run_cycle().expect("cycle");
    assert!(!report.produced_sample);
    assert_eq!(report.state, SchedulerState::Degraded);
    assert_eq!(report.slept, PERIOD);

    let report = rig.scheduler.run_cycle().expect("cycle");
    assert!(report.produced_sample);
    assert_eq!(report.state, SchedulerState::Running);

    {
        let script = rig.script.borrow();
        assert_eq!(script.camera_opens, 3);
        // The receiver stayed healthy and is never reopened.
        assert_eq!(script.receiver_opens, 1);
        assert_eq!(script.live_streams, 1);
    }
    let stats = rig.scheduler.stats();
    assert_eq!(stats.cycles, 3);
    assert_eq!(stats.samples, 2);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.reconnects, 2);

    let recorded = rig.sink.recorded.borrow();
    assert_eq!(recorded.published.len(), 2);
    assert!(recorded.published[1].has_image);
    assert_eq!(recorded.published[1].cycle, 3);
}

#[test]
fn capture_failure_keeps_the_cycle() {
    let mut rig = rig(
        ForwardPolicy::ValidOnly,
        Script {
            camera_read_fails: true,
            ..Script::default()
        },
    );

    let report = rig.scheduler.run_cycle().expect("cycle");
    assert!(report.produced_sample);
    assert!(report.valid_fix);
    assert_eq!(report.state, SchedulerState::Running);
    assert_eq!(rig.scheduler.stats().capture_failures, 1);

    let recorded = rig.sink.recorded.borrow();
    assert!(!recorded.published[0].has_image);
    assert!(recorded.published[0].has_fix);
}

#[test]
fn invalid_fixes_are_suppressed_unless_bench_mode() {
    let script = || Script {
        stream: StreamMode::Blocks(fix_bytes(false)),
        ..Script::default()
    };

    let mut gated = rig(ForwardPolicy::ValidOnly, script());
    let report = gated.scheduler.run_cycle().expect("cycle");
    assert!(!report.valid_fix);
    assert_eq!(report.disposition, Some(Disposition::Suppress));
    {
        let recorded = gated.sink.recorded.borrow();
        assert_eq!(recorded.published[0].rejection, Some(FixRejection::LatitudeNotComputed));
        assert!(recorded.published[0].has_fix);
        assert!(recorded
            .notes
            .iter()
            .any(|note| note.starts_with("invalid fix: ")));
    }

    let mut bench = rig(ForwardPolicy::Always, script());
    let report = bench.scheduler.run_cycle().expect("cycle");
    assert!(!report.valid_fix);
    assert_eq!(report.disposition, Some(Disposition::Forward));
    assert!(!bench.sink.recorded.borrow().published[0].valid);
}

#[test]
fn raw_receiver_bytes_are_archived_verbatim() {
    let mut rig = rig(ForwardPolicy::ValidOnly, Script::default());
    rig.scheduler.run_cycle().expect("cycle");
    rig.scheduler.run_cycle().expect("cycle");

    let mut expected = fix_bytes(true);
    expected.extend(fix_bytes(true));
    assert_eq!(rig.sink.recorded.borrow().raw, expected);
}

#[test]
fn run_stops_after_max_cycles_and_releases_devices() {
    let mut rig = rig(ForwardPolicy::ValidOnly, Script::default());
    let pulses = Rc::new(Cell::new(0));
    let settings = SchedulerSettings {
        period: PERIOD,
        retry_interval: Duration::from_secs(1),
        stale_frames: 5,
        forward: ForwardPolicy::ValidOnly,
        max_cycles: Some(3),
    };
    let devices = ScriptedDevices {
        script: Rc::clone(&rig.script),
        clock: rig.clock.clone(),
    };
    rig.scheduler = Scheduler::new(settings, devices, rig.sink.clone(), rig.clock.clone())
        .with_trigger(Box::new(CountingTrigger(Rc::clone(&pulses))));

    let stats = rig.scheduler.run();
    assert_eq!(stats.cycles, 3);
    assert_eq!(stats.samples, 3);
    assert_eq!(stats.forwarded, 3);
    assert_eq!(pulses.get(), 3);
    assert_eq!(rig.script.borrow().live_streams, 0);
    assert!(rig.sink.recorded.borrow().flushed);
}

#[test]
fn shutdown_mid_run_finishes_the_cycle_and_releases_devices() {
    let mut rig = rig(ForwardPolicy::ValidOnly, Script::default());
    let shutdown = Arc::new(AtomicBool::new(false));
    let settings = SchedulerSettings {
        period: PERIOD,
        retry_interval: Duration::from_secs(1),
        stale_frames: 5,
        forward: ForwardPolicy::ValidOnly,
        max_cycles: None,
    };
    let devices = ScriptedDevices {
        script: Rc::clone(&rig.script),
        clock: rig.clock.clone(),
    };
    rig.scheduler = Scheduler::new(settings, devices, rig.sink.clone(), rig.clock.clone())
        .with_shutdown(Arc::clone(&shutdown))
        .with_trigger(Box::new(StopAfter {
            pulses: 0,
            limit: 4,
            shutdown: Arc::clone(&shutdown),
        }));

    let stats = rig.scheduler.run();
    assert!(shutdown.load(Ordering::SeqCst));
    assert_eq!(stats.cycles, 4);
    assert_eq!(stats.samples, 4);
    assert_eq!(stats.forwarded, 4);
    // The cycle that saw the request still paced out its period.
    assert_eq!(rig.clock.sleeps(), vec![PERIOD; 4]);

    let recorded = rig.sink.recorded.borrow();
    let cycles: Vec<u64> = recorded.published.iter().map(|p| p.cycle).collect();
    assert_eq!(cycles, vec![1, 2, 3, 4]);
    assert!(recorded.flushed);
    assert_eq!(rig.script.borrow().live_streams, 0);
}
