//! Navigation-tagged image capture.
//!
//! This crate pairs camera frames with position fixes from a Septentrio GNSS
//! receiver on a fixed period and decides whether each fix is good enough to
//! forward.
//!
//! # Architecture
//!
//! A single-threaded [`Scheduler`] owns both device handles. Every cycle it:
//!
//! 1. pulls the freshest frame through the [`ImagingAdapter`],
//! 2. pulses the hardware trigger (if configured),
//! 3. performs one bounded read of the receiver's SBF stream,
//! 4. validates the decoded fix against the receiver's do-not-use sentinels,
//! 5. hands the [`AcquisitionSample`] to a [`TelemetrySink`],
//! 6. sleeps until the cycle deadline or reports the overrun.
//!
//! # Module Structure
//!
//! - `sbf`: SBF framing, CRC and PVTGeodetic decoding
//! - `fix`: navigation fix record and validity rules
//! - `ingest`: frame sources and the stale-frame draining adapter
//! - `receiver`, `trigger`, `devices`: hardware access
//! - `scheduler`: the paced loop and its state machine
//! - `sink`, `sample`: per-cycle output
//! - `config`: file and environment configuration

pub mod config;
pub mod devices;
pub mod error;
pub mod fix;
pub mod frame;
pub mod ingest;
pub mod receiver;
pub mod sample;
pub mod sbf;
pub mod scheduler;
pub mod sink;
pub mod trigger;

pub use config::{CameraSettings, CaptureConfig, ReceiverSettings, TriggerSettings};
pub use devices::HardwareDevices;
pub use error::{AcquisitionError, Device};
pub use fix::{classify_fix, is_fix_valid, FixRejection, NavigationFix};
pub use frame::{FrameSummary, ImageFrame};
pub use ingest::{FrameSource, ImagingAdapter, V4l2Camera, V4l2Config};
pub use sample::{AcquisitionSample, Disposition, SampleRecord};
pub use sbf::{BlockId, Decoded, SbfReader};
pub use scheduler::{
    Clock, CycleReport, DeviceProvider, ForwardPolicy, Scheduler, SchedulerSettings,
    SchedulerState, SchedulerStats, SystemClock,
};
pub use sink::{FileTelemetrySink, TelemetrySink};
pub use trigger::{open_trigger, DisabledTrigger, Trigger};
