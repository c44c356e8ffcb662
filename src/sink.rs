//! Telemetry output.
//!
//! The scheduler hands every raw receiver read, every assembled sample and
//! every notable event to a [`TelemetrySink`]. Sink failures are logged by the
//! caller and never stop acquisition.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::CaptureConfig;
use crate::frame::ImageFrame;
use crate::sample::{AcquisitionSample, Disposition};

pub const FILE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub trait TelemetrySink {
    /// Append receiver bytes verbatim, exactly as read.
    fn archive_raw(&mut self, raw: &[u8]) -> Result<()>;

    /// Record one sample. Only `Disposition::Forward` goes downstream.
    fn publish(&mut self, sample: &AcquisitionSample, disposition: Disposition) -> Result<()>;

    /// Human-readable event for the capture log.
    fn note(&mut self, level: log::Level, message: &str) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Box<T> {
    fn archive_raw(&mut self, raw: &[u8]) -> Result<()> {
        (**self).archive_raw(raw)
    }

    fn publish(&mut self, sample: &AcquisitionSample, disposition: Disposition) -> Result<()> {
        (**self).publish(sample, disposition)
    }

    fn note(&mut self, level: log::Level, message: &str) -> Result<()> {
        (**self).note(level, message)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Output file locations for one capture session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkPaths {
    pub raw: PathBuf,
    pub capture_log: PathBuf,
    pub samples: PathBuf,
    /// Concatenated RGB24 pixels of every captured frame.
    pub frames: PathBuf,
}

impl SinkPaths {
    pub fn new(dir: &Path, started_at: DateTime<Utc>) -> Self {
        let stamp = started_at.format(FILE_STAMP_FORMAT).to_string();
        Self {
            raw: dir.join(format!("sbf_{}.sbf", stamp)),
            capture_log: dir.join(format!("capture_{}.log", stamp)),
            samples: dir.join(format!("samples_{}.jsonl", stamp)),
            frames: dir.join(format!("frames_{}.rgb", stamp)),
        }
    }
}

/// Writes the raw SBF archive, a capture log, a JSON-lines file of
/// forwarded samples and a raw frame archive into one directory.
///
/// Every frame is appended to the frame archive whatever its disposition.
/// The capture log gets a matching `frame` index line with the byte offset
/// and length of the pixels.
pub struct FileTelemetrySink {
    paths: SinkPaths,
    raw: BufWriter<File>,
    capture_log: BufWriter<File>,
    samples: BufWriter<File>,
    frames: BufWriter<File>,
    frames_offset: u64,
}

impl FileTelemetrySink {
    pub fn create(dir: &Path, started_at: DateTime<Utc>) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;
        let paths = SinkPaths::new(dir, started_at);
        let frames = open_append(&paths.frames)?;
        // Offsets continue an archive left by a session started in the same second.
        let frames_offset = frames
            .metadata()
            .with_context(|| format!("failed to stat {}", paths.frames.display()))?
            .len();
        let sink = Self {
            raw: BufWriter::new(open_append(&paths.raw)?),
            capture_log: BufWriter::new(open_append(&paths.capture_log)?),
            samples: BufWriter::new(open_append(&paths.samples)?),
            frames: BufWriter::new(frames),
            frames_offset,
            paths,
        };
        log::info!(
            "telemetry: raw archive {}, capture log {}, samples {}, frames {}",
            sink.paths.raw.display(),
            sink.paths.capture_log.display(),
            sink.paths.samples.display(),
            sink.paths.frames.display()
        );
        Ok(sink)
    }

    pub fn paths(&self) -> &SinkPaths {
        &self.paths
    }

    /// Record the effective configuration at the top of the capture log.
    pub fn write_header(&mut self, cfg: &CaptureConfig) -> Result<()> {
        let camera = cfg.camera.v4l2_config();
        let trigger = match cfg.trigger.pin {
            Some(pin) => format!("GPIO{} ({} ms pulse)", pin, cfg.trigger.pulse_width.as_millis()),
            None => "disabled".to_string(),
        };
        writeln!(self.capture_log, "# nav-capture {}", env!("CARGO_PKG_VERSION"))?;
        writeln!(self.capture_log, "period_ms: {}", cfg.period.as_millis())?;
        writeln!(
            self.capture_log,
            "receiver: {} @ {} baud, timeout {} ms",
            cfg.receiver.port,
            cfg.receiver.baud_rate,
            cfg.receiver.read_timeout.as_millis()
        )?;
        writeln!(
            self.capture_log,
            "camera: {} {}x{}, {} stale frames dropped",
            camera.device, camera.width, camera.height, cfg.camera.stale_frames
        )?;
        writeln!(self.capture_log, "trigger: {}", trigger)?;
        writeln!(self.capture_log, "forward_invalid: {}", cfg.forward_invalid)?;
        writeln!(self.capture_log, "frames: {} (rgb24)", self.paths.frames.display())?;
        self.capture_log.flush()?;
        Ok(())
    }

    fn archive_frame(&mut self, sample: &AcquisitionSample, frame: &ImageFrame) -> Result<()> {
        let pixels = frame.pixels();
        self.frames
            .write_all(pixels)
            .with_context(|| format!("failed to append to {}", self.paths.frames.display()))?;
        self.frames.flush()?;
        writeln!(
            self.capture_log,
            "{} frame cycle {} #{} {}x{} rgb24 offset {} len {}",
            frame.captured_at.to_rfc3339(),
            sample.cycle,
            frame.sequence,
            frame.width,
            frame.height,
            self.frames_offset,
            pixels.len()
        )?;
        self.frames_offset += pixels.len() as u64;
        Ok(())
    }
}

impl TelemetrySink for FileTelemetrySink {
    fn archive_raw(&mut self, raw: &[u8]) -> Result<()> {
        self.raw
            .write_all(raw)
            .with_context(|| format!("failed to append to {}", self.paths.raw.display()))
    }

    fn publish(&mut self, sample: &AcquisitionSample, disposition: Disposition) -> Result<()> {
        writeln!(
            self.capture_log,
            "{} {}",
            sample.cycle_started_at.to_rfc3339(),
            describe(sample, disposition)
        )?;
        if disposition == Disposition::Forward {
            serde_json::to_writer(&mut self.samples, &sample.record(disposition))?;
            self.samples.write_all(b"\n")?;
            self.samples.flush()?;
        }
        if let Some(frame) = &sample.image {
            self.archive_frame(sample, frame)?;
        }
        self.capture_log.flush()?;
        self.raw.flush()?;
        Ok(())
    }

    fn note(&mut self, level: log::Level, message: &str) -> Result<()> {
        writeln!(
            self.capture_log,
            "{} {}: {}",
            Utc::now().to_rfc3339(),
            level,
            message
        )?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.raw.flush()?;
        self.capture_log.flush()?;
        self.samples.flush()?;
        self.frames.flush()?;
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))
}

/// One-line summary of a sample for the capture log.
pub fn describe(sample: &AcquisitionSample, disposition: Disposition) -> String {
    let fix = match (&sample.fix, sample.rejection) {
        (Some(fix), None) => format!(
            "fix wn={} tow={} mode={} lat={:.9} lon={:.9} h={:.3} hacc={:.2} vacc={:.2}",
            fix.week_number,
            fix.time_of_week_ms,
            fix.mode,
            fix.latitude_rad,
            fix.longitude_rad,
            fix.height_m,
            fix.horizontal_accuracy_m,
            fix.vertical_accuracy_m
        ),
        (_, Some(reason)) => format!("invalid fix ({})", reason),
        (None, None) => "no fix".to_string(),
    };
    let image = match &sample.image {
        Some(frame) => format!("image {}x{} #{}", frame.width, frame.height, frame.sequence),
        None => "no image".to_string(),
    };
    let action = match disposition {
        Disposition::Forward => "forward",
        Disposition::Suppress => "suppress",
    };
    format!(
        "cycle {}: {}; {}; overrun {} ms; {}",
        sample.cycle,
        image,
        fix,
        sample.overrun.as_millis(),
        action
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::FixRejection;
    use std::time::Duration;

    fn sample(valid: bool) -> AcquisitionSample {
        AcquisitionSample {
            cycle: 1,
            cycle_started_at: Utc::now(),
            image: Some(ImageFrame::from_rgb(vec![0; 3], 1, 1, 1)),
            fix: None,
            valid,
            rejection: (!valid).then_some(FixRejection::Missing),
            overrun: Duration::ZERO,
        }
    }

    #[test]
    fn file_names_carry_session_stamp() {
        let started = DateTime::parse_from_rfc3339("2024-03-05T07:08:09Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        let paths = SinkPaths::new(Path::new("/var/log/nav"), started);
        assert_eq!(paths.raw, Path::new("/var/log/nav/sbf_20240305_070809.sbf"));
        assert_eq!(
            paths.capture_log,
            Path::new("/var/log/nav/capture_20240305_070809.log")
        );
        assert_eq!(
            paths.samples,
            Path::new("/var/log/nav/samples_20240305_070809.jsonl")
        );
        assert_eq!(paths.frames, Path::new("/var/log/nav/frames_20240305_070809.rgb"));
    }

    #[test]
    fn only_forwarded_samples_reach_jsonl() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut sink = FileTelemetrySink::create(dir.path(), Utc::now())?;
        sink.write_header(&CaptureConfig::default())?;
        sink.archive_raw(b"$@raw")?;
        sink.publish(&sample(false), Disposition::Suppress)?;
        sink.publish(&sample(true), Disposition::Forward)?;
        sink.flush()?;

        let paths = sink.paths().clone();
        assert_eq!(std::fs::read(&paths.raw)?, b"$@raw");
        let samples = std::fs::read_to_string(&paths.samples)?;
        assert_eq!(samples.lines().count(), 1);
        let record: serde_json::Value = serde_json::from_str(samples.trim())?;
        assert_eq!(record["valid"], true);

        let log = std::fs::read_to_string(&paths.capture_log)?;
        assert!(log.contains("period_ms: 1000"));
        assert!(log.contains("invalid fix (no fix decoded this cycle)"));
        assert!(log.contains("suppress"));
        Ok(())
    }

    #[test]
    fn every_frame_is_archived_with_an_index_line() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut sink = FileTelemetrySink::create(dir.path(), Utc::now())?;

        let mut first = sample(false);
        first.image = Some(ImageFrame::from_rgb(vec![1, 2, 3, 4, 5, 6], 2, 1, 7));
        let mut second = sample(true);
        second.cycle = 2;
        second.image = Some(ImageFrame::from_rgb(vec![9, 8, 7], 1, 1, 8));
        let mut blind = sample(true);
        blind.cycle = 3;
        blind.image = None;

        sink.publish(&first, Disposition::Suppress)?;
        sink.publish(&second, Disposition::Forward)?;
        sink.publish(&blind, Disposition::Forward)?;
        sink.flush()?;

        let paths = sink.paths().clone();
        assert_eq!(std::fs::read(&paths.frames)?, vec![1, 2, 3, 4, 5, 6, 9, 8, 7]);

        let log = std::fs::read_to_string(&paths.capture_log)?;
        let index: Vec<&str> = log.lines().filter(|line| line.contains(" frame cycle ")).collect();
        assert_eq!(index.len(), 2);
        assert!(index[0].ends_with("frame cycle 1 #7 2x1 rgb24 offset 0 len 6"));
        assert!(index[1].ends_with("frame cycle 2 #8 1x1 rgb24 offset 6 len 3"));
        Ok(())
    }
}
