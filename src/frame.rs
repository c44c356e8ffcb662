//! Captured image frames.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A dense RGB24 frame with its capture time.
///
/// Frames are moved, never cloned: the adapter hands ownership to the
/// scheduler, which hands it to the sink inside an `AcquisitionSample`.
#[derive(Debug)]
pub struct ImageFrame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Wall-clock time the frame was dequeued from the device.
    pub captured_at: DateTime<Utc>,
    /// Per-source frame counter, including discarded frames.
    pub sequence: u64,
}

impl ImageFrame {
    pub(crate) fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        captured_at: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        Self {
            pixels,
            width,
            height,
            captured_at,
            sequence,
        }
    }

    /// Build a frame from externally supplied RGB24 pixels.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self::new(pixels, width, height, Utc::now(), sequence)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// Mean of all channel values, a cheap exposure indicator for the log.
    pub fn mean_intensity(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.pixels.iter().map(|&p| p as u64).sum();
        sum as f64 / self.pixels.len() as f64
    }

    pub fn summary(&self) -> FrameSummary {
        FrameSummary {
            width: self.width,
            height: self.height,
            captured_at: self.captured_at,
            sequence: self.sequence,
            bytes: self.pixels.len(),
            mean_intensity: self.mean_intensity(),
        }
    }
}

/// Frame metadata without pixels, for logs and forwarded records.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameSummary {
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
    pub sequence: u64,
    pub bytes: usize,
    pub mean_intensity: f64,
}
