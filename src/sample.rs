//! Per-cycle acquisition output.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::fix::{FixRejection, NavigationFix};
use crate::frame::{FrameSummary, ImageFrame};

/// One image/fix pair produced by a Running cycle.
#[derive(Debug)]
pub struct AcquisitionSample {
    pub cycle: u64,
    pub cycle_started_at: DateTime<Utc>,
    /// Absent when the frame read failed this cycle.
    pub image: Option<ImageFrame>,
    /// Absent when the read yielded no fix block.
    pub fix: Option<NavigationFix>,
    pub valid: bool,
    /// First reason the fix was rejected; `None` when `valid`.
    pub rejection: Option<FixRejection>,
    /// How far past the cycle deadline the sample was assembled.
    pub overrun: Duration,
}

impl AcquisitionSample {
    pub fn record(&self, disposition: Disposition) -> SampleRecord {
        SampleRecord {
            cycle: self.cycle,
            cycle_started_at: self.cycle_started_at,
            disposition,
            valid: self.valid,
            rejection: self.rejection,
            overrun_ms: self.overrun.as_secs_f64() * 1000.0,
            image: self.image.as_ref().map(ImageFrame::summary),
            fix: self.fix,
        }
    }
}

/// Whether a sample goes downstream or is only logged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Forward,
    Suppress,
}

/// Serialized form of a sample; pixels are reduced to a summary.
#[derive(Debug, Serialize)]
pub struct SampleRecord {
    pub cycle: u64,
    pub cycle_started_at: DateTime<Utc>,
    pub disposition: Disposition,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<FixRejection>,
    pub overrun_ms: f64,
    pub image: Option<FrameSummary>,
    pub fix: Option<NavigationFix>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_summarizes_image_and_reason() -> anyhow::Result<()> {
        let sample = AcquisitionSample {
            cycle: 3,
            cycle_started_at: Utc::now(),
            image: Some(ImageFrame::from_rgb(vec![10; 12], 2, 2, 9)),
            fix: None,
            valid: false,
            rejection: Some(FixRejection::Missing),
            overrun: Duration::from_millis(250),
        };
        let record = sample.record(Disposition::Suppress);
        let json: serde_json::Value = serde_json::to_value(&record)?;
        assert_eq!(json["disposition"], "suppress");
        assert_eq!(json["rejection"], "missing");
        assert_eq!(json["image"]["bytes"], 12);
        assert_eq!(json["overrun_ms"], 250.0);
        assert!(json["fix"].is_null());
        Ok(())
    }
}
