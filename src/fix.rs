//! Navigation fix record and fix-quality validation.
//!
//! The receiver never omits a field; when it cannot compute a value it writes
//! a "do-not-use" sentinel instead. A fix is only usable when none of those
//! sentinels are present, the PVT mode reports a solution, and the receiver
//! flagged no error.

use serde::Serialize;
use std::fmt;

/// Do-not-use value for floating point SBF fields.
pub const DNU_F64: f64 = -2e10;

/// Do-not-use value for the week number.
pub const DNU_WEEK: u16 = u16::MAX;

/// Do-not-use value for the time of week.
pub const DNU_TOW: u32 = u32::MAX;

/// Do-not-use value for the raw accuracy fields (centimetres).
pub const DNU_ACCURACY_CM: u16 = u16::MAX;

/// Accuracy sentinel after scaling to metres (655.35).
pub const DNU_ACCURACY_M: f64 = DNU_ACCURACY_CM as f64 / 100.0;

/// PVT mode value reported when no solution is available.
pub const MODE_NO_FIX: u8 = 0;

/// A single decoded position/velocity/time solution.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct NavigationFix {
    pub latitude_rad: f64,
    pub longitude_rad: f64,
    pub height_m: f64,
    pub week_number: u16,
    pub time_of_week_ms: u32,
    /// PVT mode; 0 means no fix.
    pub mode: u8,
    /// Receiver error code; 0 means none.
    pub error_code: u8,
    pub horizontal_accuracy_m: f64,
    pub vertical_accuracy_m: f64,
}

/// Why a fix was classified as unusable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FixRejection {
    Missing,
    LatitudeNotComputed,
    LongitudeNotComputed,
    HeightNotComputed,
    WeekNumberNotComputed,
    TimeOfWeekNotComputed,
    NoFix,
    ReceiverError(u8),
    HorizontalAccuracyNotComputed,
    VerticalAccuracyNotComputed,
}

impl fmt::Display for FixRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixRejection::Missing => f.write_str("no fix decoded this cycle"),
            FixRejection::LatitudeNotComputed => f.write_str("latitude not computed"),
            FixRejection::LongitudeNotComputed => f.write_str("longitude not computed"),
            FixRejection::HeightNotComputed => f.write_str("height not computed"),
            FixRejection::WeekNumberNotComputed => f.write_str("week number not computed"),
            FixRejection::TimeOfWeekNotComputed => f.write_str("time of week not computed"),
            FixRejection::NoFix => f.write_str("receiver reports no fix"),
            FixRejection::ReceiverError(code) => write!(f, "receiver error code {}", code),
            FixRejection::HorizontalAccuracyNotComputed => {
                f.write_str("horizontal accuracy not computed")
            }
            FixRejection::VerticalAccuracyNotComputed => {
                f.write_str("vertical accuracy not computed")
            }
        }
    }
}

/// Classify a fix, returning the first reason it is unusable.
pub fn classify_fix(fix: Option<&NavigationFix>) -> Result<(), FixRejection> {
    let Some(fix) = fix else {
        return Err(FixRejection::Missing);
    };

    // Exact comparisons: the receiver writes the sentinels bit-for-bit.
    if fix.latitude_rad == DNU_F64 {
        return Err(FixRejection::LatitudeNotComputed);
    }
    if fix.longitude_rad == DNU_F64 {
        return Err(FixRejection::LongitudeNotComputed);
    }
    if fix.height_m == DNU_F64 {
        return Err(FixRejection::HeightNotComputed);
    }
    if fix.week_number == DNU_WEEK {
        return Err(FixRejection::WeekNumberNotComputed);
    }
    if fix.time_of_week_ms == DNU_TOW {
        return Err(FixRejection::TimeOfWeekNotComputed);
    }
    if fix.mode == MODE_NO_FIX {
        return Err(FixRejection::NoFix);
    }
    if fix.error_code != 0 {
        return Err(FixRejection::ReceiverError(fix.error_code));
    }
    if fix.horizontal_accuracy_m == DNU_ACCURACY_M {
        return Err(FixRejection::HorizontalAccuracyNotComputed);
    }
    if fix.vertical_accuracy_m == DNU_ACCURACY_M {
        return Err(FixRejection::VerticalAccuracyNotComputed);
    }
    Ok(())
}

/// Returns true when the fix is present and carries no sentinel values.
pub fn is_fix_valid(fix: Option<&NavigationFix>) -> bool {
    classify_fix(fix).is_ok()
}
