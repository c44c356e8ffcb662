//! PVTGeodetic (4007) and ExtEventPVTGeodetic (4038) block layout.
//!
//! Both blocks share one body layout; the event variant is emitted when the
//! receiver timestamps an external trigger pulse.

use super::block::{frame_block, MalformedBlock, RawBlock, HEADER_LEN};
use super::BlockId;
use crate::fix::{NavigationFix, DNU_ACCURACY_CM, DNU_F64};

const TOW: usize = 8;
const WNC: usize = 12;
const MODE: usize = 14;
const ERROR: usize = 15;
const LATITUDE: usize = 16;
const LONGITUDE: usize = 24;
const HEIGHT: usize = 32;
const UNDULATION: usize = 40;
const VN: usize = 44;
const VE: usize = 48;
const VU: usize = 52;
const COG: usize = 56;
const RX_CLK_BIAS: usize = 60;
const RX_CLK_DRIFT: usize = 68;
const TIME_SYSTEM: usize = 72;
const DATUM: usize = 73;
const NR_SV: usize = 74;
const REFERENCE_ID: usize = 76;
const MEAN_CORR_AGE: usize = 78;
const H_ACCURACY: usize = 90;
const V_ACCURACY: usize = 92;
const MISC: usize = 94;

/// Shortest block that still carries both accuracy fields.
const MIN_BLOCK_LEN: usize = V_ACCURACY + 2;
const ENCODED_LEN: usize = MISC + 1;

/// PVT mode occupies the low nibble of the Mode byte; the upper bits are
/// flags (2D/3D, base auto-determination).
const MODE_TYPE_MASK: u8 = 0x0f;

const DNU_F32: f32 = -2e10;

/// Geodetic PVT block in transmitted units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PvtGeodetic {
    pub time_of_week_ms: u32,
    pub week_number: u16,
    /// Raw Mode byte including flag bits.
    pub mode: u8,
    pub error: u8,
    pub latitude_rad: f64,
    pub longitude_rad: f64,
    pub height_m: f64,
    pub undulation_m: f32,
    pub velocity_north_mps: f32,
    pub velocity_east_mps: f32,
    pub velocity_up_mps: f32,
    pub course_over_ground_deg: f32,
    pub time_system: u8,
    pub datum: u8,
    pub satellites_used: u8,
    /// 2DRMS horizontal accuracy in centimetres.
    pub horizontal_accuracy_cm: u16,
    /// 2-sigma vertical accuracy in centimetres.
    pub vertical_accuracy_cm: u16,
}

impl PvtGeodetic {
    /// A block as the receiver emits it before the first fix.
    pub fn no_fix(time_of_week_ms: u32, week_number: u16) -> Self {
        Self {
            time_of_week_ms,
            week_number,
            mode: 0,
            error: 1,
            latitude_rad: DNU_F64,
            longitude_rad: DNU_F64,
            height_m: DNU_F64,
            undulation_m: DNU_F32,
            velocity_north_mps: DNU_F32,
            velocity_east_mps: DNU_F32,
            velocity_up_mps: DNU_F32,
            course_over_ground_deg: DNU_F32,
            time_system: 0,
            datum: 0,
            satellites_used: 0,
            horizontal_accuracy_cm: DNU_ACCURACY_CM,
            vertical_accuracy_cm: DNU_ACCURACY_CM,
        }
    }

    pub fn decode(block: &RawBlock) -> Result<Self, MalformedBlock> {
        let b = block.bytes();
        if b.len() < MIN_BLOCK_LEN {
            return Err(MalformedBlock::Truncated {
                id: block.id,
                len: b.len(),
                needed: MIN_BLOCK_LEN,
            });
        }
        Ok(Self {
            time_of_week_ms: read_u32(b, TOW),
            week_number: read_u16(b, WNC),
            mode: b[MODE],
            error: b[ERROR],
            latitude_rad: read_f64(b, LATITUDE),
            longitude_rad: read_f64(b, LONGITUDE),
            height_m: read_f64(b, HEIGHT),
            undulation_m: read_f32(b, UNDULATION),
            velocity_north_mps: read_f32(b, VN),
            velocity_east_mps: read_f32(b, VE),
            velocity_up_mps: read_f32(b, VU),
            course_over_ground_deg: read_f32(b, COG),
            time_system: b[TIME_SYSTEM],
            datum: b[DATUM],
            satellites_used: b[NR_SV],
            horizontal_accuracy_cm: read_u16(b, H_ACCURACY),
            vertical_accuracy_cm: read_u16(b, V_ACCURACY),
        })
    }

    pub fn to_fix(&self) -> NavigationFix {
        NavigationFix {
            latitude_rad: self.latitude_rad,
            longitude_rad: self.longitude_rad,
            height_m: self.height_m,
            week_number: self.week_number,
            time_of_week_ms: self.time_of_week_ms,
            mode: self.mode & MODE_TYPE_MASK,
            error_code: self.error,
            horizontal_accuracy_m: self.horizontal_accuracy_cm as f64 / 100.0,
            vertical_accuracy_m: self.vertical_accuracy_cm as f64 / 100.0,
        }
    }
}

/// Encode a geodetic PVT block under `id` (PVTGeodetic or
/// ExtEventPVTGeodetic). Correction and clock fields are written as
/// do-not-use values; the remaining reserved bytes stay zero.
pub fn encode_pvt_geodetic(id: BlockId, pvt: &PvtGeodetic) -> Vec<u8> {
    let mut b = vec![0u8; ENCODED_LEN];
    b[TOW..TOW + 4].copy_from_slice(&pvt.time_of_week_ms.to_le_bytes());
    b[WNC..WNC + 2].copy_from_slice(&pvt.week_number.to_le_bytes());
    b[MODE] = pvt.mode;
    b[ERROR] = pvt.error;
    b[LATITUDE..LATITUDE + 8].copy_from_slice(&pvt.latitude_rad.to_le_bytes());
    b[LONGITUDE..LONGITUDE + 8].copy_from_slice(&pvt.longitude_rad.to_le_bytes());
    b[HEIGHT..HEIGHT + 8].copy_from_slice(&pvt.height_m.to_le_bytes());
    b[UNDULATION..UNDULATION + 4].copy_from_slice(&pvt.undulation_m.to_le_bytes());
    b[VN..VN + 4].copy_from_slice(&pvt.velocity_north_mps.to_le_bytes());
    b[VE..VE + 4].copy_from_slice(&pvt.velocity_east_mps.to_le_bytes());
    b[VU..VU + 4].copy_from_slice(&pvt.velocity_up_mps.to_le_bytes());
    b[COG..COG + 4].copy_from_slice(&pvt.course_over_ground_deg.to_le_bytes());
    b[RX_CLK_BIAS..RX_CLK_BIAS + 8].copy_from_slice(&DNU_F64.to_le_bytes());
    b[RX_CLK_DRIFT..RX_CLK_DRIFT + 4].copy_from_slice(&DNU_F32.to_le_bytes());
    b[TIME_SYSTEM] = pvt.time_system;
    b[DATUM] = pvt.datum;
    b[NR_SV] = pvt.satellites_used;
    b[REFERENCE_ID..REFERENCE_ID + 2].copy_from_slice(&u16::MAX.to_le_bytes());
    b[MEAN_CORR_AGE..MEAN_CORR_AGE + 2].copy_from_slice(&u16::MAX.to_le_bytes());
    b[H_ACCURACY..H_ACCURACY + 2].copy_from_slice(&pvt.horizontal_accuracy_cm.to_le_bytes());
    b[V_ACCURACY..V_ACCURACY + 2].copy_from_slice(&pvt.vertical_accuracy_cm.to_le_bytes());

    frame_block(id, &b[HEADER_LEN..])
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn read_f32(bytes: &[u8], at: usize) -> f32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    f32::from_le_bytes(raw)
}

fn read_f64(bytes: &[u8], at: usize) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    f64::from_le_bytes(raw)
}
