//! Septentrio Binary Format (SBF) decoding.
//!
//! Only the geodetic PVT blocks are turned into [`NavigationFix`] records.
//! Every other block is recognised, archived raw by the caller, and reported
//! as [`Decoded::Ignored`].
//!
//! - `block`: framing, CRC verification, resynchronisation
//! - `pvt`: PVTGeodetic / ExtEventPVTGeodetic layout
//! - `reader`: one bounded read from a byte stream per call

use serde::Serialize;
use std::fmt;

use crate::fix::NavigationFix;

pub mod block;
pub mod crc;
pub mod pvt;
pub mod reader;

pub use block::{frame_block, BlockScanner, MalformedBlock, RawBlock, ScanItem};
pub use pvt::{encode_pvt_geodetic, PvtGeodetic};
pub use reader::{DecoderStats, ReadOutcome, SbfReader};

pub const PVT_GEODETIC: u16 = 4007;
pub const EXT_EVENT_PVT_GEODETIC: u16 = 4038;

/// Block identity: 13-bit block number plus 3-bit revision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct BlockId {
    pub number: u16,
    pub revision: u8,
}

impl BlockId {
    pub fn new(number: u16, revision: u8) -> Self {
        Self {
            number: number & 0x1fff,
            revision: revision & 0x07,
        }
    }

    pub fn from_raw(raw: u16) -> Self {
        Self::new(raw & 0x1fff, (raw >> 13) as u8)
    }

    pub fn to_raw(self) -> u16 {
        (self.number & 0x1fff) | ((self.revision as u16 & 0x07) << 13)
    }

    pub fn is_fix_block(self) -> bool {
        matches!(self.number, PVT_GEODETIC | EXT_EVENT_PVT_GEODETIC)
    }

    pub fn name(self) -> Option<&'static str> {
        let name = match self.number {
            4006 => "PVTCartesian",
            PVT_GEODETIC => "PVTGeodetic",
            4001 => "DOP",
            4012 => "SatVisibility",
            4013 => "ChannelStatus",
            4014 => "ReceiverStatus",
            4027 => "MeasEpoch",
            4037 => "ExtEventPVTCartesian",
            EXT_EVENT_PVT_GEODETIC => "ExtEventPVTGeodetic",
            5924 => "ExtEvent",
            5914 => "ReceiverTime",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}({}.{})", name, self.number, self.revision),
            None => write!(f, "{}.{}", self.number, self.revision),
        }
    }
}

/// Outcome of decoding one read.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    /// A geodetic PVT block was decoded.
    FixRecord(NavigationFix),
    /// A valid block with an identity we do not interpret.
    Ignored(BlockId),
    /// Nothing complete arrived: timeout, partial block, or bad checksum.
    NoMessage,
}

/// Decode a verified block into a fix, or classify it as ignored.
pub fn decode_block(block: &RawBlock) -> Result<Decoded, MalformedBlock> {
    if block.id.is_fix_block() {
        let pvt = PvtGeodetic::decode(block)?;
        Ok(Decoded::FixRecord(pvt.to_fix()))
    } else {
        Ok(Decoded::Ignored(block.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_packs_revision_in_top_bits() {
        let id = BlockId::new(PVT_GEODETIC, 2);
        assert_eq!(id.to_raw(), 4007 | (2 << 13));
        assert_eq!(BlockId::from_raw(id.to_raw()), id);
        assert!(id.is_fix_block());
        assert_eq!(id.to_string(), "PVTGeodetic(4007.2)");
    }

    #[test]
    fn unknown_blocks_are_ignored() {
        let bytes = frame_block(BlockId::new(4027, 1), &[0u8; 12]);
        let mut scanner = BlockScanner::new();
        scanner.push(&bytes);
        let Some(ScanItem::Block(block)) = scanner.next_item() else {
            panic!("expected a block");
        };
        assert_eq!(
            decode_block(&block),
            Ok(Decoded::Ignored(BlockId::new(4027, 1)))
        );
    }
}
