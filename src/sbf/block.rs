//! SBF block framing.
//!
//! Every block starts with an 8-byte header:
//!
//! | offset | size | field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 2    | sync `$@`                               |
//! | 2      | 2    | CRC-16 over bytes 4..length             |
//! | 4      | 2    | ID: block number (bits 0-12), rev (13-15)|
//! | 6      | 2    | total block length, multiple of 4       |
//!
//! All multi-byte fields are little-endian.

use thiserror::Error;

use super::crc::crc16_ccitt;
use super::BlockId;

pub const SYNC: [u8; 2] = *b"$@";
pub const HEADER_LEN: usize = 8;

/// Largest block accepted before the header is treated as corrupt.
pub const MAX_BLOCK_LEN: usize = 8192;

/// Bytes retained while waiting for the rest of a block.
const MAX_BUFFERED: usize = 64 * 1024;

/// A framing or layout problem. Reported and skipped, never fatal.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MalformedBlock {
    #[error("invalid block length {length}")]
    BadLength { length: u16 },

    #[error("crc mismatch on block {id}: header {expected:#06x}, computed {computed:#06x}")]
    CrcMismatch {
        id: BlockId,
        expected: u16,
        computed: u16,
    },

    #[error("block {id} too short: {len} bytes, need {needed}")]
    Truncated { id: BlockId, len: usize, needed: usize },
}

/// A complete, checksum-verified block including its header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawBlock {
    pub id: BlockId,
    bytes: Vec<u8>,
}

impl RawBlock {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Block payload after the 8-byte header.
    pub fn body(&self) -> &[u8] {
        &self.bytes[HEADER_LEN..]
    }
}

#[derive(Debug)]
pub enum ScanItem {
    Block(RawBlock),
    Malformed(MalformedBlock),
}

/// Incremental frame scanner. Bytes are pushed as they arrive and complete
/// blocks are pulled out; partial blocks stay buffered across pushes.
#[derive(Debug, Default)]
pub struct BlockScanner {
    buf: Vec<u8>,
    discarded: u64,
}

impl BlockScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_BUFFERED {
            let excess = self.buf.len() - MAX_BUFFERED;
            self.buf.drain(..excess);
            self.discarded += excess as u64;
            log::warn!("sbf scanner overflow: dropped {} buffered bytes", excess);
        }
    }

    /// Bytes currently held waiting for a complete block.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Bytes skipped while hunting for sync or after a bad header.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    pub fn next_item(&mut self) -> Option<ScanItem> {
        let Some(start) = find_sync(&self.buf) else {
            // Keep a trailing '$' in case the '@' arrives with the next read.
            let keep = usize::from(self.buf.last() == Some(&SYNC[0]));
            let dropped = self.buf.len() - keep;
            self.buf.drain(..dropped);
            self.discarded += dropped as u64;
            return None;
        };
        if start > 0 {
            self.buf.drain(..start);
            self.discarded += start as u64;
        }
        if self.buf.len() < HEADER_LEN {
            return None;
        }

        let length = u16::from_le_bytes([self.buf[6], self.buf[7]]);
        let len = length as usize;
        if len < HEADER_LEN || len % 4 != 0 || len > MAX_BLOCK_LEN {
            log::debug!(
                "sbf bad header {}",
                hex::encode(&self.buf[..HEADER_LEN])
            );
            self.skip_sync();
            return Some(ScanItem::Malformed(MalformedBlock::BadLength { length }));
        }
        if self.buf.len() < len {
            return None;
        }

        let expected = u16::from_le_bytes([self.buf[2], self.buf[3]]);
        let id = BlockId::from_raw(u16::from_le_bytes([self.buf[4], self.buf[5]]));
        let computed = crc16_ccitt(&self.buf[4..len]);
        if computed != expected {
            self.skip_sync();
            return Some(ScanItem::Malformed(MalformedBlock::CrcMismatch {
                id,
                expected,
                computed,
            }));
        }

        let bytes: Vec<u8> = self.buf.drain(..len).collect();
        Some(ScanItem::Block(RawBlock { id, bytes }))
    }

    /// Step past the current sync so the scan resumes inside the bad block.
    fn skip_sync(&mut self) {
        self.buf.drain(..1);
        self.discarded += 1;
    }
}

fn find_sync(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == SYNC)
}

/// Wrap a body in an SBF header, padding to a multiple of four bytes.
pub fn frame_block(id: BlockId, body: &[u8]) -> Vec<u8> {
    let mut len = HEADER_LEN + body.len();
    len += (4 - len % 4) % 4;

    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(&SYNC);
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&id.to_raw().to_le_bytes());
    out.extend_from_slice(&(len as u16).to_le_bytes());
    out.extend_from_slice(body);
    out.resize(len, 0);

    let crc = crc16_ccitt(&out[4..]);
    out[2..4].copy_from_slice(&crc.to_le_bytes());
    out
}
