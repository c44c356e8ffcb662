use std::io::{ErrorKind, Read};

use super::block::{BlockScanner, ScanItem};
use super::{decode_block, BlockId, Decoded};
use crate::error::{AcquisitionError, Device};
use crate::fix::NavigationFix;

/// Upper bound on bytes taken from the stream in one read.
pub const READ_CHUNK_LEN: usize = 4096;

/// Result of one bounded read.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadOutcome {
    /// Exactly the bytes taken from the stream, for the raw archive.
    pub raw: Vec<u8>,
    pub decoded: Decoded,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub reads: u64,
    pub bytes: u64,
    pub blocks: u64,
    pub fixes: u64,
    pub ignored: u64,
    pub malformed: u64,
    /// Fix blocks replaced by a newer fix within the same read.
    pub superseded: u64,
}

/// Decodes SBF from a byte stream, one bounded read per call.
pub struct SbfReader<R> {
    stream: R,
    scanner: BlockScanner,
    stats: DecoderStats,
}

impl<R: Read> SbfReader<R> {
    pub fn new(stream: R) -> Self {
        Self {
            stream,
            scanner: BlockScanner::new(),
            stats: DecoderStats::default(),
        }
    }

    /// Perform one read and decode every block it completed.
    ///
    /// When several fix blocks complete in the same read the newest one is
    /// returned. Timeouts and malformed input yield `Decoded::NoMessage`;
    /// only a lost connection is an error.
    pub fn read(&mut self) -> Result<ReadOutcome, AcquisitionError> {
        let mut chunk = [0u8; READ_CHUNK_LEN];
        let n = loop {
            match self.stream.read(&mut chunk) {
                Ok(n) => break n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    break 0
                }
                Err(err) => return Err(AcquisitionError::unavailable(Device::Receiver, err)),
            }
        };
        self.stats.reads += 1;
        self.stats.bytes += n as u64;

        let raw = chunk[..n].to_vec();
        self.scanner.push(&raw);
        let decoded = self.drain_blocks();
        Ok(ReadOutcome { raw, decoded })
    }

    fn drain_blocks(&mut self) -> Decoded {
        let mut latest_fix: Option<NavigationFix> = None;
        let mut last_ignored: Option<BlockId> = None;

        while let Some(item) = self.scanner.next_item() {
            let block = match item {
                ScanItem::Block(block) => block,
                ScanItem::Malformed(err) => {
                    self.stats.malformed += 1;
                    log::warn!("malformed sbf data: {}", err);
                    continue;
                }
            };
            self.stats.blocks += 1;
            match decode_block(&block) {
                Ok(Decoded::FixRecord(fix)) => {
                    self.stats.fixes += 1;
                    if latest_fix.replace(fix).is_some() {
                        self.stats.superseded += 1;
                    }
                    log::debug!("decoded {} tow={}", block.id, fix.time_of_week_ms);
                }
                Ok(Decoded::Ignored(id)) => {
                    self.stats.ignored += 1;
                    last_ignored = Some(id);
                    log::debug!("ignoring sbf block {}", id);
                }
                Ok(Decoded::NoMessage) => {}
                Err(err) => {
                    self.stats.malformed += 1;
                    log::warn!("malformed sbf data: {}", err);
                }
            }
        }

        match (latest_fix, last_ignored) {
            (Some(fix), _) => Decoded::FixRecord(fix),
            (None, Some(id)) => Decoded::Ignored(id),
            (None, None) => Decoded::NoMessage,
        }
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }
}
