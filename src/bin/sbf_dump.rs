//! sbf_dump - decode an archived SBF capture.
//!
//! Prints one JSON line per PVTGeodetic / ExtEventPVTGeodetic block with its
//! validity verdict. `--all` also lists the blocks that are not decoded.

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;

use nav_capture::classify_fix;
use nav_capture::sbf::{decode_block, BlockScanner, Decoded, ScanItem};

const CHUNK_LEN: usize = 4096;

#[derive(Parser, Debug)]
#[command(author, version, about = "Decode fixes from an archived SBF capture")]
struct Args {
    /// Raw archive written by captured (sbf_<timestamp>.sbf).
    path: PathBuf,

    /// Also print blocks that carry no fix.
    #[arg(long)]
    all: bool,
}

#[derive(Debug, Default)]
struct Totals {
    blocks: u64,
    fixes: u64,
    valid: u64,
    malformed: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut file =
        File::open(&args.path).with_context(|| format!("failed to open {}", args.path.display()))?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let mut scanner = BlockScanner::new();
    let mut totals = Totals::default();
    let mut chunk = [0u8; CHUNK_LEN];
    loop {
        let n = file
            .read(&mut chunk)
            .with_context(|| format!("failed to read {}", args.path.display()))?;
        if n == 0 {
            break;
        }
        scanner.push(&chunk[..n]);
        while let Some(item) = scanner.next_item() {
            dump_item(item, args.all, &mut totals, &mut out)?;
        }
    }
    out.flush()?;

    if scanner.buffered() > 0 {
        log::warn!("{} trailing bytes did not form a block", scanner.buffered());
    }
    log::info!(
        "{}: {} blocks, {} fixes ({} valid), {} malformed, {} bytes skipped",
        args.path.display(),
        totals.blocks,
        totals.fixes,
        totals.valid,
        totals.malformed,
        scanner.discarded()
    );
    Ok(())
}

fn dump_item(item: ScanItem, all: bool, totals: &mut Totals, out: &mut impl Write) -> Result<()> {
    let block = match item {
        ScanItem::Block(block) => block,
        ScanItem::Malformed(err) => {
            totals.malformed += 1;
            log::warn!("skipping malformed block: {}", err);
            return Ok(());
        }
    };
    totals.blocks += 1;

    let line = match decode_block(&block) {
        Ok(Decoded::FixRecord(fix)) => {
            totals.fixes += 1;
            let verdict = classify_fix(Some(&fix));
            if verdict.is_ok() {
                totals.valid += 1;
            }
            json!({
                "block": block.id.to_string(),
                "valid": verdict.is_ok(),
                "rejection": verdict.err().map(|reason| reason.to_string()),
                "fix": fix,
            })
        }
        Ok(_) if !all => return Ok(()),
        Ok(_) => json!({ "block": block.id.to_string(), "length": block.bytes().len() }),
        Err(err) => {
            totals.malformed += 1;
            log::warn!("skipping {}: {}", block.id, err);
            return Ok(());
        }
    };
    writeln!(out, "{}", line)?;
    Ok(())
}
