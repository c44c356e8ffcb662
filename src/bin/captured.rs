//! captured - navigation-tagged image capture daemon
//!
//! This daemon:
//! 1. Opens the GNSS receiver (serial SBF) and the camera, retrying until both respond
//! 2. Once per period grabs the freshest frame and pulses the event trigger
//! 3. Reads and decodes the receiver's SBF stream, validating the newest fix
//! 4. Archives raw SBF, writes a capture log and forwards validated samples
//! 5. Stops cleanly on Ctrl-C, releasing both devices

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nav_capture::{
    open_trigger, CaptureConfig, DisabledTrigger, FileTelemetrySink, HardwareDevices, Scheduler,
    SchedulerSettings, SystemClock, Trigger,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Capture camera frames paired with validated GNSS fixes"
)]
struct Args {
    /// JSON or TOML configuration file.
    #[arg(long, env = "NAV_CAPTURE_CONFIG")]
    config: Option<PathBuf>,

    /// Forward samples even when the fix is invalid (bench testing).
    #[arg(long)]
    bench: bool,

    /// Directory for the raw archive, capture log and sample files.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Stop after this many cycles.
    #[arg(long)]
    cycles: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = CaptureConfig::load_from(args.config.as_deref())?;
    if args.bench {
        cfg.forward_invalid = true;
    }
    if let Some(dir) = args.log_dir {
        cfg.log_dir = dir;
    }
    if cfg.forward_invalid {
        log::warn!("bench mode: invalid fixes will be forwarded");
    }

    let mut sink = FileTelemetrySink::create(&cfg.log_dir, Utc::now())?;
    sink.write_header(&cfg)?;

    let trigger: Box<dyn Trigger> = match open_trigger(&cfg.trigger) {
        Ok(trigger) => trigger,
        Err(e) => {
            log::warn!("trigger disabled: {}", e);
            Box::new(DisabledTrigger)
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    let mut settings = SchedulerSettings::from_config(&cfg);
    settings.max_cycles = args.cycles;
    let devices = HardwareDevices::new(cfg.receiver.clone(), cfg.camera.clone());

    log::info!(
        "captured running. receiver {}, camera {}, writing to {}",
        cfg.receiver.port,
        cfg.camera.v4l2_config().device,
        cfg.log_dir.display()
    );

    let stats = Scheduler::new(settings, devices, sink, SystemClock)
        .with_trigger(trigger)
        .with_shutdown(shutdown)
        .run();

    log::info!(
        "captured stopped after {} cycles ({} samples, {} forwarded)",
        stats.cycles,
        stats.samples,
        stats.forwarded
    );
    Ok(())
}
