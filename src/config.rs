use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::{V4l2Config, DEFAULT_STALE_FRAMES};

pub const CONFIG_ENV: &str = "NAV_CAPTURE_CONFIG";

const DEFAULT_PERIOD_MS: u64 = 1000;
const DEFAULT_RETRY_INTERVAL_MS: u64 = 1000;
const DEFAULT_SERIAL_PORT: &str = "/dev/ttyS0";
const DEFAULT_BAUD_RATE: u32 = 115_200;
const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;
const DEFAULT_CAMERA_INDEX: u32 = 0;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_TRIGGER_PULSE_MS: u64 = 10;
const DEFAULT_LOG_DIR: &str = ".";
const MAX_STALE_FRAMES: usize = 32;
const MAX_PERIOD: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CaptureConfigFile {
    period_ms: Option<u64>,
    retry_interval_ms: Option<u64>,
    receiver: Option<ReceiverConfigFile>,
    camera: Option<CameraConfigFile>,
    trigger: Option<TriggerConfigFile>,
    log_dir: Option<PathBuf>,
    forward_invalid: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ReceiverConfigFile {
    port: Option<String>,
    baud_rate: Option<u32>,
    read_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    index: Option<u32>,
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    stale_frames: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TriggerConfigFile {
    pin: Option<u8>,
    pulse_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Acquisition period; one sample per period.
    pub period: Duration,
    /// Wait between device open attempts while initializing.
    pub retry_interval: Duration,
    pub receiver: ReceiverSettings,
    pub camera: CameraSettings,
    pub trigger: TriggerSettings,
    pub log_dir: PathBuf,
    /// Bench mode: forward samples even when the fix is invalid.
    pub forward_invalid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverSettings {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSettings {
    pub index: u32,
    /// Explicit device node; overrides `index` when set.
    pub device: Option<String>,
    pub width: u32,
    pub height: u32,
    pub stale_frames: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSettings {
    /// BCM pin number; `None` disables the trigger.
    pub pin: Option<u8>,
    pub pulse_width: Duration,
}

impl CameraSettings {
    pub fn v4l2_config(&self) -> V4l2Config {
        match &self.device {
            Some(device) => V4l2Config {
                device: device.clone(),
                width: self.width,
                height: self.height,
            },
            None => V4l2Config::for_index(self.index, self.width, self.height),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        // An empty file section set resolves entirely to defaults.
        Self::from_file(CaptureConfigFile::default())
    }
}

impl CaptureConfig {
    /// Load from the file named by `NAV_CAPTURE_CONFIG` (if any), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => CaptureConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CaptureConfigFile) -> Self {
        let receiver = file.receiver.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let trigger = file.trigger.unwrap_or_default();
        Self {
            period: Duration::from_millis(file.period_ms.unwrap_or(DEFAULT_PERIOD_MS)),
            retry_interval: Duration::from_millis(
                file.retry_interval_ms.unwrap_or(DEFAULT_RETRY_INTERVAL_MS),
            ),
            receiver: ReceiverSettings {
                port: receiver
                    .port
                    .unwrap_or_else(|| DEFAULT_SERIAL_PORT.to_string()),
                baud_rate: receiver.baud_rate.unwrap_or(DEFAULT_BAUD_RATE),
                read_timeout: Duration::from_millis(
                    receiver.read_timeout_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS),
                ),
            },
            camera: CameraSettings {
                index: camera.index.unwrap_or(DEFAULT_CAMERA_INDEX),
                device: camera.device,
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                stale_frames: camera.stale_frames.unwrap_or(DEFAULT_STALE_FRAMES),
            },
            trigger: TriggerSettings {
                pin: trigger.pin,
                pulse_width: Duration::from_millis(
                    trigger.pulse_ms.unwrap_or(DEFAULT_TRIGGER_PULSE_MS),
                ),
            },
            log_dir: file
                .log_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
            forward_invalid: file.forward_invalid.unwrap_or(false),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(port) = env_nonempty("NAV_CAPTURE_SERIAL_PORT") {
            self.receiver.port = port;
        }
        if let Some(index) = env_nonempty("NAV_CAPTURE_CAMERA_INDEX") {
            self.camera.index = index
                .parse()
                .map_err(|_| anyhow!("NAV_CAPTURE_CAMERA_INDEX must be a non-negative integer"))?;
        }
        if let Some(device) = env_nonempty("NAV_CAPTURE_CAMERA_DEVICE") {
            self.camera.device = Some(device);
        }
        if let Some(period) = env_nonempty("NAV_CAPTURE_PERIOD_MS") {
            let ms: u64 = period
                .parse()
                .map_err(|_| anyhow!("NAV_CAPTURE_PERIOD_MS must be an integer number of milliseconds"))?;
            self.period = Duration::from_millis(ms);
        }
        if let Some(pin) = env_nonempty("NAV_CAPTURE_TRIGGER_PIN") {
            self.trigger.pin = match pin.as_str() {
                "off" | "none" => None,
                value => Some(
                    value
                        .parse()
                        .map_err(|_| anyhow!("NAV_CAPTURE_TRIGGER_PIN must be a GPIO number or 'off'"))?,
                ),
            };
        }
        if let Some(dir) = env_nonempty("NAV_CAPTURE_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(flag) = env_nonempty("NAV_CAPTURE_FORWARD_INVALID") {
            self.forward_invalid = parse_bool(&flag)
                .ok_or_else(|| anyhow!("NAV_CAPTURE_FORWARD_INVALID must be true or false"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.period.is_zero() {
            return Err(anyhow!("period must be greater than zero"));
        }
        if self.period > MAX_PERIOD {
            return Err(anyhow!(
                "period {} ms exceeds maximum {} ms",
                self.period.as_millis(),
                MAX_PERIOD.as_millis()
            ));
        }
        if self.retry_interval > MAX_PERIOD {
            return Err(anyhow!(
                "retry interval {} ms exceeds maximum {} ms",
                self.retry_interval.as_millis(),
                MAX_PERIOD.as_millis()
            ));
        }
        if self.retry_interval.is_zero() {
            return Err(anyhow!("retry interval must be greater than zero"));
        }
        if self.receiver.port.trim().is_empty() {
            return Err(anyhow!("receiver port must not be empty"));
        }
        if self.receiver.read_timeout.is_zero() {
            return Err(anyhow!("receiver read timeout must be greater than zero"));
        }
        if self.camera.stale_frames > MAX_STALE_FRAMES {
            return Err(anyhow!(
                "camera stale_frames {} exceeds maximum {}",
                self.camera.stale_frames,
                MAX_STALE_FRAMES
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera dimensions must be non-zero"));
        }
        if self.receiver.read_timeout > self.period {
            log::warn!(
                "receiver timeout {:?} exceeds the period {:?}; slow reads will overrun",
                self.receiver.read_timeout,
                self.period
            );
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<CaptureConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let cfg = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
