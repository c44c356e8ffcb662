use std::fmt;

use thiserror::Error;

/// Which external device a failure belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Device {
    Receiver,
    Camera,
    Trigger,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Device::Receiver => "receiver",
            Device::Camera => "camera",
            Device::Trigger => "trigger",
        };
        f.write_str(name)
    }
}

/// Failures surfaced by the acquisition devices.
///
/// Decode misses and invalid fixes are not errors and never appear here.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// The device could not be opened or stopped responding. Triggers
    /// reconnection; never terminates the process.
    #[error("{device} unavailable: {reason}")]
    DeviceUnavailable { device: Device, reason: String },

    /// A single frame could not be read. The cycle still completes.
    #[error("frame capture failed: {0}")]
    CaptureFailure(String),
}

impl AcquisitionError {
    pub fn unavailable(device: Device, reason: impl fmt::Display) -> Self {
        AcquisitionError::DeviceUnavailable {
            device,
            reason: reason.to_string(),
        }
    }

    pub fn is_device_unavailable(&self) -> bool {
        matches!(self, AcquisitionError::DeviceUnavailable { .. })
    }
}

/// Classifies an I/O error as connection loss or a transient read failure.
pub fn is_disconnect(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    if matches!(
        err.kind(),
        ErrorKind::NotFound
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::PermissionDenied
            | ErrorKind::UnexpectedEof
    ) {
        return true;
    }
    #[cfg(target_os = "linux")]
    {
        if let Some(code) = err.raw_os_error() {
            return code == libc::ENODEV || code == libc::ENXIO || code == libc::EIO;
        }
    }
    false
}
