//! Production device provider: serial receiver and V4L2 camera.

use crate::config::{CameraSettings, ReceiverSettings};
use crate::error::AcquisitionError;
use crate::ingest::V4l2Camera;
use crate::receiver::{open_receiver, ReceiverStream};
use crate::scheduler::DeviceProvider;

pub struct HardwareDevices {
    receiver: ReceiverSettings,
    camera: CameraSettings,
}

impl HardwareDevices {
    pub fn new(receiver: ReceiverSettings, camera: CameraSettings) -> Self {
        Self { receiver, camera }
    }
}

impl DeviceProvider for HardwareDevices {
    type Stream = ReceiverStream;
    type Camera = V4l2Camera;

    fn open_receiver(&mut self) -> Result<ReceiverStream, AcquisitionError> {
        open_receiver(&self.receiver)
    }

    fn open_camera(&mut self) -> Result<V4l2Camera, AcquisitionError> {
        let mut camera = V4l2Camera::new(self.camera.v4l2_config())?;
        camera.connect()?;
        Ok(camera)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn stub_devices_open_without_hardware() -> anyhow::Result<()> {
        let mut devices = HardwareDevices::new(
            ReceiverSettings {
                port: "stub://bench".to_string(),
                baud_rate: 115_200,
                read_timeout: Duration::from_secs(1),
            },
            CameraSettings {
                index: 0,
                device: Some("stub://bench".to_string()),
                width: 16,
                height: 8,
                stale_frames: 5,
            },
        );
        devices.open_receiver()?;
        let camera = devices.open_camera()?;
        assert_eq!(camera.stats().device, "stub://bench");
        Ok(())
    }
}
