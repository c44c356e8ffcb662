//! V4L2 camera source.
//!
//! `V4l2Camera` opens a local device node (e.g. /dev/video0), streams frames
//! through memory-mapped buffers, and converts each frame to RGB24.
//! Device paths starting with `stub://` select a synthetic camera that needs
//! no hardware.

use chrono::Utc;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::FrameSource;
use crate::error::{AcquisitionError, Device};
use crate::frame::ImageFrame;

/// Configuration for a V4L2 camera.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0") or `stub://<name>`.
    pub device: String,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
        }
    }
}

impl V4l2Config {
    /// `/dev/video<index>`, the node a USB camera index refers to.
    pub fn for_index(index: u32, width: u32, height: u32) -> Self {
        Self {
            device: format!("/dev/video{}", index),
            width,
            height,
        }
    }
}

/// V4L2 camera with a synthetic fallback for `stub://` paths.
pub struct V4l2Camera {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "capture-v4l2")]
    Device(DeviceCamera),
}

impl V4l2Camera {
    pub fn new(config: V4l2Config) -> Result<Self, AcquisitionError> {
        if config.device.starts_with("stub://") {
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(config)),
            });
        }
        #[cfg(feature = "capture-v4l2")]
        {
            Ok(Self {
                backend: CameraBackend::Device(DeviceCamera::new(config)),
            })
        }
        #[cfg(not(feature = "capture-v4l2"))]
        {
            Err(AcquisitionError::unavailable(
                Device::Camera,
                format!(
                    "{} requires the capture-v4l2 feature",
                    config.device
                ),
            ))
        }
    }

    /// Open the device and start streaming.
    pub fn connect(&mut self) -> Result<(), AcquisitionError> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.connect(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::Device(camera) => camera.connect(),
        }
    }

    pub fn stats(&self) -> CameraStats {
        match &self.backend {
            CameraBackend::Synthetic(camera) => camera.stats(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::Device(camera) => camera.stats(),
        }
    }
}

impl FrameSource for V4l2Camera {
    fn grab(&mut self) -> Result<(), AcquisitionError> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.grab(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::Device(camera) => camera.grab(),
        }
    }

    fn read(&mut self) -> Result<ImageFrame, AcquisitionError> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.read(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::Device(camera) => camera.read(),
        }
    }
}

/// Statistics for a camera.
#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_dequeued: u64,
    pub frames_delivered: u64,
    pub device: String,
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://) for bench runs and tests
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    config: V4l2Config,
    dequeued: u64,
    delivered: u64,
}

impl SyntheticCamera {
    fn new(config: V4l2Config) -> Self {
        Self {
            config,
            dequeued: 0,
            delivered: 0,
        }
    }

    fn connect(&mut self) -> Result<(), AcquisitionError> {
        log::info!("V4l2Camera: connected to {} (synthetic)", self.config.device);
        Ok(())
    }

    fn grab(&mut self) -> Result<(), AcquisitionError> {
        self.dequeued += 1;
        Ok(())
    }

    fn read(&mut self) -> Result<ImageFrame, AcquisitionError> {
        self.dequeued += 1;
        let yuyv = self.generate_yuyv();
        let rgb = normalize_to_rgb(&yuyv, self.config.width, self.config.height, PixelFormat::Yuyv)
            .map_err(|err| AcquisitionError::CaptureFailure(err.to_string()))?;
        self.delivered += 1;
        Ok(ImageFrame::new(
            rgb,
            self.config.width,
            self.config.height,
            Utc::now(),
            self.dequeued,
        ))
    }

    /// Horizontal luma ramp that drifts one column per dequeued frame.
    fn generate_yuyv(&self) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let mut yuyv = vec![128u8; width * height * 2];
        for row in 0..height {
            for col in 0..width {
                let luma = ((col as u64 + self.dequeued) % 220 + 16) as u8;
                yuyv[(row * width + col) * 2] = luma;
            }
        }
        yuyv
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_dequeued: self.dequeued,
            frames_delivered: self.delivered,
            device: self.config.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Production camera using libv4l
// ----------------------------------------------------------------------------

#[cfg(feature = "capture-v4l2")]
struct DeviceCamera {
    config: V4l2Config,
    state: Option<DeviceState>,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
    dequeued: u64,
    delivered: u64,
}

#[cfg(feature = "capture-v4l2")]
#[ouroboros::self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "capture-v4l2")]
impl DeviceCamera {
    /// Driver-side queue depth; the adapter's stale-frame count should cover it.
    const BUFFERS: u32 = 4;

    fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: PixelFormat::Yuyv,
            dequeued: 0,
            delivered: 0,
        }
    }

    fn connect(&mut self) -> Result<(), AcquisitionError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        // Release any previous stream before reopening the node.
        self.state = None;

        let unavailable = |err: std::io::Error| AcquisitionError::unavailable(Device::Camera, err);
        let mut device = v4l::Device::with_path(&self.config.device).map_err(unavailable)?;
        let mut format = device.format().map_err(unavailable)?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"YUYV");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device.format().map_err(unavailable)?
            }
        };

        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            AcquisitionError::unavailable(
                Device::Camera,
                format!("unsupported pixel format {}", format.fourcc),
            )
        })?;
        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, Self::BUFFERS)
            },
        }
        .try_build()
        .map_err(unavailable)?;
        self.state = Some(state);

        log::info!(
            "V4l2Camera: connected to {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    /// Dequeue one buffer, optionally copying it out.
    fn dequeue(&mut self, keep: bool) -> Result<Option<Vec<u8>>, AcquisitionError> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().ok_or_else(|| {
            AcquisitionError::unavailable(Device::Camera, "v4l2 device not connected")
        })?;
        let result = state.with_stream_mut(|stream| {
            stream
                .next()
                .map(|(buf, _meta)| if keep { Some(buf.to_vec()) } else { None })
        });
        match result {
            Ok(bytes) => {
                self.dequeued += 1;
                Ok(bytes)
            }
            Err(err) if crate::error::is_disconnect(&err) => {
                self.state = None;
                Err(AcquisitionError::unavailable(Device::Camera, err))
            }
            Err(err) => Err(AcquisitionError::CaptureFailure(err.to_string())),
        }
    }

    fn grab(&mut self) -> Result<(), AcquisitionError> {
        self.dequeue(false).map(|_| ())
    }

    fn read(&mut self) -> Result<ImageFrame, AcquisitionError> {
        let raw = self
            .dequeue(true)?
            .ok_or_else(|| AcquisitionError::CaptureFailure("empty buffer".into()))?;
        let rgb = normalize_to_rgb(&raw, self.active_width, self.active_height, self.format)
            .map_err(|err| AcquisitionError::CaptureFailure(err.to_string()))?;
        self.delivered += 1;
        Ok(ImageFrame::new(
            rgb,
            self.active_width,
            self.active_height,
            Utc::now(),
            self.dequeued,
        ))
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_dequeued: self.dequeued,
            frames_delivered: self.delivered,
            device: self.config.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ImagingAdapter;

    fn stub_config() -> V4l2Config {
        V4l2Config {
            device: "stub://test".to_string(),
            width: 8,
            height: 4,
        }
    }

    #[test]
    fn synthetic_camera_produces_rgb_frames() -> Result<(), AcquisitionError> {
        let mut camera = V4l2Camera::new(stub_config())?;
        camera.connect()?;

        let frame = camera.read()?;
        assert_eq!(frame.width, 8);
        assert_eq!(frame.height, 4);
        assert_eq!(frame.byte_len(), 8 * 4 * 3);
        Ok(())
    }

    #[test]
    fn adapter_skips_queued_synthetic_frames() -> Result<(), AcquisitionError> {
        let mut camera = V4l2Camera::new(stub_config())?;
        camera.connect()?;
        let mut adapter = ImagingAdapter::new(camera, 5);

        let frame = adapter.latest_frame()?;
        assert_eq!(frame.sequence, 6);

        let stats = adapter.source().stats();
        assert_eq!(stats.frames_dequeued, 6);
        assert_eq!(stats.frames_delivered, 1);
        Ok(())
    }

    #[test]
    fn index_maps_to_device_node() {
        let config = V4l2Config::for_index(2, 640, 480);
        assert_eq!(config.device, "/dev/video2");
    }

    #[cfg(not(feature = "capture-v4l2"))]
    #[test]
    fn real_device_requires_feature() {
        let err = V4l2Camera::new(V4l2Config::default())
            .err()
            .expect("feature disabled");
        assert!(err.is_device_unavailable());
    }
}
