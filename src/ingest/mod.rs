//! Image acquisition.
//!
//! Capture devices queue several frames internally. A plain read returns the
//! oldest queued frame, which for a 1 Hz loop can be seconds old. The
//! [`ImagingAdapter`] drains a fixed number of queued frames before each read
//! so every cycle observes the most recently exposed frame.
//!
//! - `v4l2`: V4L2 camera (feature: capture-v4l2) with a `stub://` synthetic
//!   backend for bench runs and tests
//! - `normalize`: device pixel layouts to RGB24

mod normalize;
pub mod v4l2;

pub use normalize::{normalize_to_rgb, PixelFormat};
pub use v4l2::{CameraStats, V4l2Camera, V4l2Config};

use crate::error::AcquisitionError;
use crate::frame::ImageFrame;

/// Number of queued frames dropped before each read.
pub const DEFAULT_STALE_FRAMES: usize = 5;

/// A device that yields frames in queue order.
pub trait FrameSource {
    /// Dequeue and drop one frame.
    fn grab(&mut self) -> Result<(), AcquisitionError>;

    /// Dequeue one frame and return it.
    fn read(&mut self) -> Result<ImageFrame, AcquisitionError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn grab(&mut self) -> Result<(), AcquisitionError> {
        (**self).grab()
    }

    fn read(&mut self) -> Result<ImageFrame, AcquisitionError> {
        (**self).read()
    }
}

/// Returns the freshest frame from a buffering source.
pub struct ImagingAdapter<S> {
    source: S,
    stale_frames: usize,
}

impl<S: FrameSource> ImagingAdapter<S> {
    pub fn new(source: S, stale_frames: usize) -> Self {
        Self {
            source,
            stale_frames,
        }
    }

    /// Drop the stale queue, then read the newest frame.
    ///
    /// A failed grab of a stale frame is not fatal on its own; only a lost
    /// device aborts early.
    pub fn latest_frame(&mut self) -> Result<ImageFrame, AcquisitionError> {
        for _ in 0..self.stale_frames {
            match self.source.grab() {
                Ok(()) => {}
                Err(err) if err.is_device_unavailable() => return Err(err),
                Err(err) => log::debug!("stale frame grab failed: {}", err),
            }
        }
        self.source.read()
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Device;

    /// Queue of numbered frames; `fail_grab_at` makes one grab fail.
    struct Queue {
        next: u64,
        grabs: usize,
        fail_grab_at: Option<(usize, bool)>,
    }

    impl Queue {
        fn new() -> Self {
            Self {
                next: 0,
                grabs: 0,
                fail_grab_at: None,
            }
        }
    }

    impl FrameSource for Queue {
        fn grab(&mut self) -> Result<(), AcquisitionError> {
            self.grabs += 1;
            self.next += 1;
            match self.fail_grab_at {
                Some((at, true)) if at == self.grabs => {
                    Err(AcquisitionError::unavailable(Device::Camera, "unplugged"))
                }
                Some((at, false)) if at == self.grabs => {
                    Err(AcquisitionError::CaptureFailure("torn buffer".into()))
                }
                _ => Ok(()),
            }
        }

        fn read(&mut self) -> Result<ImageFrame, AcquisitionError> {
            self.next += 1;
            Ok(ImageFrame::from_rgb(vec![0; 3], 1, 1, self.next))
        }
    }

    #[test]
    fn discards_stale_frames_before_reading() {
        let mut adapter = ImagingAdapter::new(Queue::new(), DEFAULT_STALE_FRAMES);
        let frame = adapter.latest_frame().expect("frame");
        assert_eq!(frame.sequence, 6);
        assert_eq!(adapter.source().grabs, 5);

        let frame = adapter.latest_frame().expect("frame");
        assert_eq!(frame.sequence, 12);
    }

    #[test]
    fn transient_grab_failure_still_reads() {
        let mut queue = Queue::new();
        queue.fail_grab_at = Some((2, false));
        let mut adapter = ImagingAdapter::new(queue, 3);
        assert!(adapter.latest_frame().is_ok());
    }

    #[test]
    fn lost_device_during_grab_aborts() {
        let mut queue = Queue::new();
        queue.fail_grab_at = Some((2, true));
        let mut adapter = ImagingAdapter::new(queue, 3);
        let err = adapter.latest_frame().expect_err("device lost");
        assert!(err.is_device_unavailable());
        assert_eq!(adapter.source().grabs, 2);
    }
}
