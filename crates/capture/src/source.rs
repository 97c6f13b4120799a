use crate::camera::V4lCamera;
use crate::config::{CaptureConfig, SourceKind};
use crate::directory::DirectorySource;
use crate::errors::CaptureError;
use crate::frame::Frame;

/// Pulls frames from a capture device at the device's own cadence.
pub trait FrameSource: Send {
    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Stop streaming and close the device. Idempotent.
    fn release(&mut self);
}

/// Open the source described by `config`.
///
/// Failing here is fatal for a session: the pipeline never starts without a
/// capture device.
pub fn open_source(config: &CaptureConfig) -> Result<Box<dyn FrameSource>, CaptureError> {
    match &config.source {
        SourceKind::Camera => Ok(Box::new(V4lCamera::open(config)?)),
        SourceKind::Directory(dir) => Ok(Box::new(DirectorySource::open(dir, config.replay_fps)?)),
    }
}
