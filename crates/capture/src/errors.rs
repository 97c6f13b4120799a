use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("No usable video capture device found")]
    NoDevice,

    #[error("Camera supports neither YUYV nor MJPEG (available: {0})")]
    UnsupportedFormat(String),

    #[error("Frame decode failed: {0}")]
    Decode(String),

    #[error("Pixel buffer size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("No images matched {0}")]
    EmptyDirectory(String),

    #[error("Capture source already released")]
    Released,
}

impl From<turbojpeg::Error> for CaptureError {
    fn from(err: turbojpeg::Error) -> Self {
        CaptureError::Decode(err.to_string())
    }
}

impl From<image::ImageError> for CaptureError {
    fn from(err: image::ImageError) -> Self {
        CaptureError::Decode(err.to_string())
    }
}
