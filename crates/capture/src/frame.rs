use crate::errors::CaptureError;
use chrono::{DateTime, Local};
use image::RgbImage;
use std::sync::Arc;

/// One captured RGB8 frame.
///
/// Pixels are reference counted and never mutated after construction, so a
/// frame can be handed to the display and the evidence encoder at the same
/// time without copying.
#[derive(Debug, Clone)]
pub struct Frame {
    number: u64,
    captured_at: DateTime<Local>,
    image: Arc<RgbImage>,
}

impl Frame {
    pub const CHANNELS: u32 = 3;

    pub fn new(number: u64, captured_at: DateTime<Local>, image: RgbImage) -> Self {
        Self {
            number,
            captured_at,
            image: Arc::new(image),
        }
    }

    /// Build a frame from tightly packed RGB bytes.
    pub fn from_rgb(
        number: u64,
        captured_at: DateTime<Local>,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    ) -> Result<Self, CaptureError> {
        let expected = (width as usize) * (height as usize) * Self::CHANNELS as usize;
        if pixels.len() != expected {
            return Err(CaptureError::SizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        let image = RgbImage::from_raw(width, height, pixels).ok_or(CaptureError::SizeMismatch {
            expected,
            actual: 0,
        })?;
        Ok(Self::new(number, captured_at, image))
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channels(&self) -> u32 {
        Self::CHANNELS
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Derive a new frame with the same number and timestamp but other pixels.
    pub fn with_image(&self, image: RgbImage) -> Self {
        Self::new(self.number, self.captured_at, image)
    }
}
