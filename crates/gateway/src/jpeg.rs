use crate::errors::GatewayError;
use capture::Frame;

/// Encode a frame's RGB8 pixels as JPEG.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, GatewayError> {
    encode_rgb(frame.pixels(), frame.width(), frame.height(), quality)
}

pub fn encode_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    quality: u8,
) -> Result<Vec<u8>, GatewayError> {
    if width == 0 || height == 0 {
        return Err(GatewayError::EmptyImage { width, height });
    }

    let expected = (width * height * 3) as usize;
    if pixels.len() != expected {
        return Err(GatewayError::SizeMismatch {
            expected,
            actual: pixels.len(),
        });
    }

    let image = turbojpeg::Image {
        pixels,
        width: width as usize,
        pitch: width as usize * 3,
        height: height as usize,
        format: turbojpeg::PixelFormat::RGB,
    };
    let jpeg = turbojpeg::compress(image, quality.clamp(1, 100) as i32, turbojpeg::Subsamp::Sub2x2)?;

    Ok(jpeg.to_vec())
}
