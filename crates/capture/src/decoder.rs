use crate::errors::CaptureError;
use common::span;

/// Decodes a raw camera buffer into packed RGB8.
pub trait FrameDecoder: Send {
    /// Returns an owned RGB buffer of `width * height * 3` bytes.
    fn decode(&mut self, raw: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CaptureError>;
}

/// YUYV (YUV 4:2:2) decoder.
///
/// YUYV packs 2 pixels in 4 bytes: [Y0, U, Y1, V]
#[derive(Debug, Default)]
pub struct YuyvDecoder;

#[inline]
fn yuv_to_rgb(y: i32, rv: i32, guv: i32, bu: i32) -> [u8; 3] {
    [
        (y + rv).clamp(0, 255) as u8,
        (y - guv).clamp(0, 255) as u8,
        (y + bu).clamp(0, 255) as u8,
    ]
}

impl FrameDecoder for YuyvDecoder {
    fn decode(&mut self, raw: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CaptureError> {
        let _s = span!("decode_yuyv");

        let row_bytes = width as usize * 2;
        let rows = height as usize;
        if rows == 0 || raw.len() < row_bytes * rows {
            return Err(CaptureError::SizeMismatch {
                expected: row_bytes * rows,
                actual: raw.len(),
            });
        }
        // Drivers may pad rows; derive the real stride from the buffer.
        let stride = raw.len() / rows;

        let mut rgb = Vec::with_capacity(width as usize * rows * 3);
        for row in raw.chunks(stride).take(rows) {
            for px in row[..row_bytes].chunks_exact(4) {
                let u = px[1] as i32 - 128;
                let v = px[3] as i32 - 128;

                // BT.601, 8-bit fixed point
                let rv = (359 * v) >> 8;
                let guv = (88 * u + 183 * v) >> 8;
                let bu = (454 * u) >> 8;

                rgb.extend_from_slice(&yuv_to_rgb(px[0] as i32, rv, guv, bu));
                rgb.extend_from_slice(&yuv_to_rgb(px[2] as i32, rv, guv, bu));
            }
        }

        Ok(rgb)
    }
}

/// MJPEG decoder using turbojpeg (libjpeg-turbo)
pub struct MjpegDecoder {
    decompressor: turbojpeg::Decompressor,
}

impl MjpegDecoder {
    pub fn new() -> Result<Self, CaptureError> {
        Ok(Self {
            decompressor: turbojpeg::Decompressor::new()?,
        })
    }
}

impl FrameDecoder for MjpegDecoder {
    fn decode(&mut self, raw: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CaptureError> {
        let _s = span!("decode_mjpeg");

        let header = self.decompressor.read_header(raw)?;
        if header.width != width as usize || header.height != height as usize {
            return Err(CaptureError::Decode(format!(
                "JPEG is {}x{}, stream negotiated {}x{}",
                header.width, header.height, width, height
            )));
        }

        let mut rgb = vec![0u8; header.width * header.height * 3];
        let output = turbojpeg::Image {
            pixels: rgb.as_mut_slice(),
            width: header.width,
            pitch: header.width * 3,
            height: header.height,
            format: turbojpeg::PixelFormat::RGB,
        };
        self.decompressor.decompress(raw, output)?;

        Ok(rgb)
    }
}
