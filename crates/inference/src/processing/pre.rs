use capture::Frame;
use common::span;
use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use ndarray::{Array, IxDyn};

/// Stretches a frame to the model input size and lays it out as a
/// `[1, 3, H, W]` tensor scaled to 0..1.
///
/// RT-DETR exports are trained with stretch resizing, so there is no
/// letterbox and boxes map back with a plain per-axis scale.
pub struct PreProcessor {
    pub input_size: (u32, u32),
    resizer: Resizer,
    resized: Vec<u8>,
}

impl PreProcessor {
    pub fn new(input_size: (u32, u32)) -> Self {
        Self {
            input_size,
            resizer: Resizer::new(),
            resized: vec![0; (input_size.0 * input_size.1 * 3) as usize],
        }
    }

    pub fn preprocess(&mut self, frame: &Frame) -> anyhow::Result<Array<f32, IxDyn>> {
        let _s = span!("preprocess_frame");

        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            anyhow::bail!("Cannot preprocess an empty {}x{} frame", width, height);
        }

        if (width, height) == self.input_size {
            return Self::normalize(frame.pixels(), self.input_size);
        }

        let src = ImageRef::new(width, height, frame.pixels(), PixelType::U8x3)?;
        let mut dst = Image::from_slice_u8(
            self.input_size.0,
            self.input_size.1,
            &mut self.resized,
            PixelType::U8x3,
        )?;

        self.resizer.resize(
            &src,
            &mut dst,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
        )?;

        Self::normalize(&self.resized, self.input_size)
    }

    /// HWC u8 -> CHW f32 in 0..1
    fn normalize(pixels: &[u8], (width, height): (u32, u32)) -> anyhow::Result<Array<f32, IxDyn>> {
        let _s = span!("normalize");

        let spatial = (width * height) as usize;
        if pixels.len() != spatial * 3 {
            anyhow::bail!(
                "Buffer size mismatch: expected {}, got {} bytes",
                spatial * 3,
                pixels.len()
            );
        }

        let mut output = vec![0.0f32; 3 * spatial];
        for (i, px) in pixels.chunks_exact(3).enumerate() {
            output[i] = px[0] as f32 / 255.0;
            output[i + spatial] = px[1] as f32 / 255.0;
            output[i + 2 * spatial] = px[2] as f32 / 255.0;
        }

        Ok(Array::from_shape_vec(
            IxDyn(&[1, 3, height as usize, width as usize]),
            output,
        )?)
    }
}
