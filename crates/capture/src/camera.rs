use crate::config::CaptureConfig;
use crate::decoder::{FrameDecoder, MjpegDecoder, YuyvDecoder};
use crate::device::{CameraDevice, PixelFormat};
use crate::errors::CaptureError;
use crate::frame::Frame;
use crate::source::FrameSource;
use chrono::Local;
use v4l::{
    Device,
    buffer::Type,
    io::{mmap::Stream, traits::CaptureStream},
};

const BUFFER_COUNT: u32 = 4;

/// V4L2 camera streaming through mmap buffers.
pub struct V4lCamera {
    // Stream must drop before the device it was created from.
    stream: Option<Stream<'static>>,
    device: Option<Device>,
    decoder: Box<dyn FrameDecoder>,
    width: u32,
    height: u32,
    frame_count: u64,
    dropped_frames: u64,
}

impl V4lCamera {
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let camera = CameraDevice::open(config)?;

        let decoder: Box<dyn FrameDecoder> = match camera.pixel_format {
            PixelFormat::Yuyv => Box::new(YuyvDecoder),
            PixelFormat::Mjpeg => Box::new(MjpegDecoder::new()?),
        };

        let stream = Stream::with_buffers(&camera.device, Type::VideoCapture, BUFFER_COUNT)?;

        tracing::info!(
            "Camera stream started at {}x{}",
            camera.width,
            camera.height
        );

        Ok(Self {
            stream: Some(stream),
            device: Some(camera.device),
            decoder,
            width: camera.width,
            height: camera.height,
            frame_count: 0,
            dropped_frames: 0,
        })
    }
}

impl FrameSource for V4lCamera {
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        let stream = self.stream.as_mut().ok_or(CaptureError::Released)?;

        let rgb = match stream.next() {
            Ok((buf, _meta)) => self.decoder.decode(buf, self.width, self.height),
            Err(e) => Err(e.into()),
        };

        match rgb {
            Ok(rgb) => {
                let frame =
                    Frame::from_rgb(self.frame_count, Local::now(), self.width, self.height, rgb)?;
                self.frame_count += 1;
                Ok(frame)
            }
            Err(e) => {
                self.dropped_frames += 1;
                Err(e)
            }
        }
    }

    fn release(&mut self) {
        if self.stream.is_none() && self.device.is_none() {
            return;
        }
        drop(self.stream.take());
        drop(self.device.take());
        tracing::info!(
            "Camera released: {} frames captured, {} dropped",
            self.frame_count,
            self.dropped_frames
        );
    }
}

impl Drop for V4lCamera {
    fn drop(&mut self) {
        self.release();
    }
}
