use crate::config::CaptureConfig;
use crate::errors::CaptureError;
use common::{Backoff, retry_with_backoff};
use std::time::Duration;
use v4l::{Device, FourCC, video::Capture};

pub(crate) const FOURCC_YUYV: FourCC = FourCC { repr: *b"YUYV" };
pub(crate) const FOURCC_MJPG: FourCC = FourCC { repr: *b"MJPG" };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Yuyv,
    Mjpeg,
}

impl PixelFormat {
    fn fourcc(self) -> FourCC {
        match self {
            PixelFormat::Yuyv => FOURCC_YUYV,
            PixelFormat::Mjpeg => FOURCC_MJPG,
        }
    }
}

fn find_usable_camera() -> Option<usize> {
    v4l::context::enum_devices()
        .into_iter()
        .find(|dev| {
            Device::with_path(dev.path())
                .and_then(|d| d.query_caps())
                .map(|caps| {
                    caps.capabilities
                        .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                })
                .unwrap_or(false)
        })
        .map(|dev| dev.index())
}

fn open_device(index: u32) -> Result<Device, CaptureError> {
    if let Ok(dev) = Device::new(index as usize)
        && dev.query_caps().is_ok()
    {
        return Ok(dev);
    }

    tracing::debug!(
        "Camera index {} busy or missing, scanning alternatives...",
        index
    );

    let fallback = find_usable_camera().ok_or(CaptureError::NoDevice)?;
    Ok(Device::new(fallback)?)
}

/// Prefer YUYV (cheap to decode), fall back to MJPEG.
fn select_format(device: &Device) -> Result<PixelFormat, CaptureError> {
    let formats = device.enum_formats()?;

    for fmt in &formats {
        tracing::debug!("Available format {:?}: {}", fmt.fourcc, fmt.description);
    }

    [PixelFormat::Yuyv, PixelFormat::Mjpeg]
        .into_iter()
        .find(|p| formats.iter().any(|f| f.fourcc == p.fourcc()))
        .ok_or_else(|| {
            CaptureError::UnsupportedFormat(
                formats
                    .iter()
                    .map(|f| format!("{:?}", f.fourcc))
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        })
}

/// An opened and configured V4L2 device.
pub struct CameraDevice {
    pub device: Device,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub fps: f64,
}

impl CameraDevice {
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let backoff = Backoff::new(config.open_attempts, Duration::from_millis(200));
        let device = retry_with_backoff(|| open_device(config.device_id), &backoff, "Camera open")?;

        let caps = device.query_caps()?;
        tracing::info!("Camera opened: {} ({})", caps.card, caps.driver);

        let pixel_format = select_format(&device)?;

        let mut format = device.format()?;
        format.fourcc = pixel_format.fourcc();
        format.width = config.width;
        format.height = config.height;
        // The driver may round to the closest supported size.
        let format = device.set_format(&format)?;

        tracing::info!(
            "Capture format: {}x{} {:?} ({:?})",
            format.width,
            format.height,
            format.fourcc,
            pixel_format
        );

        let params = device.params()?;
        let fps = if params.interval.numerator == 0 {
            0.0
        } else {
            params.interval.denominator as f64 / params.interval.numerator as f64
        };
        tracing::info!("Native frame rate: {:.1} fps", fps);

        Ok(Self {
            device,
            width: format.width,
            height: format.height,
            pixel_format,
            fps,
        })
    }
}
