use ab_glyph::{FontVec, PxScale};
use capture::Frame;
use common::span;
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};
use inference::{BoundingBox, Detection};
use std::path::Path;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const FPS_COLOR: Rgb<u8> = Rgb([100, 255, 0]);
const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f32 = 20.0;
const FPS_SCALE: f32 = 28.0;
/// Top-left corner of the FPS readout.
const FPS_ORIGIN: (i32, i32) = (7, 7);
/// Label baseline sits this far above the box.
const LABEL_OFFSET: i32 = 10;

/// Draws boxes, labels and the FPS readout onto a copy of a frame.
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    pub fn new(font: Option<FontVec>) -> Self {
        Self { font }
    }

    /// Load a TrueType font. Missing or invalid fonts are logged once here
    /// and the annotator falls back to boxes only.
    pub fn from_font_path(path: Option<&str>) -> Self {
        let Some(path) = path else {
            tracing::info!("No font configured, annotating boxes only");
            return Self::new(None);
        };

        match load_font(Path::new(path)) {
            Ok(font) => {
                tracing::info!(font = path, "Annotation font loaded");
                Self::new(Some(font))
            }
            Err(e) => {
                tracing::warn!(font = path, error = %e, "Font unavailable, annotating boxes only");
                Self::new(None)
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Returns a new frame; the input frame's pixels are left untouched.
    pub fn annotate(&self, frame: &Frame, detections: &[Detection], fps: Option<f64>) -> Frame {
        let _s = span!("annotate", detections = detections.len());

        let mut canvas: RgbImage = frame.image().clone();

        for det in detections {
            draw_box(&mut canvas, &det.bbox);
        }

        if let Some(font) = &self.font {
            for det in detections {
                let (x, y) = label_anchor(&det.bbox);
                draw_text_mut(
                    &mut canvas,
                    LABEL_COLOR,
                    x,
                    y - LABEL_SCALE as i32,
                    PxScale::from(LABEL_SCALE),
                    font,
                    &label_text(det),
                );
            }

            if let Some(fps) = fps {
                draw_text_mut(
                    &mut canvas,
                    FPS_COLOR,
                    FPS_ORIGIN.0,
                    FPS_ORIGIN.1,
                    PxScale::from(FPS_SCALE),
                    font,
                    &fps_text(fps),
                );
            }
        }

        frame.with_image(canvas)
    }
}

fn load_font(path: &Path) -> anyhow::Result<FontVec> {
    let bytes = std::fs::read(path)?;
    Ok(FontVec::try_from_vec(bytes)?)
}

fn draw_box(canvas: &mut RgbImage, bbox: &BoundingBox) {
    let (x, y) = (bbox.x1.round() as i32, bbox.y1.round() as i32);
    let (w, h) = (bbox.width().round() as i32, bbox.height().round() as i32);

    for t in 0..BOX_THICKNESS {
        let (rw, rh) = (w - 2 * t, h - 2 * t);
        // Rect::of_size rejects empty rectangles.
        if rw <= 0 || rh <= 0 {
            break;
        }
        draw_hollow_rect_mut(
            canvas,
            Rect::at(x + t, y + t).of_size(rw as u32, rh as u32),
            BOX_COLOR,
        );
    }
}

/// Baseline of the label text: `(x1, y1 - 10)`.
pub fn label_anchor(bbox: &BoundingBox) -> (i32, i32) {
    (bbox.x1 as i32, bbox.y1 as i32 - LABEL_OFFSET)
}

pub fn label_text(det: &Detection) -> String {
    format!("{} {:.2}", det.label, det.confidence)
}

pub fn fps_text(fps: f64) -> String {
    format!("FPS: {:.2}", fps)
}
