use crate::detection::{BoundingBox, RawDetection};

/// Maps normalised model coordinates back onto the source frame.
#[derive(Debug, Clone, Copy)]
pub struct TransformParams {
    pub orig_width: u32,
    pub orig_height: u32,
}

pub struct PostProcessor {
    pub min_confidence: f32,
}

impl PostProcessor {
    pub fn new(min_confidence: f32) -> Self {
        Self { min_confidence }
    }

    /// Decode RT-DETR output `[1, queries, 4 + classes]`: normalised cxcywh
    /// followed by per-class scores.
    #[tracing::instrument(skip(self, output, transform))]
    pub fn parse_detections(
        &self,
        output: &ndarray::ArrayViewD<f32>,
        transform: &TransformParams,
    ) -> anyhow::Result<Vec<RawDetection>> {
        let shape = output.shape();
        if shape.len() != 3 || shape[0] != 1 || shape[2] <= 4 {
            anyhow::bail!("Unexpected RT-DETR output shape {:?}", shape);
        }
        let num_queries = shape[1];
        let num_classes = shape[2] - 4;

        let w = transform.orig_width as f32;
        let h = transform.orig_height as f32;

        let mut detections = Vec::new();
        for i in 0..num_queries {
            let (class_idx, confidence) = (0..num_classes)
                .map(|c| (c, output[[0, i, 4 + c]]))
                .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 { cur } else { best }
                });

            if confidence < self.min_confidence {
                continue;
            }

            let (x1, y1, x2, y2) = cxcywh_to_xyxy(
                output[[0, i, 0]],
                output[[0, i, 1]],
                output[[0, i, 2]],
                output[[0, i, 3]],
            );

            detections.push(RawDetection::new(
                class_idx as i64,
                confidence.clamp(0.0, 1.0),
                BoundingBox::new(
                    (x1 * w).clamp(0.0, w),
                    (y1 * h).clamp(0.0, h),
                    (x2 * w).clamp(0.0, w),
                    (y2 * h).clamp(0.0, h),
                ),
            ));
        }

        Ok(detections)
    }
}

/// Convert bounding box from center-width-height format to corner format
#[inline]
fn cxcywh_to_xyxy(cx: f32, cy: f32, w: f32, h: f32) -> (f32, f32, f32, f32) {
    (cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
}
