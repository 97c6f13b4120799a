use crate::detection::{BoundingBox, RawDetection};
use crate::labels::LabelTable;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.8;
pub const DEFAULT_EXCLUDED_LABEL: &str = "Not-Grapevine-Leaf";

/// A detection that passed the confidence and label filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Keeps a raw detection iff `confidence >= threshold` and its resolved
/// label is not the excluded one.
#[derive(Debug, Clone)]
pub struct DetectionFilter {
    labels: LabelTable,
    confidence_threshold: f32,
    excluded_label: String,
}

impl DetectionFilter {
    pub fn new(labels: LabelTable, confidence_threshold: f32, excluded_label: impl Into<String>) -> Self {
        Self {
            labels,
            confidence_threshold,
            excluded_label: excluded_label.into(),
        }
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn excluded_label(&self) -> &str {
        &self.excluded_label
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn keeps(&self, raw: &RawDetection) -> bool {
        raw.confidence >= self.confidence_threshold
            && self.labels.resolve(raw.class_id) != self.excluded_label
    }

    pub fn filter(&self, raw: &[RawDetection]) -> Vec<Detection> {
        raw.iter()
            .filter(|d| self.keeps(d))
            .map(|d| Detection {
                label: self.labels.resolve(d.class_id).to_string(),
                confidence: d.confidence,
                bbox: d.bbox,
            })
            .collect()
    }
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self::new(
            LabelTable::default(),
            DEFAULT_CONFIDENCE_THRESHOLD,
            DEFAULT_EXCLUDED_LABEL,
        )
    }
}
