use crate::config::InferenceConfig;
use ndarray::{Array, ArrayD, IxDyn};

#[cfg(feature = "ort-backend")]
pub mod ort;

/// A runtime able to execute the detector graph on a prepared input tensor.
pub trait InferenceBackend: Send {
    fn load(config: &InferenceConfig) -> anyhow::Result<Self>
    where
        Self: Sized;

    /// Run the graph on a `[1, 3, H, W]` tensor and return the raw
    /// `[1, queries, 4 + classes]` output.
    fn run(&mut self, images: &Array<f32, IxDyn>) -> anyhow::Result<ArrayD<f32>>;
}
