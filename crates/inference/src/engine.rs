use crate::backend::InferenceBackend;
use crate::config::InferenceConfig;
use crate::detection::RawDetection;
use crate::processing::{
    post::{PostProcessor, TransformParams},
    pre::PreProcessor,
};
use capture::Frame;
use common::span;

/// Anything that turns a frame into raw detections.
///
/// The pipeline only sees this trait, so scripted engines can stand in
/// for a real model in tests.
pub trait InferenceEngine: Send {
    fn infer(&mut self, frame: &Frame) -> anyhow::Result<Vec<RawDetection>>;
}

/// Preprocess, run a backend, decode its output.
pub struct Detector<B: InferenceBackend> {
    backend: B,
    preprocessor: PreProcessor,
    postprocessor: PostProcessor,
}

impl<B: InferenceBackend> Detector<B> {
    pub fn new(backend: B, config: &InferenceConfig) -> Self {
        Self {
            backend,
            preprocessor: PreProcessor::new(config.input_size),
            postprocessor: PostProcessor::new(config.min_confidence),
        }
    }
}

impl<B: InferenceBackend> InferenceEngine for Detector<B> {
    fn infer(&mut self, frame: &Frame) -> anyhow::Result<Vec<RawDetection>> {
        let _s = span!("infer", frame = frame.number());

        let input = self.preprocessor.preprocess(frame)?;

        let output = {
            let _s = span!("model_run");
            self.backend.run(&input)?
        };

        let transform = TransformParams {
            orig_width: frame.width(),
            orig_height: frame.height(),
        };
        self.postprocessor
            .parse_detections(&output.view(), &transform)
    }
}

/// Build the engine selected by the enabled backend feature.
pub fn load_engine(config: &InferenceConfig) -> anyhow::Result<Box<dyn InferenceEngine>> {
    #[cfg(feature = "ort-backend")]
    {
        let backend = crate::backend::ort::OrtBackend::load(config)?;
        Ok(Box::new(Detector::new(backend, config)))
    }

    #[cfg(not(feature = "ort-backend"))]
    {
        let _ = config;
        anyhow::bail!("No inference backend enabled; build with the `ort-backend` feature")
    }
}
