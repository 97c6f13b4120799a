use common::{env_or, env_string};
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Cpu,
    Cuda,
}

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub model_path: String,
    pub input_size: (u32, u32),
    pub input_name: String,
    pub output_name: String,
    pub labels_path: Option<String>,
    /// Floor applied inside the engine; the real threshold lives in the filter.
    pub min_confidence: f32,
    pub provider: ExecutionProvider,
    pub intra_threads: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model_path: "models/best.onnx".to_string(),
            input_size: (640, 640),
            input_name: "images".to_string(),
            output_name: "output0".to_string(),
            labels_path: None,
            min_confidence: 0.25,
            provider: ExecutionProvider::Cpu,
            intra_threads: 4,
        }
    }
}

impl InferenceConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let provider = match env_string("EXECUTION_PROVIDER", "cpu").to_lowercase().as_str() {
            "cuda" | "gpu" => ExecutionProvider::Cuda,
            _ => ExecutionProvider::Cpu,
        };

        Self {
            model_path: env_string("MODEL_PATH", &defaults.model_path),
            input_size: (
                env_or("INPUT_WIDTH", defaults.input_size.0),
                env_or("INPUT_HEIGHT", defaults.input_size.1),
            ),
            input_name: env_string("MODEL_INPUT_NAME", &defaults.input_name),
            output_name: env_string("MODEL_OUTPUT_NAME", &defaults.output_name),
            labels_path: env::var("LABELS_PATH").ok().filter(|p| !p.trim().is_empty()),
            min_confidence: env_or("ENGINE_MIN_CONFIDENCE", defaults.min_confidence),
            provider,
            intra_threads: env_or("INTRA_THREADS", defaults.intra_threads),
        }
    }
}
