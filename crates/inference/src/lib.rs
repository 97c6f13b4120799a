pub mod backend;
pub mod config;
pub mod detection;
pub mod engine;
pub mod filter;
pub mod labels;
pub mod processing;

pub use backend::InferenceBackend;
pub use config::InferenceConfig;
pub use detection::{BoundingBox, RawDetection};
pub use engine::{Detector, InferenceEngine, load_engine};
pub use filter::{Detection, DetectionFilter};
pub use labels::{LabelTable, UNKNOWN_LABEL};
