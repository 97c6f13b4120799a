pub mod camera;
pub mod config;
pub mod decoder;
pub mod device;
pub mod directory;
pub mod errors;
pub mod frame;
pub mod source;

pub use camera::V4lCamera;
pub use config::{CaptureConfig, SourceKind};
pub use decoder::{FrameDecoder, MjpegDecoder, YuyvDecoder};
pub use device::PixelFormat;
pub use directory::DirectorySource;
pub use errors::CaptureError;
pub use frame::Frame;
pub use source::{FrameSource, open_source};
