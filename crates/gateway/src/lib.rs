pub mod config;
pub mod encoder;
pub mod errors;
pub mod jpeg;
pub mod server;
pub mod sink;
pub mod state;

pub use config::GatewayConfig;
pub use encoder::run_encoder;
pub use errors::GatewayError;
pub use jpeg::encode_jpeg;
pub use server::{router, run_server};
pub use sink::{DisplayFrame, DisplayHandle, DisplaySink, display_channel};
pub use state::{AppState, DetectionInfo, FrameMessage, FramePacket};
