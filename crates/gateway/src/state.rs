use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionInfo {
    pub label: String,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// JSON header sent ahead of every streamed JPEG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMessage {
    pub frame_number: u64,
    pub timestamp_ms: i64,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    pub detections: Vec<DetectionInfo>,
}

#[derive(Debug, Clone)]
pub struct FramePacket {
    pub metadata: FrameMessage,
    pub jpeg_data: Vec<u8>,
}

impl FramePacket {
    /// `[u32 LE json length][json][jpeg]`
    pub fn to_binary(&self) -> Result<Vec<u8>, serde_json::Error> {
        let json = serde_json::to_vec(&self.metadata)?;

        let mut binary_msg = Vec::with_capacity(4 + json.len() + self.jpeg_data.len());
        binary_msg.extend_from_slice(&(json.len() as u32).to_le_bytes());
        binary_msg.extend_from_slice(&json);
        binary_msg.extend_from_slice(&self.jpeg_data);
        Ok(binary_msg)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub packets: watch::Receiver<Option<Arc<FramePacket>>>,
}
