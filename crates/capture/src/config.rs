use common::{env_or, env_string};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// V4L2 camera
    Camera,
    /// Still images replayed in a loop, for bench setups without a camera
    Directory(String),
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub source: SourceKind,
    pub device_id: u32,
    pub width: u32,
    pub height: u32,
    pub open_attempts: u32,
    pub replay_fps: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Camera,
            device_id: 0,
            width: 640,
            height: 640,
            open_attempts: 10,
            replay_fps: 5.0,
        }
    }
}

impl CaptureConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let source = match env_string("CAPTURE_SOURCE", "camera").to_lowercase().as_str() {
            "directory" | "dir" => SourceKind::Directory(env_string("CAPTURE_DIR", "./frames")),
            _ => SourceKind::Camera,
        };

        Self {
            source,
            device_id: env_or("DEVICE_ID", defaults.device_id),
            width: env_or("CAPTURE_WIDTH", defaults.width),
            height: env_or("CAPTURE_HEIGHT", defaults.height),
            open_attempts: env_or("CAPTURE_OPEN_ATTEMPTS", defaults.open_attempts),
            replay_fps: env_or("REPLAY_FPS", defaults.replay_fps),
        }
    }
}
