use capture::CaptureConfig;
use common::{Environment, env_flag, env_or, env_string};
use gateway::GatewayConfig;
use inference::{
    InferenceConfig,
    filter::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_EXCLUDED_LABEL},
};
use std::time::Duration;
use store::{FirebaseConfig, paths::DETECTIONS};

pub const DEFAULT_FONT_PATH: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

/// What happens when the persistence queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueFullPolicy {
    /// Evict the oldest job; evicted counts carry over to the next counts job.
    DropOldest,
    /// Wait for the persistence worker to make room.
    Block,
}

/// How often evidence is uploaded for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidencePolicy {
    PerLabel,
    PerDetection,
}

/// Granularity of evidence record keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    Seconds,
    Millis,
}

#[derive(Debug, Clone)]
pub struct PersistConfig {
    pub capacity: usize,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub full_policy: QueueFullPolicy,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            full_policy: QueueFullPolicy::DropOldest,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub environment: Environment,
    pub capture: CaptureConfig,
    pub inference: InferenceConfig,
    pub store: FirebaseConfig,
    pub gateway: GatewayConfig,
    pub confidence_threshold: f32,
    pub excluded_label: String,
    pub font_path: Option<String>,
    pub jpeg_quality: u8,
    /// Object-store folder for evidence images. Records stay under `Detections`.
    pub evidence_object_prefix: String,
    pub key_mode: KeyMode,
    pub evidence_policy: EvidencePolicy,
    pub persist: PersistConfig,
    pub control_poll_interval: Duration,
    pub autostart: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            capture: CaptureConfig::default(),
            inference: InferenceConfig::default(),
            store: FirebaseConfig::default(),
            gateway: GatewayConfig::default(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            excluded_label: DEFAULT_EXCLUDED_LABEL.to_string(),
            font_path: Some(DEFAULT_FONT_PATH.to_string()),
            jpeg_quality: 85,
            evidence_object_prefix: DETECTIONS.to_string(),
            key_mode: KeyMode::Seconds,
            evidence_policy: EvidencePolicy::PerLabel,
            persist: PersistConfig::default(),
            control_poll_interval: Duration::from_millis(500),
            autostart: false,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let key_mode = match env_string("EVIDENCE_KEY_MODE", "seconds").to_lowercase().as_str() {
            "millis" | "ms" | "milliseconds" => KeyMode::Millis,
            _ => KeyMode::Seconds,
        };

        let evidence_policy = match env_string("EVIDENCE_POLICY", "per-label")
            .to_lowercase()
            .as_str()
        {
            "per-detection" | "detection" => EvidencePolicy::PerDetection,
            _ => EvidencePolicy::PerLabel,
        };

        let full_policy = match env_string("QUEUE_FULL_POLICY", "drop-oldest")
            .to_lowercase()
            .as_str()
        {
            "block" => QueueFullPolicy::Block,
            _ => QueueFullPolicy::DropOldest,
        };

        // An empty FONT_PATH disables text rendering.
        let font_path = Some(env_string("FONT_PATH", DEFAULT_FONT_PATH))
            .filter(|p| !p.trim().is_empty());

        Self {
            environment: Environment::from_env(),
            capture: CaptureConfig::from_env(),
            inference: InferenceConfig::from_env(),
            store: FirebaseConfig::from_env(),
            gateway: GatewayConfig::from_env(),
            confidence_threshold: env_or("CONFIDENCE_THRESHOLD", defaults.confidence_threshold),
            excluded_label: env_string("EXCLUDED_LABEL", &defaults.excluded_label),
            font_path,
            jpeg_quality: env_or("JPEG_QUALITY", defaults.jpeg_quality).clamp(1, 100),
            evidence_object_prefix: env_string(
                "EVIDENCE_OBJECT_PREFIX",
                &defaults.evidence_object_prefix,
            ),
            key_mode,
            evidence_policy,
            persist: PersistConfig {
                capacity: env_or("PERSIST_QUEUE_CAPACITY", defaults.persist.capacity).max(1),
                max_retries: env_or("PERSIST_MAX_RETRIES", defaults.persist.max_retries),
                base_delay: Duration::from_millis(env_or("PERSIST_BASE_DELAY_MS", 200)),
                full_policy,
            },
            control_poll_interval: Duration::from_millis(env_or("CONTROL_POLL_MS", 500)),
            autostart: env_flag("AUTOSTART", defaults.autostart),
        }
    }
}
