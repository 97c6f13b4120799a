use common::{env_or, env_string};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub addr: String,
    /// Quality of the JPEGs streamed to viewers.
    pub jpeg_quality: u8,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            jpeg_quality: 80,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            addr: env_string("GATEWAY_ADDR", &defaults.addr),
            jpeg_quality: env_or("DISPLAY_JPEG_QUALITY", defaults.jpeg_quality).clamp(1, 100),
        }
    }
}
