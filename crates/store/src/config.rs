use common::{env_or, env_string};

pub const DEFAULT_STORAGE_HOST: &str = "https://firebasestorage.googleapis.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Firebase,
    /// Process-local tree and object store, for demos and tests.
    Memory,
}

#[derive(Debug, Clone)]
pub struct FirebaseConfig {
    pub backend: StoreBackend,
    pub database_url: String,
    pub storage_bucket: String,
    pub storage_host: String,
    pub auth_token: Option<String>,
    pub timeout_ms: u64,
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Firebase,
            database_url: String::new(),
            storage_bucket: String::new(),
            storage_host: DEFAULT_STORAGE_HOST.to_string(),
            auth_token: None,
            timeout_ms: 10_000,
        }
    }
}

impl FirebaseConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let backend = match env_string("STORE_BACKEND", "firebase").to_lowercase().as_str() {
            "memory" | "mem" => StoreBackend::Memory,
            _ => StoreBackend::Firebase,
        };

        let auth_token = Some(env_string("FIREBASE_AUTH_TOKEN", ""))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Self {
            backend,
            database_url: env_string("FIREBASE_DATABASE_URL", &defaults.database_url),
            storage_bucket: env_string("FIREBASE_STORAGE_BUCKET", &defaults.storage_bucket),
            storage_host: env_string("FIREBASE_STORAGE_HOST", &defaults.storage_host),
            auth_token,
            timeout_ms: env_or("FIREBASE_TIMEOUT_MS", defaults.timeout_ms),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            backend: StoreBackend::Memory,
            ..Self::default()
        }
    }
}
