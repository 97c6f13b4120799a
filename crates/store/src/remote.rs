use crate::config::{FirebaseConfig, StoreBackend};
use crate::errors::StoreError;
use crate::firebase::FirebaseClient;
use crate::memory::{MemoryObjectStore, MemoryTree};
use serde_json::Value;
use std::sync::Arc;

/// JSON key/value tree addressed by `/`-separated paths.
///
/// Mirrors the realtime database: a missing node reads as `None`, writing
/// replaces the whole subtree, and removing a missing node succeeds.
pub trait RemoteTree: Send + Sync {
    fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;
    fn set(&self, path: &str, value: &Value) -> Result<(), StoreError>;
    fn remove(&self, path: &str) -> Result<(), StoreError>;

    /// Read a node together with a version tag for [`RemoteTree::set_if`].
    /// An absent node has a tag too.
    fn get_tagged(&self, path: &str) -> Result<(Option<Value>, String), StoreError>;

    /// Write only if the node still carries `etag`, else [`StoreError::Conflict`].
    fn set_if(&self, path: &str, value: &Value, etag: &str) -> Result<(), StoreError>;
}

/// Handle to an uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub path: String,
    pub download_token: Option<String>,
}

pub trait ObjectStore: Send + Sync {
    fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<ObjectMeta, StoreError>;

    /// A URL that fetches the object without further credentials.
    fn download_url(&self, meta: &ObjectMeta) -> Result<String, StoreError>;
}

/// Process-wide store handles, built once and shared.
#[derive(Clone)]
pub struct StoreHandles {
    pub tree: Arc<dyn RemoteTree>,
    pub objects: Arc<dyn ObjectStore>,
}

impl StoreHandles {
    pub fn in_memory() -> Self {
        Self {
            tree: Arc::new(MemoryTree::new()),
            objects: Arc::new(MemoryObjectStore::new()),
        }
    }
}

pub fn open_store(config: &FirebaseConfig) -> Result<StoreHandles, StoreError> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; nothing will be persisted");
            Ok(StoreHandles::in_memory())
        }
        StoreBackend::Firebase => {
            let client = Arc::new(FirebaseClient::new(config.clone())?);
            tracing::info!(
                database = %config.database_url,
                bucket = %config.storage_bucket,
                "Firebase client ready"
            );
            Ok(StoreHandles {
                tree: client.clone(),
                objects: client,
            })
        }
    }
}
