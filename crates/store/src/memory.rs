use crate::errors::StoreError;
use crate::paths::segments;
use crate::remote::{ObjectMeta, ObjectStore, RemoteTree};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

/// Tag of a node that does not exist, as the hosted database reports it.
const ABSENT_ETAG: &str = "null_etag";

/// In-process [`RemoteTree`] with realtime-database semantics.
///
/// Empty objects are pruned after writes and removals, so a node that lost
/// its last child reads back as absent, just like the hosted database.
#[derive(Debug, Default)]
pub struct MemoryTree {
    root: Mutex<Value>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self {
            root: Mutex::new(Value::Null),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Value> {
        // A panic while holding the lock cannot leave the JSON half-written.
        self.root.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whole tree, for inspection.
    pub fn snapshot(&self) -> Value {
        self.lock().clone()
    }
}

impl RemoteTree for MemoryTree {
    fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let parts = segments(path)?;
        Ok(node_at(&self.lock(), &parts).cloned())
    }

    fn set(&self, path: &str, value: &Value) -> Result<(), StoreError> {
        let parts = segments(path)?;
        write_at(&mut self.lock(), &parts, value);
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), StoreError> {
        let parts = segments(path)?;
        let mut root = self.lock();
        remove_at(&mut root, &parts);
        prune(&mut root);
        Ok(())
    }

    fn get_tagged(&self, path: &str) -> Result<(Option<Value>, String), StoreError> {
        let parts = segments(path)?;
        let root = self.lock();
        let node = node_at(&root, &parts);
        Ok((node.cloned(), etag_of(node)))
    }

    fn set_if(&self, path: &str, value: &Value, etag: &str) -> Result<(), StoreError> {
        let parts = segments(path)?;
        let mut root = self.lock();
        if etag_of(node_at(&root, &parts)) != etag {
            return Err(StoreError::Conflict(path.to_string()));
        }
        write_at(&mut root, &parts, value);
        Ok(())
    }
}

fn node_at<'a>(root: &'a Value, parts: &[&str]) -> Option<&'a Value> {
    let mut node = root;
    for part in parts {
        node = node.get(*part)?;
    }
    (!node.is_null()).then_some(node)
}

fn write_at(root: &mut Value, parts: &[&str], value: &Value) {
    if value.is_null() {
        remove_at(root, parts);
    } else {
        *entry_at(root, parts) = value.clone();
    }
    prune(root);
}

/// Content hash of a node; object keys serialize in sorted order.
fn etag_of(node: Option<&Value>) -> String {
    match node {
        Some(value) => {
            let mut hasher = DefaultHasher::new();
            value.to_string().hash(&mut hasher);
            format!("{:016x}", hasher.finish())
        }
        None => ABSENT_ETAG.to_string(),
    }
}

/// Walk to `parts`, turning scalars on the way into objects.
fn entry_at<'a>(mut node: &'a mut Value, parts: &[&str]) -> &'a mut Value {
    for part in parts {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map.entry(part.to_string()).or_insert(Value::Null),
            _ => unreachable!("node was just made an object"),
        };
    }
    node
}

fn remove_at(root: &mut Value, parts: &[&str]) {
    let Some((last, parents)) = parts.split_last() else {
        *root = Value::Null;
        return;
    };

    let mut node = root;
    for part in parents {
        match node.get_mut(*part) {
            Some(child) => node = child,
            None => return,
        }
    }
    if let Value::Object(map) = node {
        map.remove(*last);
    }
}

/// Drop nulls and empty objects bottom-up.
fn prune(node: &mut Value) {
    if let Value::Object(map) = node {
        for child in map.values_mut() {
            prune(child);
        }
        map.retain(|_, v| !v.is_null() && !matches!(v, Value::Object(m) if m.is_empty()));
        if map.is_empty() {
            *node = Value::Null;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// In-process [`ObjectStore`]; URLs use the `memory://` scheme.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, path: &str) -> Option<StoredObject> {
        self.lock().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<ObjectMeta, StoreError> {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Err(StoreError::InvalidPath(path.to_string()));
        }

        self.lock().insert(
            path.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(ObjectMeta {
            path: path.to_string(),
            download_token: None,
        })
    }

    fn download_url(&self, meta: &ObjectMeta) -> Result<String, StoreError> {
        if !self.lock().contains_key(&meta.path) {
            return Err(StoreError::InvalidPath(meta.path.clone()));
        }
        Ok(format!("memory://{}", meta.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_reads_as_none() {
        let tree = MemoryTree::new();
        assert_eq!(tree.get("total_counts").unwrap(), None);
        assert_eq!(tree.get("").unwrap(), None);
    }

    #[test]
    fn test_nested_set_and_get() {
        let tree = MemoryTree::new();
        tree.set("Detections/2024-01-05/Healthy/1704448800", &json!({"time": "t", "image_url": "u"}))
            .unwrap();

        assert_eq!(
            tree.get("Detections/2024-01-05/Healthy").unwrap(),
            Some(json!({"1704448800": {"time": "t", "image_url": "u"}}))
        );
        assert_eq!(
            tree.get("Detections/2024-01-05/Healthy/1704448800/time").unwrap(),
            Some(json!("t"))
        );
    }

    #[test]
    fn test_set_replaces_subtree() {
        let tree = MemoryTree::new();
        tree.set("total_counts", &json!({"A": 2, "B": 1})).unwrap();
        tree.set("total_counts", &json!({"A": 3})).unwrap();
        assert_eq!(tree.get("total_counts").unwrap(), Some(json!({"A": 3})));
    }

    #[test]
    fn test_set_through_scalar_creates_object() {
        let tree = MemoryTree::new();
        tree.set("a", &json!(1)).unwrap();
        tree.set("a/b", &json!(2)).unwrap();
        assert_eq!(tree.get("a").unwrap(), Some(json!({"b": 2})));
    }

    #[test]
    fn test_null_write_removes() {
        let tree = MemoryTree::new();
        tree.set("a/b", &json!(1)).unwrap();
        tree.set("a/b", &Value::Null).unwrap();
        assert_eq!(tree.get("a").unwrap(), None);
        assert_eq!(tree.snapshot(), Value::Null);
    }

    #[test]
    fn test_remove_prunes_empty_parents() {
        let tree = MemoryTree::new();
        tree.set("Detections/d/A/1", &json!("x")).unwrap();
        tree.set("total_counts/A", &json!(1)).unwrap();

        tree.remove("Detections/d/A/1").unwrap();
        assert_eq!(tree.get("Detections").unwrap(), None);
        assert_eq!(tree.snapshot(), json!({"total_counts": {"A": 1}}));

        // Removing a missing node is fine.
        tree.remove("Detections/nothing/here").unwrap();
    }

    #[test]
    fn test_tagged_read_then_conditional_write() {
        let tree = MemoryTree::new();
        let (value, absent) = tree.get_tagged("total_counts").unwrap();
        assert_eq!(value, None);

        tree.set_if("total_counts", &json!({"A": 1}), &absent).unwrap();
        let (value, etag) = tree.get_tagged("total_counts").unwrap();
        assert_eq!(value, Some(json!({"A": 1})));
        assert_ne!(etag, absent);

        tree.set_if("total_counts", &json!({"A": 2}), &etag).unwrap();
        assert_eq!(tree.get("total_counts/A").unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_stale_etag_conflicts() {
        let tree = MemoryTree::new();
        tree.set("total_counts", &json!({"A": 1})).unwrap();
        let (_, etag) = tree.get_tagged("total_counts").unwrap();

        tree.set("total_counts/A", &json!(5)).unwrap();
        let err = tree.set_if("total_counts", &json!({"A": 2}), &etag).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(path) if path == "total_counts"));
        assert_eq!(tree.get("total_counts/A").unwrap(), Some(json!(5)));

        // Same content, same tag.
        tree.set("total_counts/A", &json!(1)).unwrap();
        tree.set_if("total_counts", &json!({"A": 2}), &etag).unwrap();
    }

    #[test]
    fn test_invalid_paths_rejected() {
        let tree = MemoryTree::new();
        assert!(tree.set("Leaf#1", &json!(1)).is_err());
        assert!(tree.get("a//b").is_err());
    }

    #[test]
    fn test_object_store_roundtrip() {
        let store = MemoryObjectStore::new();
        let meta = store
            .put("Detections/d/A_1.jpg", &[0xFF, 0xD8], "image/jpeg")
            .unwrap();

        assert_eq!(store.download_url(&meta).unwrap(), "memory://Detections/d/A_1.jpg");
        assert_eq!(store.get("Detections/d/A_1.jpg").unwrap().content_type, "image/jpeg");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_download_url_for_unknown_object_fails() {
        let store = MemoryObjectStore::new();
        let meta = ObjectMeta {
            path: "missing.jpg".to_string(),
            download_token: None,
        };
        assert!(store.download_url(&meta).is_err());
    }
}
