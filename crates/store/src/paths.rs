//! Well-known keys and path builders for the remote tree and object store.

use crate::errors::StoreError;

/// Cumulative per-label counts document.
pub const TOTAL_COUNTS: &str = "total_counts";
/// Root of evidence records and evidence images.
pub const DETECTIONS: &str = "Detections";
/// Control key asking the service to start a session.
pub const LOAD_DETECTION: &str = "load_detection";
/// Control key asking the service to stop the running session.
pub const TERMINATE: &str = "terminate";

/// Characters the realtime tree refuses inside a key.
const FORBIDDEN: [char; 5] = ['.', '#', '$', '[', ']'];

/// Replace every key-unsafe character with `_`. Idempotent.
pub fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if FORBIDDEN.contains(&c) { '_' } else { c })
        .collect()
}

/// `{prefix}/{date}/{sanitized label}`
pub fn evidence_record_path(prefix: &str, date: &str, label: &str) -> String {
    format!("{}/{}/{}", prefix, date, sanitize_label(label))
}

/// `{prefix}/{date}/{sanitized label}_{key}.jpg`
pub fn evidence_object_path(prefix: &str, date: &str, label: &str, key: &str) -> String {
    format!("{}/{}/{}_{}.jpg", prefix, date, sanitize_label(label), key)
}

/// Split a tree path into segments. The empty path (or `/`) is the root.
pub fn segments(path: &str) -> Result<Vec<&str>, StoreError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let parts: Vec<&str> = trimmed.split('/').collect();
    if parts
        .iter()
        .any(|p| p.is_empty() || p.contains(FORBIDDEN.as_slice()))
    {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(parts)
}
