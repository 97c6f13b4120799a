use crate::config::KeyMode;
use crate::errors::PipelineError;
use capture::Frame;
use chrono::{DateTime, Local};
use gateway::encode_jpeg;
use serde_json::json;
use std::sync::Arc;
use store::{ObjectStore, RemoteTree, StoreError, paths};

const CONTENT_TYPE: &str = "image/jpeg";

/// Evidence waiting on the persistence queue.
#[derive(Debug, Clone)]
pub struct EvidenceJob {
    pub label: String,
    /// The annotated frame that showed the detection.
    pub frame: Frame,
}

/// What got stored for one piece of evidence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceRecord {
    pub label: String,
    pub date: String,
    pub key: String,
    pub time: String,
    pub image_url: String,
}

/// Evidence encoded and addressed, ready to publish. Publishing is
/// idempotent, so it can be retried as a whole.
#[derive(Debug, Clone)]
pub struct PreparedEvidence {
    pub label: String,
    pub date: String,
    pub key: String,
    pub time: String,
    pub object_path: String,
    pub record_path: String,
    pub jpeg: Vec<u8>,
}

pub struct EvidenceUploader {
    tree: Arc<dyn RemoteTree>,
    objects: Arc<dyn ObjectStore>,
    /// Object-store folder for images. Records always live under `Detections`.
    object_prefix: String,
    key_mode: KeyMode,
    jpeg_quality: u8,
}

impl EvidenceUploader {
    pub fn new(
        tree: Arc<dyn RemoteTree>,
        objects: Arc<dyn ObjectStore>,
        object_prefix: impl Into<String>,
        key_mode: KeyMode,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            tree,
            objects,
            object_prefix: object_prefix.into(),
            key_mode,
            jpeg_quality,
        }
    }

    /// Encode and publish in one go.
    pub fn upload(
        &self,
        frame: &Frame,
        label: &str,
        timestamp: DateTime<Local>,
    ) -> Result<EvidenceRecord, PipelineError> {
        let prepared = self.prepare(frame, label, timestamp)?;
        Ok(self.publish(&prepared)?)
    }

    /// Encode the frame and derive every path. Fails only on encoding.
    pub fn prepare(
        &self,
        frame: &Frame,
        label: &str,
        timestamp: DateTime<Local>,
    ) -> Result<PreparedEvidence, PipelineError> {
        let jpeg = encode_jpeg(frame, self.jpeg_quality)?;

        let date = timestamp.format("%Y-%m-%d").to_string();
        let key = record_key(timestamp, self.key_mode);

        Ok(PreparedEvidence {
            label: label.to_string(),
            object_path: paths::evidence_object_path(&self.object_prefix, &date, label, &key),
            record_path: format!(
                "{}/{}",
                paths::evidence_record_path(paths::DETECTIONS, &date, label),
                key
            ),
            time: capture_time(timestamp),
            date,
            key,
            jpeg,
        })
    }

    /// Upload the image, resolve its URL and write the record.
    pub fn publish(&self, evidence: &PreparedEvidence) -> Result<EvidenceRecord, StoreError> {
        let meta = self
            .objects
            .put(&evidence.object_path, &evidence.jpeg, CONTENT_TYPE)?;
        let image_url = self.objects.download_url(&meta)?;

        self.tree.set(
            &evidence.record_path,
            &json!({ "time": evidence.time, "image_url": image_url }),
        )?;

        tracing::debug!(
            label = %evidence.label,
            path = %evidence.record_path,
            bytes = evidence.jpeg.len(),
            "Evidence stored"
        );

        Ok(EvidenceRecord {
            label: evidence.label.clone(),
            date: evidence.date.clone(),
            key: evidence.key.clone(),
            time: evidence.time.clone(),
            image_url,
        })
    }

    /// Drop every evidence record for a fresh session. Stored images stay.
    pub fn reset(&self) -> Result<(), StoreError> {
        self.tree.remove(paths::DETECTIONS)?;
        tracing::info!(path = paths::DETECTIONS, "Evidence records cleared");
        Ok(())
    }
}

/// Whole seconds by default: two detections of one label within the same
/// second share a key and the later record overwrites the earlier one.
pub fn record_key(timestamp: DateTime<Local>, mode: KeyMode) -> String {
    match mode {
        KeyMode::Seconds => timestamp.timestamp().to_string(),
        KeyMode::Millis => timestamp.timestamp_millis().to_string(),
    }
}

/// ctime-style, e.g. `Fri Jan  5 10:00:00 2024`.
pub fn capture_time(timestamp: DateTime<Local>) -> String {
    timestamp.format("%a %b %e %H:%M:%S %Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use store::{MemoryObjectStore, MemoryTree};

    fn timestamp() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 5, 10, 0, 0).unwrap()
    }

    fn frame() -> Frame {
        Frame::from_rgb(1, timestamp(), 8, 8, vec![120; 8 * 8 * 3]).unwrap()
    }

    fn uploader(key_mode: KeyMode) -> (Arc<MemoryTree>, Arc<MemoryObjectStore>, EvidenceUploader) {
        let tree = Arc::new(MemoryTree::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let uploader = EvidenceUploader::new(
            tree.clone(),
            objects.clone(),
            paths::DETECTIONS,
            key_mode,
            85,
        );
        (tree, objects, uploader)
    }

    #[test]
    fn test_record_keys() {
        let ts = Local.timestamp_millis_opt(1_704_448_800_123).unwrap();
        assert_eq!(record_key(ts, KeyMode::Seconds), "1704448800");
        assert_eq!(record_key(ts, KeyMode::Millis), "1704448800123");
    }

    #[test]
    fn test_capture_time_format() {
        assert_eq!(capture_time(timestamp()), "Fri Jan  5 10:00:00 2024");
    }

    #[test]
    fn test_upload_writes_image_and_record() {
        let (tree, objects, uploader) = uploader(KeyMode::Seconds);
        let key = record_key(timestamp(), KeyMode::Seconds);

        let record = uploader.upload(&frame(), "Leaf#1", timestamp()).unwrap();

        let object_path = format!("Detections/2024-01-05/Leaf_1_{key}.jpg");
        assert_eq!(record.date, "2024-01-05");
        assert_eq!(record.key, key);
        assert_eq!(record.image_url, format!("memory://{object_path}"));

        let stored = objects.get(&object_path).unwrap();
        assert_eq!(stored.content_type, "image/jpeg");
        assert_eq!(&stored.bytes[..2], &[0xFF, 0xD8]);

        assert_eq!(
            tree.get(&format!("Detections/2024-01-05/Leaf_1/{key}")).unwrap(),
            Some(json!({"time": "Fri Jan  5 10:00:00 2024", "image_url": record.image_url}))
        );
    }

    #[test]
    fn test_same_second_overwrites() {
        let (tree, _objects, uploader) = uploader(KeyMode::Seconds);

        uploader.upload(&frame(), "Healthy", timestamp()).unwrap();
        uploader.upload(&frame(), "Healthy", timestamp()).unwrap();

        let records = tree.get("Detections/2024-01-05/Healthy").unwrap().unwrap();
        assert_eq!(records.as_object().unwrap().len(), 1);
    }

    #[test]
    fn test_reset_clears_records() {
        let (tree, objects, uploader) = uploader(KeyMode::Millis);
        uploader.upload(&frame(), "Healthy", timestamp()).unwrap();

        uploader.reset().unwrap();
        assert_eq!(tree.get("Detections").unwrap(), None);
        assert_eq!(objects.len(), 1);
    }

    #[test]
    fn test_object_prefix_leaves_records_under_detections() {
        let tree = Arc::new(MemoryTree::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let uploader = EvidenceUploader::new(
            tree.clone(),
            objects.clone(),
            "field-a/images",
            KeyMode::Seconds,
            85,
        );
        let key = record_key(timestamp(), KeyMode::Seconds);
        tree.set("field-a/keep", &json!(1)).unwrap();

        uploader.upload(&frame(), "Healthy", timestamp()).unwrap();

        assert_eq!(objects.paths(), vec![format!("field-a/images/2024-01-05/Healthy_{key}.jpg")]);
        assert!(tree.get(&format!("Detections/2024-01-05/Healthy/{key}")).unwrap().is_some());

        uploader.reset().unwrap();
        assert_eq!(tree.get("Detections").unwrap(), None);
        assert_eq!(tree.get("field-a/keep").unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_encode_failure_is_reported() {
        let (_tree, objects, uploader) = uploader(KeyMode::Seconds);
        let empty = Frame::new(1, timestamp(), image::RgbImage::new(0, 0));

        let err = uploader.upload(&empty, "Healthy", timestamp()).unwrap_err();
        assert!(matches!(err, PipelineError::Encode(_)));
        assert!(objects.is_empty());
    }
}
