use common::{Backoff, retry_with_backoff};
use inference::Detection;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use store::{RemoteTree, StoreError, paths};

/// Rounds of re-reading after another writer changed the document.
const MAX_CONFLICT_ROUNDS: u32 = 5;

/// Label -> occurrences, for one frame or cumulated.
pub type FrameCounts = BTreeMap<String, u64>;

/// One increment per kept detection; repeated labels count repeatedly.
pub fn aggregate(detections: &[Detection]) -> FrameCounts {
    let mut counts = FrameCounts::new();
    for det in detections {
        *counts.entry(det.label.clone()).or_insert(0) += 1;
    }
    counts
}

/// Add `other` into `into` entrywise.
pub fn fold(into: &mut FrameCounts, other: FrameCounts) {
    for (label, n) in other {
        *into.entry(label).or_insert(0) += n;
    }
}

/// Read-merge-write of the cumulative counts document.
///
/// Every write is conditional on the ETag of the read it was computed from.
/// A concurrent writer forces a fresh read instead of a lost update, and a
/// retried write whose earlier attempt already landed is not applied twice.
/// The latter assumes this is the only writer that retries.
pub struct RemoteCounterSync {
    tree: Arc<dyn RemoteTree>,
    path: String,
}

impl RemoteCounterSync {
    pub fn new(tree: Arc<dyn RemoteTree>) -> Self {
        Self::with_path(tree, paths::TOTAL_COUNTS)
    }

    pub fn with_path(tree: Arc<dyn RemoteTree>, path: impl Into<String>) -> Self {
        Self {
            tree,
            path: path.into(),
        }
    }

    /// Current cumulative counts; an absent document is empty.
    pub fn current(&self) -> Result<FrameCounts, StoreError> {
        let remote = self.tree.get(&self.path)?;
        Ok(parse_counts(remote))
    }

    /// Single attempt per step. Returns the cumulative counts that were written.
    pub fn merge(&self, frame_counts: &FrameCounts) -> Result<FrameCounts, StoreError> {
        self.merge_with(frame_counts, &Backoff::new(1, Duration::ZERO))
    }

    /// Like [`merge`](Self::merge), retrying transient failures with `backoff`.
    pub fn merge_with(
        &self,
        frame_counts: &FrameCounts,
        backoff: &Backoff,
    ) -> Result<FrameCounts, StoreError> {
        if frame_counts.is_empty() {
            return retry_with_backoff(|| self.current(), backoff, "Counter read");
        }

        for round in 0..MAX_CONFLICT_ROUNDS {
            let (remote, etag) =
                retry_with_backoff(|| self.tree.get_tagged(&self.path), backoff, "Counter read")?;

            let mut cumulative = parse_counts(remote);
            for (label, n) in frame_counts {
                *cumulative.entry(paths::sanitize_label(label)).or_insert(0) += n;
            }
            let document = to_document(&cumulative);

            match self.write_once(&document, &etag, backoff)? {
                WriteOutcome::Written => {
                    tracing::debug!(labels = frame_counts.len(), "Cumulative counts merged");
                    return Ok(cumulative);
                }
                WriteOutcome::LandedEarlier => {
                    tracing::warn!(
                        path = %self.path,
                        "Counter write landed before its response was lost, not reapplying"
                    );
                    return Ok(cumulative);
                }
                WriteOutcome::Stale => {
                    tracing::debug!(round, path = %self.path, "Counts changed since read, merging again");
                }
            }
        }

        Err(StoreError::Conflict(self.path.clone()))
    }

    /// Retry the conditional write of one computed document.
    ///
    /// A conflict after a failed attempt means that attempt was committed.
    fn write_once(
        &self,
        document: &Value,
        etag: &str,
        backoff: &Backoff,
    ) -> Result<WriteOutcome, StoreError> {
        let mut uncertain = false;
        retry_with_backoff(
            || match self.tree.set_if(&self.path, document, etag) {
                Ok(()) => Ok(WriteOutcome::Written),
                Err(StoreError::Conflict(_)) if uncertain => Ok(WriteOutcome::LandedEarlier),
                Err(StoreError::Conflict(_)) => Ok(WriteOutcome::Stale),
                Err(e) => {
                    uncertain = true;
                    Err(e)
                }
            },
            backoff,
            "Counter write",
        )
    }

    /// Drop the cumulative document for a fresh session.
    pub fn reset(&self) -> Result<(), StoreError> {
        self.tree.remove(&self.path)?;
        tracing::info!(path = %self.path, "Cumulative counts cleared");
        Ok(())
    }
}

enum WriteOutcome {
    Written,
    LandedEarlier,
    Stale,
}

fn to_document(counts: &FrameCounts) -> Value {
    let map: Map<String, Value> = counts
        .iter()
        .map(|(label, n)| (label.clone(), Value::from(*n)))
        .collect();
    Value::Object(map)
}

fn parse_counts(remote: Option<Value>) -> FrameCounts {
    let map = match remote {
        None => return FrameCounts::new(),
        Some(Value::Object(map)) => map,
        Some(other) => {
            tracing::warn!(value = %other, "Cumulative counts are not an object, starting from empty");
            return FrameCounts::new();
        }
    };

    map.into_iter()
        .map(|(label, value)| {
            let n = value.as_u64().unwrap_or_else(|| {
                tracing::warn!(label = %label, value = %value, "Non-integer count treated as 0");
                0
            });
            (label, n)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use inference::BoundingBox;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use store::MemoryTree;

    fn retrying() -> Backoff {
        Backoff::new(3, Duration::from_millis(1))
    }

    /// Commits conditional writes but reports the first `lost` as failed.
    struct LostResponseTree {
        inner: MemoryTree,
        lost: AtomicUsize,
    }

    impl RemoteTree for LostResponseTree {
        fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
            self.inner.get(path)
        }
        fn set(&self, path: &str, value: &Value) -> Result<(), StoreError> {
            self.inner.set(path, value)
        }
        fn remove(&self, path: &str) -> Result<(), StoreError> {
            self.inner.remove(path)
        }
        fn get_tagged(&self, path: &str) -> Result<(Option<Value>, String), StoreError> {
            self.inner.get_tagged(path)
        }
        fn set_if(&self, path: &str, value: &Value, etag: &str) -> Result<(), StoreError> {
            self.inner.set_if(path, value, etag)?;
            let lose = self
                .lost
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lose {
                return Err(StoreError::Transport("response timed out".to_string()));
            }
            Ok(())
        }
    }

    /// Lets another writer bump `A` between each read and the next write.
    struct RacingTree {
        inner: MemoryTree,
        races: AtomicUsize,
    }

    impl RemoteTree for RacingTree {
        fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
            self.inner.get(path)
        }
        fn set(&self, path: &str, value: &Value) -> Result<(), StoreError> {
            self.inner.set(path, value)
        }
        fn remove(&self, path: &str) -> Result<(), StoreError> {
            self.inner.remove(path)
        }
        fn get_tagged(&self, path: &str) -> Result<(Option<Value>, String), StoreError> {
            let tagged = self.inner.get_tagged(path)?;
            if self
                .races
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                let a = self.inner.get("total_counts/A")?.and_then(|v| v.as_u64()).unwrap_or(0);
                self.inner.set("total_counts/A", &json!(a + 10))?;
            }
            Ok(tagged)
        }
        fn set_if(&self, path: &str, value: &Value, etag: &str) -> Result<(), StoreError> {
            self.inner.set_if(path, value, etag)
        }
    }

    fn det(label: &str) -> Detection {
        Detection {
            label: label.to_string(),
            confidence: 0.9,
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
        }
    }

    fn counts(pairs: &[(&str, u64)]) -> FrameCounts {
        pairs.iter().map(|(l, n)| (l.to_string(), *n)).collect()
    }

    #[test]
    fn test_aggregate_counts_every_detection() {
        let dets = [det("Healthy"), det("ESCA"), det("Healthy")];
        assert_eq!(aggregate(&dets), counts(&[("ESCA", 1), ("Healthy", 2)]));
        assert!(aggregate(&[]).is_empty());
    }

    #[test]
    fn test_merge_is_running_sum() {
        let tree = Arc::new(MemoryTree::new());
        let sync = RemoteCounterSync::new(tree.clone());

        sync.merge(&counts(&[("A", 2)])).unwrap();
        let cumulative = sync.merge(&counts(&[("A", 1), ("B", 1)])).unwrap();

        assert_eq!(cumulative, counts(&[("A", 3), ("B", 1)]));
        assert_eq!(
            tree.get("total_counts").unwrap(),
            Some(json!({"A": 3, "B": 1}))
        );
    }

    #[test]
    fn test_empty_counts_do_not_write() {
        let tree = Arc::new(MemoryTree::new());
        let sync = RemoteCounterSync::new(tree.clone());

        sync.merge(&FrameCounts::new()).unwrap();
        assert_eq!(tree.get("total_counts").unwrap(), None);
    }

    #[test]
    fn test_non_integer_values_count_as_zero() {
        let tree = Arc::new(MemoryTree::new());
        tree.set("total_counts", &json!({"A": "three", "B": 2, "C": -1}))
            .unwrap();
        let sync = RemoteCounterSync::new(tree.clone());

        let cumulative = sync.merge(&counts(&[("A", 1)])).unwrap();
        assert_eq!(cumulative, counts(&[("A", 1), ("B", 2), ("C", 0)]));
    }

    #[test]
    fn test_scalar_document_is_replaced() {
        let tree = Arc::new(MemoryTree::new());
        tree.set("total_counts", &json!(42)).unwrap();
        let sync = RemoteCounterSync::new(tree);

        assert_eq!(sync.merge(&counts(&[("A", 1)])).unwrap(), counts(&[("A", 1)]));
    }

    #[test]
    fn test_labels_are_sanitized_as_keys() {
        let tree = Arc::new(MemoryTree::new());
        let sync = RemoteCounterSync::new(tree.clone());

        sync.merge(&counts(&[("Leaf#1", 1)])).unwrap();
        assert_eq!(tree.get("total_counts/Leaf_1").unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_reset_clears_document() {
        let tree = Arc::new(MemoryTree::new());
        let sync = RemoteCounterSync::new(tree.clone());
        sync.merge(&counts(&[("A", 5)])).unwrap();

        sync.reset().unwrap();
        assert!(sync.current().unwrap().is_empty());
    }

    #[test]
    fn test_lost_response_is_not_applied_twice() {
        let tree = Arc::new(LostResponseTree {
            inner: MemoryTree::new(),
            lost: AtomicUsize::new(1),
        });
        tree.set("total_counts", &json!({"A": 5})).unwrap();
        let sync = RemoteCounterSync::new(tree.clone());

        let cumulative = sync.merge_with(&counts(&[("A", 2)]), &retrying()).unwrap();
        assert_eq!(cumulative, counts(&[("A", 7)]));
        assert_eq!(tree.get("total_counts").unwrap(), Some(json!({"A": 7})));

        // The next merge starts from the committed value.
        sync.merge_with(&counts(&[("A", 1)]), &retrying()).unwrap();
        assert_eq!(tree.get("total_counts/A").unwrap(), Some(json!(8)));
    }

    #[test]
    fn test_lost_response_without_retry_surfaces_error() {
        let tree = Arc::new(LostResponseTree {
            inner: MemoryTree::new(),
            lost: AtomicUsize::new(1),
        });
        let sync = RemoteCounterSync::new(tree.clone());

        assert!(matches!(
            sync.merge(&counts(&[("A", 2)])),
            Err(StoreError::Transport(_))
        ));
        assert_eq!(tree.get("total_counts/A").unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_concurrent_writer_forces_remerge() {
        let tree = Arc::new(RacingTree {
            inner: MemoryTree::new(),
            races: AtomicUsize::new(2),
        });
        let sync = RemoteCounterSync::new(tree.clone());

        let cumulative = sync.merge(&counts(&[("A", 1)])).unwrap();
        assert_eq!(cumulative, counts(&[("A", 21)]));
        assert_eq!(tree.get("total_counts/A").unwrap(), Some(json!(21)));
    }

    #[test]
    fn test_endless_conflicts_give_up() {
        let tree = Arc::new(RacingTree {
            inner: MemoryTree::new(),
            races: AtomicUsize::new(usize::MAX),
        });
        let sync = RemoteCounterSync::new(tree);

        assert!(matches!(
            sync.merge(&counts(&[("A", 1)])),
            Err(StoreError::Conflict(path)) if path == "total_counts"
        ));
    }

    #[test]
    fn test_fold() {
        let mut total = counts(&[("A", 1)]);
        fold(&mut total, counts(&[("A", 2), ("B", 1)]));
        assert_eq!(total, counts(&[("A", 3), ("B", 1)]));
    }
}
