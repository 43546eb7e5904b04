//! Pending writes, grouped by channel.

use std::collections::HashMap;
use std::mem;

use parking_lot::Mutex;
use serde_json::Value;

/// Everything queued since the last flush.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PendingBatch {
    /// Always equal to the total length of the lists in `by_channel`
    pub pending_count: usize,
    /// Per-channel payloads in append order
    pub by_channel: HashMap<String, Vec<Value>>,
}

impl PendingBatch {
    pub fn is_empty(&self) -> bool {
        self.pending_count == 0
    }
}

/// Mutex-guarded [`PendingBatch`]. Flushes swap the batch out whole, so items
/// appended while a flush is sending land in a fresh batch.
#[derive(Debug, Default)]
pub(crate) struct QueueStore {
    batch: Mutex<PendingBatch>,
}

impl QueueStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a payload, returning the new pending count.
    pub(crate) fn append(&self, channel: &str, payload: Value) -> usize {
        let mut batch = self.batch.lock();
        batch
            .by_channel
            .entry(channel.to_string())
            .or_default()
            .push(payload);
        batch.pending_count += 1;
        batch.pending_count
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.batch.lock().pending_count
    }

    /// Take the current batch, leaving an empty one behind. Returns `None`
    /// when nothing is pending.
    pub(crate) fn snapshot_and_clear(&self) -> Option<PendingBatch> {
        let mut batch = self.batch.lock();
        if batch.is_empty() {
            return None;
        }
        Some(mem::take(&mut *batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_append_counts_across_channels() {
        let store = QueueStore::new();
        assert_eq!(store.append("a", json!(1)), 1);
        assert_eq!(store.append("b", json!(2)), 2);
        assert_eq!(store.append("a", json!(3)), 3);
        assert_eq!(store.pending_count(), 3);

        let batch = store.snapshot_and_clear().unwrap();
        assert_eq!(batch.pending_count, 3);
        assert_eq!(batch.by_channel["a"], vec![json!(1), json!(3)]);
        assert_eq!(batch.by_channel["b"], vec![json!(2)]);
        assert_eq!(
            batch.pending_count,
            batch.by_channel.values().map(Vec::len).sum::<usize>()
        );

        assert_eq!(store.pending_count(), 0);
        assert!(store.snapshot_and_clear().is_none());
    }

    #[test]
    fn test_appends_after_snapshot_start_fresh() {
        let store = QueueStore::new();
        store.append("a", json!("first"));
        let first = store.snapshot_and_clear().unwrap();
        store.append("a", json!("second"));
        let second = store.snapshot_and_clear().unwrap();

        assert_eq!(first.by_channel["a"], vec![json!("first")]);
        assert_eq!(second.by_channel["a"], vec![json!("second")]);
    }

    #[test]
    fn test_snapshot_of_empty_store_is_none() {
        let store = QueueStore::new();
        assert!(store.snapshot_and_clear().is_none());
        store.append("a", json!(1));
        assert_eq!(store.snapshot_and_clear().map(|b| b.pending_count), Some(1));
        assert!(store.snapshot_and_clear().is_none());
    }

    #[test]
    fn test_concurrent_appends_are_all_counted() {
        let store = std::sync::Arc::new(QueueStore::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        store.append(&format!("ch{}", t % 3), json!(i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let batch = store.snapshot_and_clear().unwrap();
        assert_eq!(batch.pending_count, 800);
        assert_eq!(batch.by_channel.values().map(Vec::len).sum::<usize>(), 800);
    }
}
