//! In-memory store implementation for tests and local runs.
//!
//! Mirrors the semantics the relational procedures provide in deployment:
//! modified-newer-wins batch upsert reporting affected rows, and bounded
//! batch deletion by source. Errors can be injected per-operation to
//! exercise the engine's retry paths.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::types::FeedName;

use super::{CachedItem, ItemStore, RegisteredFeed, StoreError};

#[derive(Default)]
struct Inner {
    /// Keyed by (source, canonical id); BTreeMap keeps feed-order scans
    /// deterministic in tests.
    items: BTreeMap<(FeedName, String), CachedItem>,
    feeds: BTreeMap<FeedName, RegisteredFeed>,
    upsert_errors: VecDeque<StoreError>,
    delete_errors: VecDeque<StoreError>,
}

/// A store that lives entirely in process memory.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an error to be returned by the next `batch_upsert_items`.
    pub fn inject_upsert_error(&self, error: StoreError) {
        self.lock().upsert_errors.push_back(error);
    }

    /// Queues an error to be returned by the next `delete_items_batch`.
    pub fn inject_delete_error(&self, error: StoreError) {
        self.lock().delete_errors.push_back(error);
    }

    /// All cached items for a source, in key order.
    pub fn items_for(&self, source: &FeedName) -> Vec<CachedItem> {
        self.lock()
            .items
            .values()
            .filter(|item| &item.source == source)
            .cloned()
            .collect()
    }

    pub fn item_count(&self, source: &FeedName) -> usize {
        self.items_for(source).len()
    }

    pub fn feed_record(&self, name: &FeedName) -> Option<RegisteredFeed> {
        self.lock().feeds.get(name).cloned()
    }

    /// Pre-seeds items, bypassing upsert semantics. Test setup only.
    pub fn seed_items(&self, rows: Vec<CachedItem>) {
        let mut inner = self.lock();
        for row in rows {
            inner.items.insert((row.source.clone(), row.id.clone()), row);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning only happens if a test panicked mid-operation.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ItemStore for InMemoryStore {
    async fn batch_upsert_items(&self, rows: &[CachedItem]) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        if let Some(error) = inner.upsert_errors.pop_front() {
            return Err(error);
        }

        let mut affected = 0;
        for row in rows {
            let key = (row.source.clone(), row.id.clone());
            match inner.items.get(&key) {
                // Stale or repeated version: the stored row wins.
                Some(existing) if existing.modified >= row.modified => {}
                _ => {
                    inner.items.insert(key, row.clone());
                    affected += 1;
                }
            }
        }
        Ok(affected)
    }

    async fn delete_items_batch(&self, source: &FeedName, limit: u64) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        if let Some(error) = inner.delete_errors.pop_front() {
            return Err(error);
        }

        let keys: Vec<_> = inner
            .items
            .keys()
            .filter(|(s, _)| s == source)
            .take(limit as usize)
            .cloned()
            .collect();
        for key in &keys {
            inner.items.remove(key);
        }
        Ok(keys.len() as u64)
    }

    async fn save_feed_record(&self, record: &RegisteredFeed) -> Result<(), StoreError> {
        self.lock()
            .feeds
            .insert(record.source.clone(), record.clone());
        Ok(())
    }

    async fn delete_feed_record(&self, name: &FeedName) -> Result<(), StoreError> {
        self.lock().feeds.remove(name);
        Ok(())
    }

    async fn query_feed_records(&self) -> Result<Vec<RegisteredFeed>, StoreError> {
        Ok(self.lock().feeds.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(source: &str, id: &str, modified: i64) -> CachedItem {
        CachedItem {
            source: FeedName::new(source),
            id: id.to_string(),
            modified,
            kind: "Event".to_string(),
            deleted: false,
            data: serde_json::json!({"id": id}),
            expiry: None,
        }
    }

    #[tokio::test]
    async fn upsert_inserts_and_counts_rows() {
        let store = InMemoryStore::new();
        let affected = store
            .batch_upsert_items(&[row("a", "1", 10), row("a", "2", 20)])
            .await
            .unwrap();
        assert_eq!(affected, 2);
        assert_eq!(store.item_count(&FeedName::new("a")), 2);
    }

    #[tokio::test]
    async fn upsert_skips_stale_and_equal_versions() {
        let store = InMemoryStore::new();
        store.batch_upsert_items(&[row("a", "1", 10)]).await.unwrap();

        // Same version: no effect. Older version: no effect.
        assert_eq!(store.batch_upsert_items(&[row("a", "1", 10)]).await.unwrap(), 0);
        assert_eq!(store.batch_upsert_items(&[row("a", "1", 5)]).await.unwrap(), 0);

        // Newer version replaces.
        assert_eq!(store.batch_upsert_items(&[row("a", "1", 11)]).await.unwrap(), 1);
        assert_eq!(store.items_for(&FeedName::new("a"))[0].modified, 11);
    }

    #[tokio::test]
    async fn delete_respects_limit_and_reports_exhaustion() {
        let store = InMemoryStore::new();
        let rows: Vec<_> = (0..7).map(|i| row("a", &format!("{:02}", i), i)).collect();
        store.batch_upsert_items(&rows).await.unwrap();
        store.batch_upsert_items(&[row("b", "1", 1)]).await.unwrap();

        assert_eq!(
            store.delete_items_batch(&FeedName::new("a"), 5).await.unwrap(),
            5
        );
        assert_eq!(
            store.delete_items_batch(&FeedName::new("a"), 5).await.unwrap(),
            2
        );
        // Other sources are untouched.
        assert_eq!(store.item_count(&FeedName::new("b")), 1);
    }

    #[tokio::test]
    async fn injected_errors_surface_once() {
        let store = InMemoryStore::new();
        store.inject_upsert_error(StoreError::Transient {
            retry_after_seconds: Some(10),
        });

        assert!(matches!(
            store.batch_upsert_items(&[row("a", "1", 1)]).await,
            Err(StoreError::Transient { .. })
        ));
        // Error queue drained; next call succeeds.
        assert_eq!(store.batch_upsert_items(&[row("a", "1", 1)]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn feed_records_roundtrip() {
        use crate::feed::FeedState;

        let store = InMemoryStore::new();
        let state = FeedState::new(FeedName::new("a"), "https://example.org/feed", None, 7);
        let record = RegisteredFeed {
            source: FeedName::new("a"),
            url: state.source_url.clone(),
            dataset_url: None,
            initial_state: state,
        };

        store.save_feed_record(&record).await.unwrap();
        assert_eq!(store.query_feed_records().await.unwrap(), vec![record.clone()]);

        store.delete_feed_record(&FeedName::new("a")).await.unwrap();
        assert!(store.query_feed_records().await.unwrap().is_empty());
    }
}
