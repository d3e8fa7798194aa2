//! The durable store collaborator.
//!
//! The engine writes cached items and feed records through the
//! [`ItemStore`] trait; the real deployment binds it to a relational
//! database with batch-upsert and batch-delete procedures. The in-memory
//! implementation in [`memory`] backs tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::feed::FeedState;
use crate::types::FeedName;

pub mod memory;

pub use memory::InMemoryStore;

/// Reserved id of the per-feed last-page sentinel item.
///
/// `$` is never produced by item-id canonicalization (numeric ids are
/// zero-padded digits, text ids are percent-encoded), so this cannot
/// collide with a real item.
pub const LAST_PAGE_ITEM_RESERVED_ID: &str = "$last-page";

/// The sentinel's modified sequence: sorts after every real item.
pub const LAST_PAGE_ITEM_RESERVED_MODIFIED: i64 = i64::MAX;

/// Re-poll signals carried in the sentinel item's payload, so the read
/// path can set cache headers without a second store round trip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LastPageSignals {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_poll_interval: Option<u32>,
}

/// One cached row: the unit of the items table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedItem {
    /// Owning feed name; partition key.
    pub source: FeedName,
    /// Canonical item id; together with `source`, the primary key.
    pub id: String,
    /// Origin-provided monotonic version.
    pub modified: i64,
    pub kind: String,
    pub deleted: bool,
    pub data: serde_json::Value,
    /// Set only for deleted items, so tombstones can be pruned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl CachedItem {
    /// Builds the distinguished last-page sentinel for a feed.
    pub fn last_page_sentinel(source: FeedName, signals: &LastPageSignals) -> CachedItem {
        CachedItem {
            source,
            id: LAST_PAGE_ITEM_RESERVED_ID.to_string(),
            modified: LAST_PAGE_ITEM_RESERVED_MODIFIED,
            kind: String::new(),
            deleted: false,
            data: serde_json::to_value(signals).unwrap_or(serde_json::Value::Null),
            expiry: None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.id == LAST_PAGE_ITEM_RESERVED_ID
    }
}

/// Durable record of a registration: the reconciler's source of truth for
/// "this feed should be active".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredFeed {
    pub source: FeedName,
    pub url: String,
    pub dataset_url: Option<String>,
    /// Snapshot of the feed state at registration time; re-injected by the
    /// reconciler when the feed's in-flight message is lost.
    pub initial_state: FeedState,
}

/// Store collaborator failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is throttling; retry after the suggested delay.
    #[error("store transient overload (retry after {retry_after_seconds:?}s)")]
    Transient { retry_after_seconds: Option<u64> },

    /// Any other backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Batch operations the engine needs from the durable store.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Upserts a batch of items for one source in a single call.
    ///
    /// Rows whose stored `modified` is already at or beyond the incoming
    /// value are skipped. Returns the number of rows actually written; a
    /// zero return for a non-empty batch means another delivery already
    /// applied this write.
    async fn batch_upsert_items(&self, rows: &[CachedItem]) -> Result<u64, StoreError>;

    /// Deletes up to `limit` cached items for a source. Returns the count
    /// deleted; a count below `limit` means the source is now empty.
    async fn delete_items_batch(&self, source: &FeedName, limit: u64) -> Result<u64, StoreError>;

    async fn save_feed_record(&self, record: &RegisteredFeed) -> Result<(), StoreError>;

    async fn delete_feed_record(&self, name: &FeedName) -> Result<(), StoreError>;

    async fn query_feed_records(&self) -> Result<Vec<RegisteredFeed>, StoreError>;
}
