//! Per-feed lifecycle state.
//!
//! `FeedState` is the payload of every queue message. It carries all
//! progress and error context for one registered feed; no other mutable
//! state exists for a feed anywhere in the process. Whichever worker holds
//! the message's queue lock is the single writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{FeedName, InstanceId};

/// Closed set of failure categories the classifier maps raw errors into.
///
/// Each category has a fixed recovery policy; see
/// [`classify`](crate::lifecycle::classify::classify).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Origin returned 401; the feed's key has been rotated or revoked.
    Unauthorized,
    /// Store reported zero rows affected for a non-empty batch: another
    /// delivery of this same message already applied the write.
    DuplicateWrite,
    /// Page failed validation (license, next link, items list).
    InvalidPage,
    /// Network-level failure fetching the page.
    FetchError,
    /// Store is overloaded and asked us to come back later.
    StoreTransient,
    /// Any other store write failure.
    StoreWriteError,
    /// Operator has requested a full cache clear.
    ForcedClear,
    /// Another in-flight feed already owns this name with a different URL.
    NameConflict,
    /// Catch-all; follows the same backoff policy as fetch errors.
    Unexpected,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Unauthorized => "unauthorized",
            ErrorCategory::DuplicateWrite => "duplicate_write",
            ErrorCategory::InvalidPage => "invalid_page",
            ErrorCategory::FetchError => "fetch_error",
            ErrorCategory::StoreTransient => "store_transient",
            ErrorCategory::StoreWriteError => "store_write_error",
            ErrorCategory::ForcedClear => "forced_clear",
            ErrorCategory::NameConflict => "name_conflict",
            ErrorCategory::Unexpected => "unexpected",
        };
        write!(f, "{}", s)
    }
}

/// Retry context carried between consecutive failed attempts.
///
/// The consecutive count is per-category: it resets to zero whenever the
/// failure category changes from the previous attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    pub category: ErrorCategory,
    pub retry_count: u32,
    /// The delay that was computed for this retry, in seconds.
    pub delay_seconds: u64,
    pub dead_letter: bool,
    pub drop_immediately: bool,
}

/// The serializable record of one registered feed's progress.
///
/// Created by registration, mutated exclusively by whichever worker holds
/// the in-flight message, and logically destroyed when the feed is
/// permanently dropped or purged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedState {
    /// Unique feed name; partition key for all cached items.
    pub name: FeedName,
    /// The URL the feed was registered with. Never changes.
    pub source_url: String,
    /// The page to fetch next. Only ever advances, except on
    /// re-registration which resets it to `source_url`.
    pub cursor_url: String,
    pub dataset_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,

    pub pages_read: u64,
    pub items_read: u64,
    pub poll_attempts: u64,
    pub error_count: u64,
    pub purged_items: u64,
    /// How many purge cycles this feed has been through. Survives
    /// `reset_counters`, unlike the per-cycle counters.
    pub purge_cycle_count: u64,
    /// Consecutive empty last-page reads since the last non-empty page.
    /// Zero means the next empty last page is the first of a streak and
    /// must write the sentinel item.
    pub consecutive_empty_last_page_reads: u64,

    /// How long deleted-item tombstones are retained before pruning.
    /// Seven days is the RPDE specification's recommendation.
    pub deleted_item_retention_days: i64,

    pub retry_state: Option<RetryState>,
    pub last_error_text: Option<String>,

    /// Disambiguates duplicate in-flight messages for the same feed.
    pub instance: InstanceId,
}

/// Default tombstone retention, per the RPDE specification.
pub const DEFAULT_DELETED_ITEM_RETENTION_DAYS: i64 = 7;

impl FeedState {
    /// Creates the state for a brand new registration request.
    ///
    /// The cursor starts at the source URL; all counters start at zero.
    pub fn new(
        name: FeedName,
        source_url: impl Into<String>,
        dataset_url: Option<String>,
        deleted_item_retention_days: i64,
    ) -> Self {
        let source_url = source_url.into();
        let now = Utc::now();
        FeedState {
            name,
            cursor_url: source_url.clone(),
            source_url,
            dataset_url,
            created_at: now,
            modified_at: now,
            pages_read: 0,
            items_read: 0,
            poll_attempts: 0,
            error_count: 0,
            purged_items: 0,
            purge_cycle_count: 0,
            consecutive_empty_last_page_reads: 0,
            deleted_item_retention_days,
            retry_state: None,
            last_error_text: None,
            instance: InstanceId::new(),
        }
    }

    /// Zeroes every per-cycle counter and clears error context.
    ///
    /// Called on (re)registration and on purge completion.
    /// `purge_cycle_count` deliberately survives: it counts cycles, not
    /// progress within one.
    pub fn reset_counters(&mut self) {
        self.pages_read = 0;
        self.items_read = 0;
        self.poll_attempts = 0;
        self.error_count = 0;
        self.purged_items = 0;
        self.consecutive_empty_last_page_reads = 0;
        self.retry_state = None;
        self.last_error_text = None;
    }

    /// Records a failed attempt: bumps the error counter and stores the
    /// retry context for the next classification round.
    pub fn record_failure(&mut self, retry: RetryState, error_text: impl Into<String>) {
        self.error_count += 1;
        self.retry_state = Some(retry);
        self.last_error_text = Some(error_text.into());
    }

    /// Clears retry context after a successful attempt.
    pub fn clear_failure(&mut self) {
        self.retry_state = None;
        self.last_error_text = None;
    }
}
