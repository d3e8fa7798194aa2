//! The origin fetch collaborator.
//!
//! The lifecycle engine never talks to an HTTP client directly; it goes
//! through the [`FeedFetcher`] trait, which returns the status code, the
//! cache signals extracted from response headers, and the raw body bytes.
//! The production implementation is [`http::HttpFetcher`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod http;

pub use http::HttpFetcher;

/// Custom header an origin may use to recommend its own poll cadence.
pub const RECOMMENDED_POLL_INTERVAL_HEADER: &str = "x-recommended-poll-interval";

/// Cache signals extracted from an origin response's headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageSignals {
    /// `Expires` header, as sent by the origin (not yet skew-corrected).
    pub expires: Option<DateTime<Utc>>,
    /// `Date` header: when the origin believed it was responding.
    pub date: Option<DateTime<Utc>>,
    /// `Cache-Control: max-age` in seconds.
    pub max_age_seconds: Option<u64>,
    /// Origin-recommended poll interval in seconds.
    pub recommended_poll_interval: Option<u32>,
}

/// One fetched origin page, before any validation.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub signals: PageSignals,
    pub body: Vec<u8>,
}

/// Failures raised by the fetch collaborator itself.
///
/// Non-success status codes are *not* failures at this level; the poll
/// worker inspects the status itself (401 has its own recovery policy).
#[derive(Debug, Clone, Error)]
pub enum FetchFailure {
    #[error("request timed out fetching {url}")]
    Timeout { url: String },

    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },
}

/// Fetches one page of an origin feed.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<FetchedPage, FetchFailure>;
}
