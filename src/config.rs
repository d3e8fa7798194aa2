//! Process configuration.
//!
//! Tuning knobs default to the values the origin ecosystem was designed
//! around; only the externally-visible settings are read from the
//! environment. The operator clear-cache flag is deliberately *not* a
//! field here: it must be re-read at the start of every worker invocation
//! (see [`ClearCacheFlag`]), because invocations may run in different
//! processes.

use std::time::Duration;

use crate::expiry::ExpiryBounds;
use crate::feed::state::DEFAULT_DELETED_ITEM_RETENTION_DAYS;

/// Environment variable holding the operator's clear-cache switch.
pub const CLEAR_CACHE_ENV_VAR: &str = "CLEAR_PROXY_CACHE";

/// Environment variable with the base URL feeds are re-served under.
pub const FEED_BASE_URL_ENV_VAR: &str = "FEED_BASE_URL";

/// Fixed tuning parameters for the lifecycle engine.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Floor on computed re-poll intervals.
    pub min_poll_interval_seconds: u64,
    /// Ceiling on computed re-poll intervals when the origin gives no
    /// recommendation.
    pub max_poll_interval_seconds: u64,
    /// Delay before re-polling a last page that carried no cache signals.
    pub default_last_page_interval: Duration,
    /// Fixed delay applied on transient store overload.
    pub store_retry_after: Duration,
    /// Consecutive same-category retries before a feed is dead-lettered.
    pub dead_letter_threshold: u32,
    /// Registration fetch/validation attempts before the feed is dropped.
    pub registration_retry_limit: u32,
    /// Fixed delay between registration retries.
    pub registration_retry_delay: Duration,
    /// Upper bound on rows deleted per purge invocation.
    pub purge_batch_cap: u64,
    /// Tombstone retention for feeds that don't specify their own.
    pub default_deleted_item_retention_days: i64,
    /// How many times the reconciler samples the queues per sweep.
    pub resync_samples: u32,
    /// Pause between reconciler samples.
    pub resync_sample_spacing: Duration,
    /// Period of the reconciler sweep.
    pub resync_period: Duration,
    /// Base URL this proxy re-serves feeds under.
    pub feed_base_url: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            min_poll_interval_seconds: 5,
            max_poll_interval_seconds: 3600,
            default_last_page_interval: Duration::from_secs(8),
            store_retry_after: Duration::from_secs(10),
            dead_letter_threshold: 15,
            registration_retry_limit: 3,
            registration_retry_delay: Duration::from_secs(30),
            purge_batch_cap: 1000,
            default_deleted_item_retention_days: DEFAULT_DELETED_ITEM_RETENTION_DAYS,
            resync_samples: 8,
            resync_sample_spacing: Duration::from_secs(2),
            resync_period: Duration::from_secs(10),
            feed_base_url: "http://localhost:3000/".to_string(),
        }
    }
}

impl ProxyConfig {
    /// Loads configuration, taking the feed base URL from the environment
    /// when present.
    pub fn from_env() -> Self {
        let mut config = ProxyConfig::default();
        if let Ok(base) = std::env::var(FEED_BASE_URL_ENV_VAR) {
            config.feed_base_url = base;
        }
        config
    }

    /// The interval bounds handed to the expiry estimator.
    pub fn expiry_bounds(&self) -> ExpiryBounds {
        ExpiryBounds {
            min_interval_seconds: self.min_poll_interval_seconds,
            max_interval_seconds: self.max_poll_interval_seconds,
        }
    }

    /// The public URL a feed is re-served under.
    pub fn feed_url(&self, name: &str) -> String {
        format!("{}api/feeds/{}", self.feed_base_url, name)
    }
}

/// The operator's "clear proxy cache" switch.
///
/// When set, every worker routes to termination or dead-letter instead of
/// normal processing, and purge completion stops re-registering feeds;
/// that is the mechanism by which an operator wipes the whole system.
///
/// Modeled as a value re-read on every check rather than a cached boolean,
/// since each worker invocation may run in a different process.
#[derive(Debug, Clone)]
pub enum ClearCacheFlag {
    /// Read the environment on every check (production).
    Env,
    /// Fixed value, for tests.
    Fixed(bool),
}

impl ClearCacheFlag {
    pub fn is_set(&self) -> bool {
        match self {
            ClearCacheFlag::Env => std::env::var(CLEAR_CACHE_ENV_VAR)
                .map(|v| v == "true")
                .unwrap_or(false),
            ClearCacheFlag::Fixed(v) => *v,
        }
    }
}
