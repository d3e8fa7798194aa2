//! RPDE Proxy — caches third-party RPDE data feeds and re-serves them.
//!
//! This library provides the feed lifecycle engine: a message-driven state
//! machine over a delay-queue substrate that registers feeds, polls them,
//! classifies and recovers from failures, purges abandoned feeds, and
//! reconciles orphaned state against the durable store.

pub mod config;
pub mod expiry;
pub mod feed;
pub mod fetch;
pub mod lifecycle;
pub mod queue;
pub mod server;
pub mod store;
pub mod types;

#[cfg(test)]
pub mod test_utils;
