//! The resync reconciler: the system's sole self-healing mechanism
//! against message loss.
//!
//! The commit discipline accepts "message lost, feed stalls" as a failure
//! mode. This sweep compares the durable feed records against what is
//! currently in flight across all queues and re-injects a purge message
//! for any feed that has vanished, which cascades into re-registration
//! and a poll restart.
//!
//! A feed transitioning between queues is briefly invisible to a single
//! snapshot, and a false orphan detection would cause a disruptive
//! purge+re-registration cycle, so the queues are sampled several times
//! with short pauses and a feed is only declared orphaned when absent
//! from the union of every sample. This over-checking is still far
//! cheaper than paying the transport for transactions.

use std::collections::HashSet;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::queue::{DelayQueue, QueueName};
use crate::store::ItemStore;
use crate::types::FeedName;

use super::LifecycleContext;

/// Runs one reconciliation sweep. Returns how many purge messages were
/// injected.
pub async fn run_sweep(ctx: &LifecycleContext) -> u64 {
    // A system wipe is in progress: feeds are meant to be disappearing.
    if ctx.clear_cache.is_set() {
        return 0;
    }

    let records = match ctx.store.query_feed_records().await {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "resync could not load feed records; skipping sweep");
            return 0;
        }
    };
    if records.is_empty() {
        return 0;
    }

    let mut in_flight: HashSet<FeedName> = HashSet::new();
    for sample in 0..ctx.config.resync_samples {
        for queue in QueueName::all() {
            match ctx.queue.peek_all(queue).await {
                Ok(states) => in_flight.extend(states.into_iter().map(|s| s.name)),
                Err(e) => {
                    // A missed queue would be catastrophic here: every
                    // feed in it would look orphaned and be purged.
                    warn!(queue = %queue, error = %e, "resync peek failed; skipping sweep");
                    return 0;
                }
            }
        }
        if sample + 1 < ctx.config.resync_samples {
            tokio::time::sleep(ctx.config.resync_sample_spacing).await;
        }
    }

    let mut injected = 0;
    for record in records {
        if in_flight.contains(&record.source) {
            continue;
        }
        info!(feed = %record.source, "feed missing from all queues; injecting purge to resync");
        match ctx
            .queue
            .enqueue(QueueName::Purge, record.initial_state, Duration::ZERO)
            .await
        {
            Ok(()) => injected += 1,
            Err(e) => warn!(feed = %record.source, error = %e, "failed to inject purge message"),
        }
    }

    debug!(injected, "resync sweep complete");
    injected
}

/// Periodic sweep loop; exits on cancellation.
pub async fn run_timer(ctx: &LifecycleContext, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(ctx.config.resync_period);
    // The first tick fires immediately; skip it so a fresh process does
    // not purge feeds whose messages it has not begun receiving.
    interval.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {
                run_sweep(ctx).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClearCacheFlag, ProxyConfig};
    use crate::store::RegisteredFeed;
    use crate::test_utils::{test_context_with, test_state};

    fn fast_config() -> ProxyConfig {
        ProxyConfig {
            resync_samples: 8,
            resync_sample_spacing: Duration::from_millis(1),
            ..ProxyConfig::default()
        }
    }

    async fn register_record(store: &crate::store::InMemoryStore, name: &str) {
        let state = test_state(name);
        store
            .save_feed_record(&RegisteredFeed {
                source: state.name.clone(),
                url: state.source_url.clone(),
                dataset_url: None,
                initial_state: state,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn orphaned_feed_gets_exactly_one_purge_message() {
        let (ctx, queue, store, _fetcher) =
            test_context_with(fast_config(), ClearCacheFlag::Fixed(false));
        register_record(&store, "gym").await;

        let injected = run_sweep(&ctx).await;

        assert_eq!(injected, 1);
        let purge = queue.peek_all(QueueName::Purge).await.unwrap();
        assert_eq!(purge.len(), 1);
        assert_eq!(purge[0].name, crate::types::FeedName::new("gym"));
    }

    #[tokio::test]
    async fn in_flight_feed_is_not_purged() {
        let (ctx, queue, store, _fetcher) =
            test_context_with(fast_config(), ClearCacheFlag::Fixed(false));
        register_record(&store, "gym").await;
        // The feed's message is alive in the poll queue (delayed counts).
        queue
            .enqueue(QueueName::Poll, test_state("gym"), Duration::from_secs(300))
            .await
            .unwrap();

        assert_eq!(run_sweep(&ctx).await, 0);
        assert!(queue.is_empty(QueueName::Purge));
    }

    #[tokio::test]
    async fn feed_visible_in_any_queue_counts_as_alive() {
        let (ctx, queue, store, _fetcher) =
            test_context_with(fast_config(), ClearCacheFlag::Fixed(false));
        register_record(&store, "gym").await;
        register_record(&store, "pool").await;
        queue
            .enqueue(QueueName::PollDeadLetter, test_state("gym"), Duration::ZERO)
            .await
            .unwrap();

        // Only the genuinely absent feed is re-injected.
        assert_eq!(run_sweep(&ctx).await, 1);
        let purge = queue.peek_all(QueueName::Purge).await.unwrap();
        assert_eq!(purge.len(), 1);
        assert_eq!(purge[0].name, crate::types::FeedName::new("pool"));
    }

    #[tokio::test]
    async fn sweep_is_skipped_while_clear_cache_is_set() {
        let (ctx, queue, store, _fetcher) =
            test_context_with(fast_config(), ClearCacheFlag::Fixed(true));
        register_record(&store, "gym").await;

        assert_eq!(run_sweep(&ctx).await, 0);
        assert!(queue.is_empty(QueueName::Purge));
    }

    #[tokio::test]
    async fn no_records_means_no_work() {
        let (ctx, queue, _store, _fetcher) =
            test_context_with(fast_config(), ClearCacheFlag::Fixed(false));
        assert_eq!(run_sweep(&ctx).await, 0);
        assert!(queue.is_empty(QueueName::Purge));
    }
}
