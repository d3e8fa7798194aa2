//! The registration worker: validates a candidate feed's first page and
//! promotes it into the poll cycle.
//!
//! Registration is the only stage that can create a second state-machine
//! chain for a feed name, so before any I/O it scans every queue for an
//! in-flight message bearing the same name. A twin with a different URL is
//! a name conflict and this message is rejected; a twin with the same URL
//! makes this message a harmless duplicate. Two duplicates racing through
//! the registration queue tie-break on the instance id — the greater one
//! drops itself — so they cannot both drop.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::feed::{FeedState, RetryState, RpdePage};
use crate::fetch::FeedFetcher;
use crate::queue::{DelayQueue, QueueName, ReceivedMessage};
use crate::store::{ItemStore, RegisteredFeed};

use super::classify::FeedError;
use super::{commit, Disposition, LifecycleContext};

pub async fn run(ctx: &LifecycleContext, msg: ReceivedMessage) {
    let ReceivedMessage { mut state, lock } = msg;

    if ctx.clear_cache.is_set() {
        info!(feed = %state.name, "clear-cache flag set; dropping registration");
        commit(ctx, &lock, Disposition::Drop).await;
        return;
    }

    // Guard against duplicate or conflicting concurrent registrations.
    match scan_for_twin(ctx, &state).await {
        Ok(TwinScan::Conflict { existing_url }) => {
            error!(
                feed = %state.name,
                existing_url = %existing_url,
                url = %state.source_url,
                "name already registered with a different url; rejecting registration"
            );
            commit(ctx, &lock, Disposition::Drop).await;
            return;
        }
        Ok(TwinScan::Duplicate) => {
            info!(feed = %state.name, "feed already in flight; dropping duplicate registration");
            commit(ctx, &lock, Disposition::Drop).await;
            return;
        }
        Ok(TwinScan::Clear) => {}
        Err(error) => {
            retry_or_drop(ctx, state, &lock, error).await;
            return;
        }
    }

    match validate_first_page(ctx, &state).await {
        Ok(()) => {}
        Err(FeedError::Unauthorized { url }) => {
            // Key rotated or revoked: drop, and clean up any stale record
            // (a failing feed that was just purged ends its cleanup here).
            warn!(feed = %state.name, url = %url, "first page returned 401; dropping feed");
            if let Err(e) = ctx.store.delete_feed_record(&state.name).await {
                warn!(feed = %state.name, error = %e, "failed to delete feed record");
            }
            commit(ctx, &lock, Disposition::Drop).await;
            return;
        }
        Err(error) => {
            retry_or_drop(ctx, state, &lock, error).await;
            return;
        }
    }

    // Restart the feed from the beginning and persist the durable record
    // the reconciler treats as the source of truth.
    state.cursor_url = state.source_url.clone();
    state.reset_counters();
    let record = RegisteredFeed {
        source: state.name.clone(),
        url: state.source_url.clone(),
        dataset_url: state.dataset_url.clone(),
        initial_state: state.clone(),
    };
    if let Err(store_error) = ctx.store.save_feed_record(&record).await {
        retry_or_drop(ctx, state, &lock, FeedError::from(store_error)).await;
        return;
    }

    info!(feed = %state.name, url = %state.source_url, "feed registered; promoting into poll cycle");
    commit(
        ctx,
        &lock,
        Disposition::Requeue {
            queue: QueueName::Poll,
            state,
            delay: Duration::ZERO,
        },
    )
    .await;
}

enum TwinScan {
    /// No other in-flight message carries this name.
    Clear,
    /// Same name, same URL: this message is redundant.
    Duplicate,
    /// Same name, different URL.
    Conflict { existing_url: String },
}

async fn scan_for_twin(ctx: &LifecycleContext, state: &FeedState) -> Result<TwinScan, FeedError> {
    let mut registration_twin: Option<FeedState> = None;

    for queue in QueueName::all() {
        let peeked = ctx
            .queue
            .peek_all(queue)
            .await
            .map_err(|e| FeedError::Unexpected(format!("queue peek failed: {}", e)))?;
        for other in peeked {
            if other.name != state.name || other.instance == state.instance {
                continue;
            }
            if other.source_url != state.source_url {
                return Ok(TwinScan::Conflict {
                    existing_url: other.source_url,
                });
            }
            if queue == QueueName::Registration {
                registration_twin = Some(other);
            } else {
                // An active chain already exists for this name and URL.
                return Ok(TwinScan::Duplicate);
            }
        }
    }

    // Two copies racing through registration: only the greater instance
    // drops itself, so exactly one survives.
    match registration_twin {
        Some(twin) if state.instance > twin.instance => Ok(TwinScan::Duplicate),
        _ => Ok(TwinScan::Clear),
    }
}

async fn validate_first_page(ctx: &LifecycleContext, state: &FeedState) -> Result<(), FeedError> {
    let fetched = ctx.fetcher.fetch_page(&state.cursor_url).await?;
    if fetched.status == 401 {
        return Err(FeedError::Unauthorized {
            url: state.cursor_url.clone(),
        });
    }
    RpdePage::parse(&fetched.body)?;
    Ok(())
}

/// Bounded fixed-delay retry: a registration that keeps failing is
/// permanently dropped, deleting any stale durable record.
async fn retry_or_drop(
    ctx: &LifecycleContext,
    mut state: FeedState,
    lock: &crate::queue::LockToken,
    error: FeedError,
) {
    let retries_so_far = state.retry_state.as_ref().map_or(0, |r| r.retry_count);
    if retries_so_far >= ctx.config.registration_retry_limit {
        error!(
            feed = %state.name,
            url = %state.source_url,
            retries = retries_so_far,
            error = %error,
            "registration failed repeatedly; dropping feed"
        );
        if let Err(e) = ctx.store.delete_feed_record(&state.name).await {
            warn!(feed = %state.name, error = %e, "failed to delete feed record");
        }
        commit(ctx, lock, Disposition::Drop).await;
        return;
    }

    let delay = ctx.config.registration_retry_delay;
    warn!(
        feed = %state.name,
        attempt = retries_so_far + 1,
        delay_seconds = delay.as_secs(),
        error = %error,
        "registration failed; retrying"
    );
    state.record_failure(
        RetryState {
            category: error.category(),
            retry_count: retries_so_far + 1,
            delay_seconds: delay.as_secs(),
            dead_letter: false,
            drop_immediately: false,
        },
        error.to_string(),
    );
    commit(
        ctx,
        lock,
        Disposition::Requeue {
            queue: QueueName::Registration,
            state,
            delay,
        },
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchFailure, FetchedPage, PageSignals};
    use crate::test_utils::{item_json, ok_page, status_page, test_context, test_state};
    use crate::types::FeedName;
    use pretty_assertions::assert_eq;

    async fn run_registration(
        ctx: &LifecycleContext,
        queue: &crate::queue::InMemoryDelayQueue,
        state: FeedState,
    ) {
        ctx.queue
            .enqueue(QueueName::Registration, state, Duration::ZERO)
            .await
            .unwrap();
        let msg = queue
            .receive_due(QueueName::Registration)
            .await
            .unwrap()
            .unwrap();
        run(ctx, msg).await;
    }

    #[tokio::test]
    async fn valid_first_page_promotes_into_poll_cycle() {
        let (ctx, queue, store, fetcher) = test_context();
        let state = test_state("gym");
        let url = state.source_url.clone();
        fetcher.respond_page(&url, ok_page(&format!("{}?afterTimestamp=1&afterId=1", url), &[item_json(1, 1)]));

        run_registration(&ctx, &queue, state).await;

        // Durable record saved, poll message enqueued with counters reset
        // and the cursor back at the source.
        let record = store.feed_record(&FeedName::new("gym")).unwrap();
        assert_eq!(record.url, url);
        let poll = queue.peek_all(QueueName::Poll).await.unwrap();
        assert_eq!(poll.len(), 1);
        assert_eq!(poll[0].cursor_url, url);
        assert_eq!(poll[0].pages_read, 0);
        assert!(queue.is_empty(QueueName::Registration));
    }

    #[tokio::test]
    async fn mismatched_license_is_dropped_after_retries_without_persisting() {
        let (ctx, queue, store, fetcher) = test_context();
        let state = test_state("gym");
        let url = state.source_url.clone();
        fetcher.respond_page(
            &url,
            FetchedPage {
                status: 200,
                signals: PageSignals::default(),
                body: br#"{"next":"x","items":[],"license":"https://example.org/proprietary"}"#.to_vec(),
            },
        );

        // Initial attempt plus three retries, each re-delivered directly
        // (the fixed 30 s delay keeps the real message invisible).
        let mut state = state;
        for _ in 0..4 {
            run_registration(&ctx, &queue, state.clone()).await;
            let requeued = queue.peek_all(QueueName::Registration).await.unwrap();
            match requeued.last() {
                Some(s) => state = s.clone(),
                None => break,
            }
        }

        // Never persisted, never promoted.
        assert!(store.feed_record(&FeedName::new("gym")).is_none());
        assert!(queue.is_empty(QueueName::Poll));
    }

    #[tokio::test]
    async fn unauthorized_first_page_drops_and_deletes_stale_record() {
        let (ctx, queue, store, fetcher) = test_context();
        let state = test_state("gym");
        let url = state.source_url.clone();

        // A stale record from a previous life of this feed.
        store
            .save_feed_record(&RegisteredFeed {
                source: state.name.clone(),
                url: url.clone(),
                dataset_url: None,
                initial_state: state.clone(),
            })
            .await
            .unwrap();

        fetcher.respond_page(&url, status_page(401));
        run_registration(&ctx, &queue, state).await;

        assert!(store.feed_record(&FeedName::new("gym")).is_none());
        assert!(queue.is_empty(QueueName::Poll));
        assert!(queue.is_empty(QueueName::Registration));
    }

    #[tokio::test]
    async fn fetch_failure_retries_with_fixed_delay_then_drops() {
        let (ctx, queue, store, fetcher) = test_context();
        let state = test_state("gym");
        let url = state.source_url.clone();
        fetcher.respond_error(&url, FetchFailure::Timeout { url: url.clone() });

        run_registration(&ctx, &queue, state).await;

        // First failure: retried, not dropped.
        let requeued = queue.peek_all(QueueName::Registration).await.unwrap();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].retry_state.as_ref().unwrap().retry_count, 1);

        // Exhaust the remaining retries.
        let mut state = requeued[0].clone();
        for _ in 0..3 {
            run_registration(&ctx, &queue, state.clone()).await;
            match queue.peek_all(QueueName::Registration).await.unwrap().last() {
                Some(s) => state = s.clone(),
                None => break,
            }
        }

        assert!(store.feed_record(&FeedName::new("gym")).is_none());
        assert!(queue.is_empty(QueueName::Poll));
    }

    #[tokio::test]
    async fn conflicting_url_in_flight_rejects_registration() {
        let (ctx, queue, store, fetcher) = test_context();

        // An active poll chain owns the name with a different URL.
        let mut active = test_state("gym");
        active.source_url = "https://other.example.org/feed".to_string();
        active.cursor_url = active.source_url.clone();
        queue
            .enqueue(QueueName::Poll, active, Duration::from_secs(60))
            .await
            .unwrap();

        let candidate = test_state("gym");
        fetcher.respond_page(
            &candidate.source_url.clone(),
            ok_page(&candidate.source_url.clone(), &[]),
        );
        run_registration(&ctx, &queue, candidate).await;

        // Rejected: nothing persisted, nothing promoted, poll chain intact.
        assert!(store.feed_record(&FeedName::new("gym")).is_none());
        assert_eq!(queue.len(QueueName::Poll), 1);
        assert!(queue.is_empty(QueueName::Registration));
    }

    #[tokio::test]
    async fn same_url_in_flight_drops_duplicate_harmlessly() {
        let (ctx, queue, store, _fetcher) = test_context();

        let active = test_state("gym");
        let mut duplicate = active.clone();
        duplicate.instance = crate::types::InstanceId::new();
        queue
            .enqueue(QueueName::Poll, active, Duration::from_secs(60))
            .await
            .unwrap();

        // No fetch is scripted: the duplicate must drop before any I/O.
        run_registration(&ctx, &queue, duplicate).await;

        assert!(store.feed_record(&FeedName::new("gym")).is_none());
        assert_eq!(queue.len(QueueName::Poll), 1);
        assert!(queue.is_empty(QueueName::Registration));
    }

    #[tokio::test]
    async fn racing_registrations_tie_break_on_instance_id() {
        let (ctx, queue, _store, fetcher) = test_context();

        let a = test_state("gym");
        let mut b = a.clone();
        b.instance = crate::types::InstanceId::new();
        let url = a.source_url.clone();
        fetcher.respond_page(&url, ok_page(&url, &[]));

        // Both copies sit in the registration queue; process one of them.
        queue
            .enqueue(QueueName::Registration, a.clone(), Duration::ZERO)
            .await
            .unwrap();
        queue
            .enqueue(QueueName::Registration, b.clone(), Duration::ZERO)
            .await
            .unwrap();

        let msg = queue
            .receive_due(QueueName::Registration)
            .await
            .unwrap()
            .unwrap();
        let processed_instance = msg.state.instance;
        let greater = std::cmp::max(a.instance, b.instance);
        run(&ctx, msg).await;

        if processed_instance == greater {
            // The greater instance dropped itself; the lesser remains.
            assert!(queue.is_empty(QueueName::Poll));
            assert_eq!(queue.len(QueueName::Registration), 1);
        } else {
            // The lesser instance registered and promoted.
            assert_eq!(queue.len(QueueName::Poll), 1);
            assert_eq!(queue.len(QueueName::Registration), 1);
        }
    }
}
