//! The poll worker: fetch one page, validate it, convert and batch-write
//! its items, detect last-page and duplicate conditions, and decide the
//! next message.
//!
//! One invocation processes exactly one received message and produces at
//! most one follow-up message. The feed state only advances when the store
//! write has succeeded; a failed attempt re-enqueues the *unadvanced*
//! state per the classifier's decision.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::expiry;
use crate::feed::{FeedState, RpdeItem, RpdePage};
use crate::fetch::FeedFetcher;
use crate::queue::{DelayQueue, QueueName, ReceivedMessage};
use crate::store::{CachedItem, ItemStore, LastPageSignals};

use super::classify::{classify, FeedError};
use super::{commit, Disposition, LifecycleContext};

pub async fn run(ctx: &LifecycleContext, msg: ReceivedMessage) {
    let ReceivedMessage { mut state, lock } = msg;

    // Operator wipe: dead-letter without fetching. The dead-letter handler
    // turns this into a purge.
    if ctx.clear_cache.is_set() {
        info!(feed = %state.name, "clear-cache flag set; dead-lettering poll message");
        commit(ctx, &lock, Disposition::DeadLetter).await;
        return;
    }

    state.poll_attempts += 1;
    state.modified_at = Utc::now();

    match poll_once(ctx, &mut state).await {
        Ok(delay) => {
            state.clear_failure();
            debug!(
                feed = %state.name,
                cursor = %state.cursor_url,
                delay_seconds = delay.as_secs(),
                "poll transition complete"
            );
            commit(
                ctx,
                &lock,
                Disposition::Requeue {
                    queue: QueueName::Poll,
                    state,
                    delay,
                },
            )
            .await;
        }
        Err(error) => {
            let decision = classify(&error, state.retry_state.as_ref(), &ctx.config);
            if decision.drop_immediately {
                info!(
                    feed = %state.name,
                    category = %decision.category,
                    error = %error,
                    "dropping poll message"
                );
                commit(ctx, &lock, Disposition::Drop).await;
            } else if decision.dead_letter {
                warn!(
                    feed = %state.name,
                    category = %decision.category,
                    retries = decision.retry_count,
                    error = %error,
                    "dead-lettering feed"
                );
                commit(ctx, &lock, Disposition::DeadLetter).await;
            } else {
                warn!(
                    feed = %state.name,
                    category = %decision.category,
                    attempt = decision.retry_count,
                    delay_seconds = decision.delay_seconds,
                    error = %error,
                    "poll failed; retrying"
                );
                let delay = Duration::from_secs(decision.delay_seconds);
                state.record_failure(decision.to_retry_state(), error.to_string());
                commit(
                    ctx,
                    &lock,
                    Disposition::Requeue {
                        queue: QueueName::Poll,
                        state,
                        delay,
                    },
                )
                .await;
            }
        }
    }
}

/// Attempts one fetch-validate-write transition. On success the state has
/// been advanced and the returned duration is the follow-up delay.
async fn poll_once(ctx: &LifecycleContext, state: &mut FeedState) -> Result<Duration, FeedError> {
    let fetched = ctx.fetcher.fetch_page(&state.cursor_url).await?;

    if fetched.status == 401 {
        return Err(FeedError::Unauthorized {
            url: state.cursor_url.clone(),
        });
    }

    let page = RpdePage::parse(&fetched.body)?;
    let now = Utc::now();

    let mut rows: Vec<CachedItem> = page
        .items
        .iter()
        .map(|item| convert_item(state, item, now))
        .collect();
    let item_count = rows.len() as u64;

    // A last page returns zero items and points back at the cursor just
    // fetched: the origin is saying "no new data, poll me here again".
    let is_last_page = rows.is_empty() && page.next == state.cursor_url;

    let adjusted_expires = expiry::adjust_and_validate_expires(
        fetched.signals.expires,
        fetched.signals.date,
        fetched.signals.recommended_poll_interval,
        now,
        &ctx.config.expiry_bounds(),
    );

    // The first empty last page of a streak writes the sentinel carrying
    // the re-poll signals, so the read path can set cache headers without
    // a second store query. Consecutive last-page reads skip the write.
    if is_last_page && state.consecutive_empty_last_page_reads == 0 {
        rows.push(CachedItem::last_page_sentinel(
            state.name.clone(),
            &LastPageSignals {
                expires: adjusted_expires,
                max_age_seconds: fetched.signals.max_age_seconds,
                recommended_poll_interval: fetched.signals.recommended_poll_interval,
            },
        ));
    }

    if !rows.is_empty() {
        let affected = ctx.store.batch_upsert_items(&rows).await?;
        // Zero rows affected despite a non-empty batch: another delivery
        // of this same message already applied the write. (A re-written
        // sentinel also affects zero rows, which is why last pages are
        // exempt.)
        if affected == 0 && !is_last_page {
            return Err(FeedError::DuplicateWrite);
        }
    }

    // The write succeeded; only now does the state advance.
    if is_last_page {
        state.consecutive_empty_last_page_reads += 1;
    } else {
        state.consecutive_empty_last_page_reads = 0;
        state.pages_read += 1;
        state.items_read += item_count;
        state.cursor_url = page.next;
    }

    let delay = if !is_last_page {
        Duration::ZERO
    } else if let Some(expires) = adjusted_expires {
        (expires - now).to_std().unwrap_or(Duration::ZERO)
    } else if let Some(max_age) = fetched.signals.max_age_seconds {
        Duration::from_secs(max_age)
    } else {
        ctx.config.default_last_page_interval
    };

    Ok(delay)
}

/// Converts one origin item into its cached row.
///
/// The stored payload is the item re-serialized with its canonical id, so
/// the read path can concatenate payloads directly into a response page.
fn convert_item(state: &FeedState, item: &RpdeItem, now: chrono::DateTime<Utc>) -> CachedItem {
    let id = item.id.canonical();
    let deleted = item.state.is_deleted();
    let data = serde_json::json!({
        "id": id,
        "modified": item.modified,
        "kind": item.kind,
        "state": if deleted { "deleted" } else { "updated" },
        "data": item.data,
    });
    CachedItem {
        source: state.name.clone(),
        id,
        modified: item.modified,
        kind: item.kind.clone(),
        deleted,
        data,
        expiry: deleted.then(|| now + chrono::Duration::days(state.deleted_item_retention_days)),
    }
}
