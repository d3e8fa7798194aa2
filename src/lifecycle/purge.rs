//! The purge worker: deletes a feed's cached items in bounded batches,
//! then hands off to re-registration.
//!
//! Each invocation deletes at most one batch. A full batch means more
//! rows may remain, so the worker re-enqueues itself; a short batch means
//! the source is empty and the feed restarts through registration —
//! unless the operator is wiping the cache, in which case the chain ends
//! here. That termination is the mechanism by which the whole system is
//! cleared.

use std::time::Duration;

use tracing::{info, warn};

use crate::queue::{DelayQueue, QueueName, ReceivedMessage};
use crate::store::ItemStore;

use super::classify::{classify, FeedError};
use super::{commit, Disposition, LifecycleContext};

/// Delay before the next purge batch or the registration hand-off.
const HANDOFF_DELAY: Duration = Duration::from_secs(1);

pub async fn run(ctx: &LifecycleContext, msg: ReceivedMessage) {
    let ReceivedMessage { mut state, lock } = msg;

    match ctx
        .store
        .delete_items_batch(&state.name, ctx.config.purge_batch_cap)
        .await
    {
        Ok(deleted) if deleted < ctx.config.purge_batch_cap => {
            state.purged_items += deleted;
            info!(
                feed = %state.name,
                purged = state.purged_items,
                "purge complete"
            );

            if ctx.clear_cache.is_set() {
                // Operator wipe: do not restart the feed.
                info!(feed = %state.name, "clear-cache flag set; feed not re-registered");
                commit(ctx, &lock, Disposition::Drop).await;
                return;
            }

            state.reset_counters();
            state.purge_cycle_count += 1;
            commit(
                ctx,
                &lock,
                Disposition::Requeue {
                    queue: QueueName::Registration,
                    state,
                    delay: HANDOFF_DELAY,
                },
            )
            .await;
        }
        Ok(deleted) => {
            state.purged_items += deleted;
            commit(
                ctx,
                &lock,
                Disposition::Requeue {
                    queue: QueueName::Purge,
                    state,
                    delay: HANDOFF_DELAY,
                },
            )
            .await;
        }
        Err(store_error) => {
            let error = FeedError::from(store_error);
            let decision = classify(&error, state.retry_state.as_ref(), &ctx.config);
            warn!(
                feed = %state.name,
                attempt = decision.retry_count,
                delay_seconds = decision.delay_seconds,
                error = %error,
                "purge batch failed; retrying"
            );
            // Purges retry indefinitely: dead-lettering one would only
            // cycle it straight back through the dead-letter handler into
            // this queue.
            let delay = Duration::from_secs(decision.delay_seconds);
            state.record_failure(decision.to_retry_state(), error.to_string());
            commit(
                ctx,
                &lock,
                Disposition::Requeue {
                    queue: QueueName::Purge,
                    state,
                    delay,
                },
            )
            .await;
        }
    }
}
