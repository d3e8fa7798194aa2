//! The feed lifecycle engine.
//!
//! Four queues drive a single state machine per feed:
//!
//! ```text
//! registration ──► poll ⇄ poll (self re-enqueue, computed delay)
//!      ▲             │
//!      │             ▼ (fatal / forced clear)
//!      │        dead-letter ──► purge ──► registration (restart)
//!      └──────────────────────────┘
//! ```
//!
//! Rather than four independently-triggered handlers, the stages share one
//! dispatch function and one commit discipline, so the transition
//! invariants (lock-renew-before-commit, counter reset rules) live in one
//! place.
//!
//! # Commit discipline
//!
//! The transport offers no transaction spanning "ack current message" and
//! "enqueue follow-up". Every transition that re-enqueues therefore runs:
//! renew-lock check, then complete, then enqueue. If the lock cannot be
//! renewed the transition is abandoned and the transport redelivers —
//! preferring "feed stalls, reconciler restarts it" over a duplicate
//! branch of the state machine. A crash between complete and enqueue loses
//! the message; the reconciler is the recovery path. Store writes always
//! happen before the ack, so a mid-flight crash at worst causes redundant
//! redelivery (absorbed by the duplicate-write check), never silent data
//! loss.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::{ClearCacheFlag, ProxyConfig};
use crate::feed::FeedState;
use crate::fetch::FeedFetcher;
use crate::queue::{DelayQueue, LockToken, QueueName, ReceivedMessage};
use crate::store::ItemStore;

pub mod classify;
pub mod poll;
pub mod purge;
pub mod register;
pub mod resync;
pub mod runtime;

pub use classify::{classify, FeedError, RetryDecision};

/// Which stage of the lifecycle a message belongs to.
///
/// Stages map one-to-one onto queues; the dead-letter sub-queue is not a
/// stage but a transition edge from polling into purging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedLifecycleStage {
    Registering,
    Polling,
    Purging,
}

impl FeedLifecycleStage {
    /// The queue this stage's messages travel on.
    pub fn queue(&self) -> QueueName {
        match self {
            FeedLifecycleStage::Registering => QueueName::Registration,
            FeedLifecycleStage::Polling => QueueName::Poll,
            FeedLifecycleStage::Purging => QueueName::Purge,
        }
    }
}

/// Collaborators and configuration shared by every worker invocation.
///
/// There is no other shared mutable state: all per-feed state lives in the
/// message payload and the durable store.
pub struct LifecycleContext {
    pub queue: Arc<dyn DelayQueue>,
    pub store: Arc<dyn ItemStore>,
    pub fetcher: Arc<dyn FeedFetcher>,
    pub config: ProxyConfig,
    pub clear_cache: ClearCacheFlag,
}

/// What a worker decided to do with its message.
#[derive(Debug)]
pub(crate) enum Disposition {
    /// Complete the current message and schedule a follow-up.
    Requeue {
        queue: QueueName,
        state: FeedState,
        delay: Duration,
    },
    /// Move the current message to the dead-letter path (triggers purge).
    DeadLetter,
    /// Complete the current message with no follow-up.
    Drop,
}

/// Applies a disposition under the shared commit discipline.
pub(crate) async fn commit(ctx: &LifecycleContext, lock: &LockToken, disposition: Disposition) {
    match disposition {
        Disposition::Drop => {
            if let Err(e) = ctx.queue.complete(lock).await {
                warn!(error = %e, "failed to complete dropped message; transport will redeliver");
            }
        }
        Disposition::DeadLetter => {
            if let Err(e) = ctx.queue.dead_letter(lock).await {
                warn!(error = %e, "failed to dead-letter message; transport will redeliver");
            }
        }
        Disposition::Requeue {
            queue,
            state,
            delay,
        } => {
            // The renew-lock check is the closest approximation to a
            // transaction the transport allows. If the lock is gone,
            // another delivery of this message is (or will be) in flight;
            // enqueueing a follow-up here would fork the state machine.
            if !ctx.queue.renew_lock(lock).await {
                warn!(
                    feed = %state.name,
                    "lock no longer held; abandoning transition, transport will redeliver"
                );
                return;
            }
            if let Err(e) = ctx.queue.complete(lock).await {
                warn!(feed = %state.name, error = %e, "failed to complete message; abandoning transition");
                return;
            }
            if let Err(e) = ctx.queue.enqueue(queue, state, delay).await {
                // Message lost: the feed stalls here until the reconciler
                // notices it is missing from every queue and restarts it.
                error!(error = %e, "failed to enqueue follow-up; feed stalls until resync");
            }
        }
    }
}

/// Routes a received message to its stage's worker.
///
/// Every failure is handled inside the stage workers; nothing escapes this
/// boundary as a crash.
pub async fn run_stage(ctx: &LifecycleContext, stage: FeedLifecycleStage, msg: ReceivedMessage) {
    match stage {
        FeedLifecycleStage::Registering => register::run(ctx, msg).await,
        FeedLifecycleStage::Polling => poll::run(ctx, msg).await,
        FeedLifecycleStage::Purging => purge::run(ctx, msg).await,
    }
}

/// Consumes the poll queue's dead-letter sub-queue.
///
/// A dead-lettered feed simply triggers a purge, which cascades into
/// re-registration (or, under the clear-cache flag, termination), so
/// cached data never outlives an abandoned feed.
pub async fn run_dead_letter(ctx: &LifecycleContext, msg: ReceivedMessage) {
    let ReceivedMessage { mut state, lock } = msg;
    info!(feed = %state.name, "dead-lettered feed entering purge");

    state.reset_counters();
    commit(
        ctx,
        &lock,
        Disposition::Requeue {
            queue: QueueName::Purge,
            state,
            delay: Duration::ZERO,
        },
    )
    .await;
}
