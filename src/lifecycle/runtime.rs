//! Worker loops binding the queues to the state-transition dispatch.
//!
//! One tokio task drains each queue; a further task runs the periodic
//! resync sweep. Invocations for different feeds run fully concurrently —
//! the per-message queue lock is the only serialization, and it is
//! per-feed-chain by construction (each feed has at most one in-flight
//! message when healthy).

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::queue::{DelayQueue, QueueName};

use super::{resync, run_dead_letter, run_stage, FeedLifecycleStage, LifecycleContext};

/// How long a drained queue sleeps before checking for due messages again.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Spawns all worker loops and the resync timer.
///
/// The returned handles finish after `cancel` fires; the caller may await
/// them for a graceful shutdown.
pub fn spawn(ctx: Arc<LifecycleContext>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    for queue in QueueName::all() {
        let ctx = ctx.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            drain_queue(ctx, queue, cancel).await;
        }));
    }

    let resync_ctx = ctx.clone();
    let resync_cancel = cancel.clone();
    handles.push(tokio::spawn(async move {
        resync::run_timer(&resync_ctx, resync_cancel).await;
    }));

    handles
}

async fn drain_queue(ctx: Arc<LifecycleContext>, queue: QueueName, cancel: CancellationToken) {
    info!(queue = %queue, "worker loop started");
    loop {
        if cancel.is_cancelled() {
            info!(queue = %queue, "worker loop stopping");
            return;
        }

        match ctx.queue.receive_due(queue).await {
            Ok(Some(msg)) => dispatch(&ctx, queue, msg).await,
            Ok(None) => {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                }
            }
            Err(e) => {
                tracing::warn!(queue = %queue, error = %e, "receive failed");
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                }
            }
        }
    }
}

async fn dispatch(ctx: &LifecycleContext, queue: QueueName, msg: crate::queue::ReceivedMessage) {
    match queue {
        QueueName::Poll => run_stage(ctx, FeedLifecycleStage::Polling, msg).await,
        QueueName::Purge => run_stage(ctx, FeedLifecycleStage::Purging, msg).await,
        QueueName::Registration => run_stage(ctx, FeedLifecycleStage::Registering, msg).await,
        QueueName::PollDeadLetter => run_dead_letter(ctx, msg).await,
    }
}
