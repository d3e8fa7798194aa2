//! The delay-queue collaborator.
//!
//! The lifecycle engine is driven entirely by scheduled messages on four
//! logical queues. The transport provides per-message locks (visibility
//! timeouts) and dead-lettering; it does *not* provide transactions — the
//! commit discipline in [`crate::lifecycle`] compensates.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::feed::FeedState;

pub mod memory;

pub use memory::InMemoryDelayQueue;

/// The fixed set of logical queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    Poll,
    /// The poll queue's dead-letter sub-queue. Consumed by the handler
    /// that converts abandoned feeds into purges.
    PollDeadLetter,
    Purge,
    Registration,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Poll => "poll",
            QueueName::PollDeadLetter => "poll-dead-letter",
            QueueName::Purge => "purge",
            QueueName::Registration => "registration",
        }
    }

    /// Every queue, in the order the status surface reports them.
    pub fn all() -> [QueueName; 4] {
        [
            QueueName::Poll,
            QueueName::PollDeadLetter,
            QueueName::Purge,
            QueueName::Registration,
        ]
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Opaque handle to a received message's processing lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(pub Uuid);

/// A message handed to a worker, with the lock that must be renewed before
/// any state-finalizing operation.
#[derive(Debug)]
pub struct ReceivedMessage {
    pub state: FeedState,
    pub lock: LockToken,
}

/// Queue collaborator failures.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The lock was not held (expired or already completed).
    #[error("lock not held")]
    LockLost,

    #[error("queue backend error: {0}")]
    Backend(String),
}

/// Scheduled-delivery queue transport.
#[async_trait]
pub trait DelayQueue: Send + Sync {
    /// Schedules a message to become visible after the given delay.
    async fn enqueue(
        &self,
        queue: QueueName,
        state: FeedState,
        visible_after: Duration,
    ) -> Result<(), QueueError>;

    /// Receives the next visible message, locking it for processing.
    /// Returns `None` when nothing is due.
    async fn receive_due(&self, queue: QueueName) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Acknowledges (removes) a locked message.
    async fn complete(&self, lock: &LockToken) -> Result<(), QueueError>;

    /// Moves a locked message to its dead-letter sub-queue.
    async fn dead_letter(&self, lock: &LockToken) -> Result<(), QueueError>;

    /// Extends the lock if it is still held. Returns false when the lock
    /// has been lost; the caller must then abandon its transition.
    async fn renew_lock(&self, lock: &LockToken) -> bool;

    /// Non-destructive snapshot of every payload in a queue, including
    /// scheduled and locked messages. Used only by the reconciler and the
    /// status surface.
    async fn peek_all(&self, queue: QueueName) -> Result<Vec<FeedState>, QueueError>;
}
