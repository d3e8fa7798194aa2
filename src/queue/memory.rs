//! In-memory delay queue with scheduled visibility and per-message locks.
//!
//! Semantics follow the transport the engine is designed against:
//! at-least-once delivery, a visibility timeout per received message,
//! renewable locks, and a dead-letter sub-queue for the poll queue.
//! Backs tests and local runs.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::feed::FeedState;

use super::{DelayQueue, LockToken, QueueError, QueueName, ReceivedMessage};

const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(30);

struct QueuedMessage {
    id: Uuid,
    state: FeedState,
    visible_at: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<QueueName, Vec<QueuedMessage>>,
    /// Maps a live lock to the queue and message it covers.
    locks: HashMap<Uuid, (QueueName, Uuid)>,
}

/// A delay queue held in process memory.
pub struct InMemoryDelayQueue {
    inner: std::sync::Mutex<Inner>,
    lock_duration: Duration,
}

impl Default for InMemoryDelayQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDelayQueue {
    pub fn new() -> Self {
        InMemoryDelayQueue {
            inner: std::sync::Mutex::new(Inner::default()),
            lock_duration: DEFAULT_LOCK_DURATION,
        }
    }

    pub fn with_lock_duration(mut self, lock_duration: Duration) -> Self {
        self.lock_duration = lock_duration;
        self
    }

    /// Forcibly expires a lock, simulating a visibility timeout. Test use.
    pub fn break_lock(&self, lock: &LockToken) {
        let mut inner = self.lock();
        if let Some((queue, message_id)) = inner.locks.remove(&lock.0) {
            if let Some(messages) = inner.queues.get_mut(&queue) {
                if let Some(message) = messages.iter_mut().find(|m| m.id == message_id) {
                    message.locked_until = None;
                }
            }
        }
    }

    /// Number of messages currently in a queue (any visibility). Test use.
    pub fn len(&self, queue: QueueName) -> usize {
        self.lock().queues.get(&queue).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, queue: QueueName) -> bool {
        self.len(queue) == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Removes a locked message, returning it. Shared by complete and
    /// dead-letter.
    fn take_locked(&self, lock: &LockToken) -> Result<(QueueName, QueuedMessage), QueueError> {
        let mut inner = self.lock();
        let (queue, message_id) = inner.locks.remove(&lock.0).ok_or(QueueError::LockLost)?;
        let messages = inner
            .queues
            .get_mut(&queue)
            .ok_or_else(|| QueueError::Backend(format!("queue {} missing", queue)))?;
        let position = messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or(QueueError::LockLost)?;
        Ok((queue, messages.remove(position)))
    }
}

#[async_trait]
impl DelayQueue for InMemoryDelayQueue {
    async fn enqueue(
        &self,
        queue: QueueName,
        state: FeedState,
        visible_after: Duration,
    ) -> Result<(), QueueError> {
        let visible_at = Utc::now()
            + chrono::Duration::from_std(visible_after)
                .map_err(|e| QueueError::Backend(e.to_string()))?;
        self.lock().queues.entry(queue).or_default().push(QueuedMessage {
            id: Uuid::new_v4(),
            state,
            visible_at,
            locked_until: None,
        });
        Ok(())
    }

    async fn receive_due(&self, queue: QueueName) -> Result<Option<ReceivedMessage>, QueueError> {
        let now = Utc::now();
        let lock_duration = chrono::Duration::from_std(self.lock_duration)
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        let mut inner = self.lock();
        let Some(messages) = inner.queues.get_mut(&queue) else {
            return Ok(None);
        };

        let Some(message) = messages.iter_mut().find(|m| {
            m.visible_at <= now && m.locked_until.map_or(true, |until| until <= now)
        }) else {
            return Ok(None);
        };

        message.locked_until = Some(now + lock_duration);
        let token = Uuid::new_v4();
        let received = ReceivedMessage {
            state: message.state.clone(),
            lock: LockToken(token),
        };
        let message_id = message.id;
        inner.locks.insert(token, (queue, message_id));
        Ok(Some(received))
    }

    async fn complete(&self, lock: &LockToken) -> Result<(), QueueError> {
        self.take_locked(lock).map(|_| ())
    }

    async fn dead_letter(&self, lock: &LockToken) -> Result<(), QueueError> {
        let (queue, mut message) = self.take_locked(lock)?;
        // Only the poll queue has a consumed dead-letter sub-queue; a
        // dead-letter from anywhere else is terminal.
        if queue == QueueName::Poll {
            message.locked_until = None;
            message.visible_at = Utc::now();
            self.lock()
                .queues
                .entry(QueueName::PollDeadLetter)
                .or_default()
                .push(message);
        }
        Ok(())
    }

    async fn renew_lock(&self, lock: &LockToken) -> bool {
        let now = Utc::now();
        let Ok(lock_duration) = chrono::Duration::from_std(self.lock_duration) else {
            return false;
        };

        let mut inner = self.lock();
        let Some((queue, message_id)) = inner.locks.get(&lock.0).copied() else {
            return false;
        };
        let Some(messages) = inner.queues.get_mut(&queue) else {
            return false;
        };
        let Some(message) = messages.iter_mut().find(|m| m.id == message_id) else {
            return false;
        };
        match message.locked_until {
            Some(until) if until > now => {
                message.locked_until = Some(now + lock_duration);
                true
            }
            _ => {
                // Lock expired; the message is eligible for redelivery.
                inner.locks.remove(&lock.0);
                false
            }
        }
    }

    async fn peek_all(&self, queue: QueueName) -> Result<Vec<FeedState>, QueueError> {
        Ok(self
            .lock()
            .queues
            .get(&queue)
            .map(|messages| messages.iter().map(|m| m.state.clone()).collect())
            .unwrap_or_default())
    }
}
