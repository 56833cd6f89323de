//! FIFO queues of pending frames.
//!
//! The control queue runs at a fixed priority. Stream queues report the
//! highest priority among their queued writes, so one urgent write lifts
//! the whole stream.

use std::collections::VecDeque;

use tracing::trace;

use crate::transport::PendingFrame;

use super::completion::{Completion, Completions};
use super::control::{DataSource, DataSourceToken};
use super::priority::Priority;

/// How a queue derives its scheduling priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePriority {
    /// Always this priority while non-empty.
    Fixed(Priority),
    /// Maximum priority over queued items.
    Dynamic,
}

/// Identifies a queued item for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueKey(u64);

struct QueuedItem {
    key: QueueKey,
    frame: PendingFrame,
    on_sent: Option<Completion>,
}

/// A queue of pending frames drained by the scheduler.
pub struct FlowQueue {
    policy: QueuePriority,
    items: VecDeque<QueuedItem>,
    next_key: u64,
}

impl FlowQueue {
    /// Queue with a fixed priority.
    pub fn fixed(priority: Priority) -> Self {
        Self::new(QueuePriority::Fixed(priority))
    }

    /// Queue whose priority follows its most urgent item.
    pub fn dynamic() -> Self {
        Self::new(QueuePriority::Dynamic)
    }

    fn new(policy: QueuePriority) -> Self {
        Self {
            policy,
            items: VecDeque::new(),
            next_key: 0,
        }
    }

    fn item(&mut self, frame: PendingFrame, on_sent: Option<Completion>) -> QueuedItem {
        let key = QueueKey(self.next_key);
        self.next_key += 1;
        QueuedItem {
            key,
            frame,
            on_sent,
        }
    }

    /// Enqueue ahead of everything not yet started.
    pub fn add_first(&mut self, frame: PendingFrame, on_sent: Option<Completion>) -> QueueKey {
        let item = self.item(frame, on_sent);
        let key = item.key;
        // A partially drained head must finish first.
        let index = match self.items.front() {
            Some(head) if head.frame.is_started() => 1,
            _ => 0,
        };
        self.items.insert(index, item);
        key
    }

    /// Enqueue behind everything.
    pub fn add_last(&mut self, frame: PendingFrame, on_sent: Option<Completion>) -> QueueKey {
        let item = self.item(frame, on_sent);
        let key = item.key;
        self.items.push_back(item);
        key
    }

    /// Remove a queued item if it is still cancelable. Its completion is
    /// dropped without running.
    pub fn cancel(&mut self, key: QueueKey) -> bool {
        let Some(index) = self.items.iter().position(|item| item.key == key) else {
            return false;
        };
        if !self.items[index].frame.is_cancelable() {
            return false;
        }
        self.items.remove(index);
        true
    }

    /// Remove every cancelable item. Returns how many were removed.
    pub fn cancel_pending_writes(&mut self) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !item.frame.is_cancelable());
        before - self.items.len()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl DataSource for FlowQueue {
    fn priority(&self) -> Option<Priority> {
        if self.items.is_empty() {
            return None;
        }
        match self.policy {
            QueuePriority::Fixed(priority) => Some(priority),
            QueuePriority::Dynamic => self.items.iter().map(|item| item.frame.priority()).max(),
        }
    }

    fn write_data(&mut self, out: &mut Vec<u8>, limit: usize, completions: &mut Completions) -> usize {
        let mut written = 0;
        while let Some(head) = self.items.front_mut() {
            let Some(frame) = head.frame.get(limit - written) else {
                break;
            };
            let start = out.len();
            frame.encode(out);
            written += out.len() - start;
            trace!(frame_type = ?frame.frame_type(), len = out.len() - start, "frame drained");

            if head.frame.has_remaining_data() {
                // Partially drained; resume with the next packet.
                break;
            }
            if let Some(on_sent) = self.items.pop_front().and_then(|item| item.on_sent) {
                completions.push(on_sent);
            }
        }
        written
    }
}

/// Queue handle held by the queue's owner.
pub type QueueHandle = DataSourceToken<FlowQueue>;

impl DataSourceToken<FlowQueue> {
    /// Enqueue `frame` ahead of every unstarted item.
    pub fn add_first(&self, frame: PendingFrame, on_sent: Option<Completion>) -> Option<QueueKey> {
        self.update(|queue| queue.add_first(frame, on_sent))
    }

    /// Enqueue `frame` at the tail.
    pub fn add_last(&self, frame: PendingFrame, on_sent: Option<Completion>) -> Option<QueueKey> {
        self.update(|queue| queue.add_last(frame, on_sent))
    }

    /// Cancel a queued item.
    pub fn cancel(&self, key: QueueKey) -> bool {
        self.update(|queue| queue.cancel(key)).unwrap_or(false)
    }

    /// Cancel every cancelable item.
    pub fn cancel_pending_writes(&self) -> usize {
        self.update(FlowQueue::cancel_pending_writes).unwrap_or(0)
    }
}
