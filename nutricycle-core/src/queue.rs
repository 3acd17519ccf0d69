//! Bounded drop-on-full event queue
//!
//! Producers never wait: when the queue is full the new item is discarded and
//! counted. A single consumer awaits items in FIFO order until shutdown.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::debug;

pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Result of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    /// Queue was full; the item was discarded and the drop counter incremented.
    Dropped,
    /// Queue was shut down; the item was discarded.
    Closed,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

pub struct EventQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> EventQueue<T> {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn enqueue(&self, item: T) -> EnqueueOutcome {
        {
            let mut state = self.state.lock();
            if state.closed {
                return EnqueueOutcome::Closed;
            }
            if state.items.len() >= self.capacity {
                drop(state);
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Event queue full, dropping event (total dropped: {})", total);
                return EnqueueOutcome::Dropped;
            }
            state.items.push_back(item);
        }
        self.notify.notify_one();
        EnqueueOutcome::Accepted
    }

    /// Wait for the next item. Returns `None` once the queue has been shut down.
    pub async fn dequeue(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking state so a concurrent enqueue or
            // shutdown cannot slip between the check and the await.
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
            }

            notified.await;
        }
    }

    pub fn try_dequeue(&self) -> Option<T> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.items.pop_front()
    }

    /// Stop accepting items, discard pending ones, and release the consumer.
    pub fn shutdown(&self) {
        let discarded = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let n = state.items.len();
            state.items.clear();
            n
        };
        if discarded > 0 {
            debug!("Event queue shut down with {} pending events", discarded);
        }
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl<T> std::fmt::Debug for EventQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped())
            .finish()
    }
}
