//! Bounded per-client outbound queue
//!
//! Producers never block: when the queue is full the configured
//! [`OverflowPolicy`] decides what gives way. A single consumer (the
//! client's writer task) awaits payloads in FIFO order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::models::Payload;

/// Default number of slots per client
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// What happens when a payload arrives at a full queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest pending payload to make room
    #[default]
    DropOldest,
    /// Discard the incoming payload
    DropNewest,
    /// Reject the payload; the caller disconnects the client
    Disconnect,
}

impl OverflowPolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "drop_oldest" | "drop-oldest" | "oldest" => Some(Self::DropOldest),
            "drop_newest" | "drop-newest" | "newest" => Some(Self::DropNewest),
            "disconnect" => Some(Self::Disconnect),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DropOldest => "drop_oldest",
            Self::DropNewest => "drop_newest",
            Self::Disconnect => "disconnect",
        }
    }
}

impl std::fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Accepted,
    /// Accepted after evicting the oldest pending payload
    DroppedOldest,
    /// Queue was full, the incoming payload was discarded
    DroppedNewest,
    /// Queue was full under [`OverflowPolicy::Disconnect`]
    Overflow,
    /// Queue is closed
    Closed,
}

impl Enqueued {
    /// Whether the payload will be written to the client
    pub fn is_delivered(&self) -> bool {
        matches!(self, Enqueued::Accepted | Enqueued::DroppedOldest)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Payload>,
    closed: bool,
}

/// Bounded FIFO of serialized payloads with a single consumer
#[derive(Debug)]
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl OutboundQueue {
    /// Create a queue. A capacity of zero is raised to one.
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

    /// Append a payload without blocking
    pub fn enqueue(&self, payload: Payload, policy: OverflowPolicy) -> Enqueued {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return Enqueued::Closed;
            }

            if state.items.len() < self.capacity {
                state.items.push_back(payload);
                Enqueued::Accepted
            } else {
                match policy {
                    OverflowPolicy::DropOldest => {
                        state.items.pop_front();
                        state.items.push_back(payload);
                        Enqueued::DroppedOldest
                    }
                    OverflowPolicy::DropNewest => Enqueued::DroppedNewest,
                    OverflowPolicy::Disconnect => Enqueued::Overflow,
                }
            }
        };

        if outcome != Enqueued::Accepted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        if outcome.is_delivered() {
            self.notify.notify_one();
        }
        outcome
    }

    /// Append a last payload regardless of capacity, then close.
    ///
    /// Returns false if the queue was already closed.
    pub fn close_with(&self, payload: Payload) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.items.push_back(payload);
            state.closed = true;
        }
        self.notify.notify_one();
        true
    }

    /// Close the queue. Pending payloads are still handed out.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.notify.notify_one();
    }

    /// Next payload in FIFO order, or `None` once closed and drained.
    ///
    /// Only one task may consume a given queue.
    pub async fn dequeue(&self) -> Option<Payload> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(payload) = state.items.pop_front() {
                    return Some(payload);
                }
                if state.closed {
                    return None;
                }
            }
            // notify_one stores a permit if nobody is waiting yet
            self.notify.notified().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
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

    /// Payloads lost to overflow or rejected by a full queue
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
