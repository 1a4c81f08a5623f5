//! Connected client and its writer task

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use tracing::{debug, warn};
use uuid::Uuid;

use super::queue::{Enqueued, OutboundQueue, OverflowPolicy};
use super::registry::Registry;
use crate::models::Payload;

/// Process-unique client identity, never sent on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to one connected client
///
/// Clones share the same outbound queue. The registry keeps one clone;
/// only the writer task consumes the queue.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    queue: Arc<OutboundQueue>,
}

impl ClientHandle {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            id: ClientId::new(),
            queue: Arc::new(OutboundQueue::new(queue_capacity)),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    pub fn enqueue(&self, payload: Payload, policy: OverflowPolicy) -> Enqueued {
        self.queue.enqueue(payload, policy)
    }

    /// Queue a final payload and stop accepting more
    pub fn close_with(&self, payload: Payload) -> bool {
        self.queue.close_with(payload)
    }

    /// Stop accepting payloads; the writer flushes what is pending and exits
    pub fn close(&self) {
        self.queue.close();
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

/// Why a writer task stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterExit {
    /// Queue closed and every pending payload was written
    Drained,
    /// The connection rejected a write
    SendFailed(String),
}

/// Drain the client's queue into its connection.
///
/// This task is the only writer of `sink`. It removes the client from the
/// registry on the way out, whatever the reason.
pub async fn run_writer<S>(client: ClientHandle, mut sink: S, registry: Arc<Registry>) -> WriterExit
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let exit = loop {
        let Some(payload) = client.queue.dequeue().await else {
            // Best effort: the peer may already be gone
            if let Err(e) = sink.close().await {
                debug!(client_id = %client.id, error = %e, "Close frame not delivered");
            }
            break WriterExit::Drained;
        };

        if let Err(e) = sink.send(Message::Text(payload.to_string())).await {
            warn!(client_id = %client.id, error = %e, "Failed to write to client");
            client.close();
            break WriterExit::SendFailed(e.to_string());
        }
    };

    registry.remove(client.id);
    debug!(client_id = %client.id, exit = ?exit, "Writer task finished");
    exit
}
