//! Fan-out of one message to every registered client

use std::sync::Arc;

use tracing::{debug, error, warn};

use super::client::{ClientHandle, ClientId};
use super::queue::{Enqueued, OverflowPolicy};
use super::registry::Registry;
use crate::error::Result;
use crate::models::{ChatMessage, Payload};

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Clients the payload was queued for
    pub recipients: usize,
    /// Clients that lost a payload to overflow (this one or an older one)
    pub dropped: usize,
    /// Clients removed because their queue overflowed
    pub disconnected: usize,
}

#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
    overflow: OverflowPolicy,
    echo_to_sender: bool,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>, overflow: OverflowPolicy, echo_to_sender: bool) -> Self {
        Self {
            registry,
            overflow,
            echo_to_sender,
        }
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow
    }

    /// Deliver `message` to every registered client.
    ///
    /// The message is serialized before the registry is touched: either
    /// every member gets the same payload or nobody gets anything.
    pub fn deliver(&self, message: &ChatMessage, origin: Option<ClientId>) -> Result<DeliveryReport> {
        let payload = message.encode().map_err(|e| {
            error!(error = %e, "Failed to serialize message, broadcast skipped");
            e
        })?;

        Ok(self.deliver_payload(payload, origin))
    }

    /// Enqueue an already-serialized payload on every registered client
    pub fn deliver_payload(&self, payload: Payload, origin: Option<ClientId>) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        self.registry.for_each(|client| {
            if !self.echo_to_sender && Some(client.id()) == origin {
                return;
            }

            match self.enqueue_to(client, payload.clone()) {
                Enqueued::Accepted => report.recipients += 1,
                Enqueued::DroppedOldest => {
                    report.recipients += 1;
                    report.dropped += 1;
                }
                Enqueued::DroppedNewest => {
                    debug!(client_id = %client.id(), "Client queue full, dropping message");
                    report.dropped += 1;
                }
                Enqueued::Overflow => report.disconnected += 1,
                // Torn down after the snapshot was taken
                Enqueued::Closed => {}
            }
        });

        debug!(
            recipients = report.recipients,
            dropped = report.dropped,
            disconnected = report.disconnected,
            "Broadcast delivered"
        );
        report
    }

    /// Enqueue `payload` on one client under the configured overflow policy.
    ///
    /// On [`Enqueued::Overflow`] the client has already been unregistered and
    /// its queue closed; anything queued before is still flushed.
    pub fn enqueue_to(&self, client: &ClientHandle, payload: Payload) -> Enqueued {
        let outcome = client.enqueue(payload, self.overflow);
        if outcome == Enqueued::Overflow {
            warn!(
                client_id = %client.id(),
                dropped = client.queue().dropped(),
                "Disconnecting slow client"
            );
            // Iteration runs on a snapshot, so removing here is safe
            self.registry.remove(client.id());
            client.close();
        }
        outcome
    }
}
