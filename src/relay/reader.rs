//! Inbound frame loop for one connection

use std::fmt::Display;

use axum::extract::ws::Message;
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use super::broadcaster::Broadcaster;
use super::client::ClientHandle;
use super::queue::Enqueued;
use crate::models::{ChatMessage, ErrorNotice};

/// What to do with a frame that does not decode as a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedPolicy {
    /// Send the error notice, then close the connection
    #[default]
    Disconnect,
    /// Send the error notice and keep reading
    Skip,
}

impl MalformedPolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "disconnect" | "close" => Some(Self::Disconnect),
            "skip" | "ignore" => Some(Self::Skip),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnect => "disconnect",
            Self::Skip => "skip",
        }
    }
}

impl std::fmt::Display for MalformedPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a reader loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Close frame or end of stream
    Closed,
    /// The transport reported an error
    TransportError(String),
    /// A frame failed to decode under [`MalformedPolicy::Disconnect`]
    Malformed,
    /// The error notice overflowed the client's queue under
    /// [`OverflowPolicy::Disconnect`](super::queue::OverflowPolicy::Disconnect)
    Overflow,
}

/// Read frames from `stream` and broadcast every decoded message.
///
/// Replies to undecodable frames go through the client's own queue, so
/// the writer task stays the only writer of the connection.
pub async fn read_loop<St, E>(
    stream: &mut St,
    client: &ClientHandle,
    broadcaster: &Broadcaster,
    policy: MalformedPolicy,
) -> ReadOutcome
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(client_id = %client.id(), error = %e, "Read failed");
                return ReadOutcome::TransportError(e.to_string());
            }
        };

        let decoded = match &frame {
            Message::Text(text) => ChatMessage::decode(text.as_bytes()),
            Message::Binary(bytes) => ChatMessage::decode(bytes),
            Message::Close(_) => {
                debug!(client_id = %client.id(), "Client sent close");
                return ReadOutcome::Closed;
            }
            // Pings are answered by axum
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match decoded {
            Ok(message) => {
                // Serialization failures are logged by the broadcaster
                let _ = broadcaster.deliver(&message, Some(client.id()));
            }
            Err(e) => {
                warn!(client_id = %client.id(), error = %e, "Invalid message format");
                let notice = match ErrorNotice::invalid_format().encode() {
                    Ok(notice) => notice,
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize error notice");
                        return ReadOutcome::Malformed;
                    }
                };

                match policy {
                    MalformedPolicy::Disconnect => {
                        client.close_with(notice);
                        return ReadOutcome::Malformed;
                    }
                    MalformedPolicy::Skip => {
                        if broadcaster.enqueue_to(client, notice) == Enqueued::Overflow {
                            return ReadOutcome::Overflow;
                        }
                    }
                }
            }
        }
    }

    ReadOutcome::Closed
}
