//! Broadcast relay core
//!
//! Every connection gets a [`ClientHandle`] with a bounded outbound queue
//! and a dedicated writer task. Inbound messages are serialized once by the
//! [`Broadcaster`] and queued on every client in the [`Registry`].

mod broadcaster;
mod client;
mod queue;
mod reader;
mod registry;

pub use broadcaster::{Broadcaster, DeliveryReport};
pub use client::{run_writer, ClientHandle, ClientId, WriterExit};
pub use queue::{Enqueued, OutboundQueue, OverflowPolicy, DEFAULT_QUEUE_CAPACITY};
pub use reader::{read_loop, MalformedPolicy, ReadOutcome};
pub use registry::Registry;

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, Stream};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::RelayConfig;

/// Registry, broadcaster and policies for one server instance
#[derive(Debug, Clone)]
pub struct Relay {
    registry: Arc<Registry>,
    broadcaster: Broadcaster,
    config: RelayConfig,
    /// Connections whose session has not finished yet
    sessions: Arc<watch::Sender<usize>>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(
            registry.clone(),
            config.overflow_policy,
            config.echo_to_sender,
        );
        let (sessions, _) = watch::channel(0);
        Self {
            registry,
            broadcaster,
            config,
            sessions: Arc::new(sessions),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Number of sessions still running, including ones whose writer is
    /// flushing after being unregistered
    pub fn session_count(&self) -> usize {
        *self.sessions.borrow()
    }

    /// Wait up to `grace` for every session to finish.
    ///
    /// Returns false if some were still running when the grace period ran out.
    pub async fn drain(&self, grace: Duration) -> bool {
        let mut sessions = self.sessions.subscribe();
        let drained = tokio::time::timeout(grace, sessions.wait_for(|n| *n == 0))
            .await
            .is_ok();
        drained
    }

    /// Run one connection until either side ends it.
    ///
    /// The client is registered and its writer spawned before the first
    /// frame is read. When the reader finishes first, pending payloads are
    /// flushed before this returns; when the writer finishes first (write
    /// failure or overflow disconnect), reading stops immediately.
    pub async fn serve_connection<Si, St, E>(&self, sink: Si, mut stream: St) -> ReadOutcome
    where
        Si: Sink<Message> + Send + Unpin + 'static,
        Si::Error: Display + Send,
        St: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        self.sessions.send_modify(|n| *n += 1);
        let client = ClientHandle::new(self.config.queue_capacity);
        let id = client.id();
        self.registry.add(client.clone());
        info!(client_id = %id, clients = self.registry.len(), "Client connected");

        let mut writer = tokio::spawn(run_writer(client.clone(), sink, self.registry.clone()));

        let outcome = tokio::select! {
            outcome = read_loop(&mut stream, &client, &self.broadcaster, self.config.malformed_policy) => {
                self.registry.remove(id);
                client.close();
                if let Err(e) = (&mut writer).await {
                    debug!(client_id = %id, error = %e, "Writer task aborted");
                }
                outcome
            }
            exit = &mut writer => {
                self.registry.remove(id);
                client.close();
                match exit {
                    Ok(WriterExit::SendFailed(e)) => ReadOutcome::TransportError(e),
                    Ok(WriterExit::Drained) => ReadOutcome::Closed,
                    Err(e) => ReadOutcome::TransportError(e.to_string()),
                }
            }
        };

        info!(
            client_id = %id,
            outcome = ?outcome,
            clients = self.registry.len(),
            "Client disconnected"
        );
        self.sessions.send_modify(|n| *n -= 1);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::{SinkExt, StreamExt};
    use std::io;
    use std::time::Duration;
    use tokio::time::timeout;

    type Inbound = mpsc::UnboundedSender<Result<Message, io::Error>>;
    type Outbound = mpsc::Receiver<Message>;

    const TIMEOUT: Duration = Duration::from_secs(2);

    struct Peer {
        inbound: Inbound,
        outbound: Outbound,
        session: tokio::task::JoinHandle<ReadOutcome>,
    }

    fn connect(relay: &Relay) -> Peer {
        let (inbound, stream) = mpsc::unbounded();
        let (sink, outbound) = mpsc::channel(16);
        let relay = relay.clone();
        let session = tokio::spawn(async move { relay.serve_connection(sink, stream).await });
        Peer {
            inbound,
            outbound,
            session,
        }
    }

    async fn wait_for_clients(relay: &Relay, n: usize) {
        timeout(TIMEOUT, async {
            while relay.client_count() != n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("client count never settled");
    }

    async fn next_text(peer: &mut Peer) -> Option<String> {
        match timeout(TIMEOUT, peer.outbound.next()).await.expect("no frame") {
            Some(Message::Text(t)) => Some(t),
            Some(other) => panic!("unexpected frame {:?}", other),
            None => None,
        }
    }

    fn say(peer: &Peer, text: &str) {
        peer.inbound
            .unbounded_send(Ok(Message::Text(text.to_string())))
            .unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_peers() {
        let relay = Relay::new(RelayConfig::default());
        let mut a = connect(&relay);
        let mut b = connect(&relay);
        wait_for_clients(&relay, 2).await;

        say(&a, r#"{"text":"hi"}"#);
        assert_eq!(next_text(&mut a).await.unwrap(), r#"{"text":"hi"}"#);
        assert_eq!(next_text(&mut b).await.unwrap(), r#"{"text":"hi"}"#);
    }

    #[tokio::test]
    async fn test_malformed_closes_only_offender() {
        let relay = Relay::new(RelayConfig::default());
        let mut a = connect(&relay);
        let mut b = connect(&relay);
        wait_for_clients(&relay, 2).await;

        say(&a, "not-json");
        let notice = next_text(&mut a).await.unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&notice).unwrap(),
            serde_json::json!({ "error": "invalid message format" })
        );
        // Writer closed the connection after the notice
        assert_eq!(next_text(&mut a).await, None);
        assert_eq!(a.session.await.unwrap(), ReadOutcome::Malformed);
        wait_for_clients(&relay, 1).await;

        say(&b, r#"{"text":"still fine"}"#);
        assert_eq!(next_text(&mut b).await.unwrap(), r#"{"text":"still fine"}"#);
    }

    #[tokio::test]
    async fn test_peer_close_unregisters() {
        let relay = Relay::new(RelayConfig::default());
        let mut a = connect(&relay);
        wait_for_clients(&relay, 1).await;

        a.inbound.send(Ok(Message::Close(None))).await.unwrap();
        assert_eq!(next_text(&mut a).await, None);
        assert_eq!(a.session.await.unwrap(), ReadOutcome::Closed);
        assert!(relay.registry().is_empty());
    }

    #[tokio::test]
    async fn test_dead_peer_does_not_affect_others() {
        let relay = Relay::new(RelayConfig::default());
        let mut a = connect(&relay);
        let b = connect(&relay);
        let mut c = connect(&relay);
        wait_for_clients(&relay, 3).await;

        // b vanishes without a close frame: its write side breaks
        let Peer { inbound, outbound, session } = b;
        drop(outbound);

        say(&a, r#"{"text":"one"}"#);
        assert_eq!(next_text(&mut a).await.unwrap(), r#"{"text":"one"}"#);
        assert_eq!(next_text(&mut c).await.unwrap(), r#"{"text":"one"}"#);

        let outcome = timeout(TIMEOUT, session).await.unwrap().unwrap();
        assert!(matches!(outcome, ReadOutcome::TransportError(_)));
        drop(inbound);
        wait_for_clients(&relay, 2).await;

        say(&a, r#"{"text":"two"}"#);
        assert_eq!(next_text(&mut a).await.unwrap(), r#"{"text":"two"}"#);
        assert_eq!(next_text(&mut c).await.unwrap(), r#"{"text":"two"}"#);
    }

    #[tokio::test]
    async fn test_drain_waits_for_writers_to_flush() {
        let relay = Relay::new(RelayConfig::default());
        let mut a = connect(&relay);
        let mut b = connect(&relay);
        wait_for_clients(&relay, 2).await;

        say(&a, r#"{"text":"last"}"#);
        assert_eq!(next_text(&mut a).await.unwrap(), r#"{"text":"last"}"#);

        // Unregistered at once, but sessions live on until the writers finish
        assert_eq!(relay.registry().close_all(), 2);
        assert_eq!(relay.client_count(), 0);

        assert!(relay.drain(TIMEOUT).await);
        assert_eq!(relay.session_count(), 0);
        assert_eq!(next_text(&mut a).await, None);
        assert_eq!(next_text(&mut b).await.unwrap(), r#"{"text":"last"}"#);
        assert_eq!(next_text(&mut b).await, None);
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_grace() {
        let relay = Relay::new(RelayConfig::default());
        let _a = connect(&relay);
        wait_for_clients(&relay, 1).await;

        assert!(!relay.drain(Duration::from_millis(50)).await);
        assert_eq!(relay.session_count(), 1);
    }
}
