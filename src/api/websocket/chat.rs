//! Chat WebSocket handler
//!
//! Upgrades the request and hands both halves of the socket to the relay.

use std::net::SocketAddr;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use tracing::{debug, warn};

use crate::api::server::AppState;
use crate::error::RelayError;

/// WebSocket handler for the chat relay
pub async fn chat_ws(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<AppState>,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(peer = ?peer, error = %rejection, "WebSocket upgrade failed");
            return RelayError::Upgrade(rejection.to_string()).into_response();
        }
    };

    ws.on_failed_upgrade(move |e| {
        warn!(peer = ?peer, error = %e, "WebSocket handshake failed");
    })
    .on_upgrade(move |socket| handle_chat_ws(socket, state, peer))
}

/// Handle one upgraded chat connection
async fn handle_chat_ws(socket: WebSocket, state: AppState, peer: Option<SocketAddr>) {
    debug!(peer = ?peer, "Chat WebSocket connected");

    let (sender, receiver) = socket.split();
    let outcome = state.relay.serve_connection(sender, receiver).await;

    debug!(peer = ?peer, outcome = ?outcome, "Chat WebSocket finished");
}
