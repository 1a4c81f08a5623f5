//! HTTP surface
//!
//! Serves the WebSocket upgrade endpoint that feeds the relay.

pub mod routes;
pub mod server;
pub mod websocket;

pub use server::{AppState, RelayServer};
