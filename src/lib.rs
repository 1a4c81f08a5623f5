//! Relay - WebSocket Broadcast Relay
//!
//! Every connected client receives every message any client sends.
//!
//! ## Features
//!
//! - Single upgrade endpoint (`/ws`) with a `{"text": "..."}` JSON wire format
//! - Per-client bounded outbound queue drained by a dedicated writer task
//! - Configurable overflow policy (drop oldest, drop newest, disconnect)
//! - Configurable handling of malformed frames (disconnect or skip)
//! - Graceful shutdown that closes every connected client

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod relay;

pub use api::RelayServer;
pub use config::Config;
pub use error::{RelayError, Result};
pub use relay::Relay;
