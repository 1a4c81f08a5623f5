//! Route definitions

use axum::routing::get;
use axum::Router;

use super::server::AppState;
use super::websocket;

/// Path of the upgrade endpoint
pub const WS_PATH: &str = "/ws";

/// Create the router; the upgrade endpoint is the only route
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(WS_PATH, get(websocket::chat::chat_ws))
        .with_state(state)
}
