//! Relay server using Axum

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use crate::config::{Config, ServerConfig};
use crate::error::{RelayError, Result};
use crate::relay::Relay;

use super::routes;

/// How long shutdown waits for writers to flush and close their sockets
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
}

/// Relay server
pub struct RelayServer {
    config: ServerConfig,
    state: AppState,
}

impl RelayServer {
    /// Create a new relay server
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.server.clone(),
            state: AppState {
                relay: Relay::new(config.relay.clone()),
            },
        }
    }

    /// The relay shared with every connection
    pub fn relay(&self) -> &Relay {
        &self.state.relay
    }

    /// Build the router
    pub fn build_router(&self) -> Router {
        routes::create_router(self.state.clone()).layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr: SocketAddr = self
            .config
            .addr()
            .parse()
            .map_err(|e| RelayError::InvalidConfig(format!("Invalid listen address: {}", e)))?;

        Ok(TcpListener::bind(addr).await?)
    }

    /// Serve connections from `listener` until `shutdown` flips
    #[instrument(skip(self, listener, shutdown))]
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!("Relay listening on {}", listener.local_addr()?);

        let router = self.build_router();
        let relay = self.state.relay.clone();
        let draining = relay.clone();

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
            // Upgraded sockets are not tracked by the HTTP server
            let closed = relay.registry().close_all();
            info!("Closing {} client connections", closed);
        })
        .await
        .map_err(|e| RelayError::Internal(e.to_string()))?;

        if !draining.drain(SHUTDOWN_GRACE).await {
            warn!(
                sessions = draining.session_count(),
                "Shutdown grace period elapsed with sessions still open"
            );
        }

        info!("Relay server shut down");
        Ok(())
    }

    /// Bind and serve
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }
}
