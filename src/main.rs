//! Relay Server - Entry Point
//!
//! Serves the broadcast relay with graceful shutdown support.

use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relay::config::{Config, LogConfig};
use relay::error;
use relay::RelayServer;

#[tokio::main]
async fn main() -> error::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log);

    info!("Starting Relay Server");
    info!(
        queue_capacity = config.relay.queue_capacity,
        overflow_policy = %config.relay.overflow_policy,
        malformed_policy = %config.relay.malformed_policy,
        echo_to_sender = config.relay.echo_to_sender,
        "Configuration loaded"
    );

    let server = RelayServer::new(&config);
    let listener = server.bind().await?;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let serve = server.serve(listener, shutdown_rx);
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => result?,
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
            serve.await?;
        }
    }

    info!("Relay Server stopped");
    Ok(())
}

/// Install the global subscriber; `RUST_LOG` overrides `LOG_LEVEL`
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("relay={},tower_http=debug", log.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if log.format == "pretty" {
        registry.with(tracing_subscriber::fmt::layer()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
