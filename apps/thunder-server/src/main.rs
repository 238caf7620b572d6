//! Thunder Server
//!
//! Exposes files stored in a private messaging channel as HTTP resources
//! with range support, load-balanced over a pool of upstream identities.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use thunder_server::config::{Config, UpstreamBackend};
use thunder_server::keepalive;
use thunder_server::routes;
use thunder_server::state::AppState;
use thunder_server::streaming::ConnectionPool;
use thunder_server::upstream::bridge::BridgeConnector;
use thunder_server::upstream::memory::MemoryBackend;
use thunder_server::upstream::Connector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "thunder_server=info,tower_http=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing::info!("Starting Thunder Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(channel = config.upstream.channel, backend = ?config.upstream.backend, "Storage channel configured");

    let connector: Arc<dyn Connector> = match config.upstream.backend {
        UpstreamBackend::Bridge => {
            tracing::info!("Upstream bridge: {}", config.upstream.bridge_url);
            Arc::new(
                BridgeConnector::new(
                    &config.upstream.bridge_url,
                    config.upstream.api_id,
                    &config.upstream.api_hash,
                    Duration::from_secs(config.stream.fetch_timeout_secs),
                )
                .context("Failed to build upstream bridge client")?,
            )
        }
        UpstreamBackend::Memory => {
            tracing::warn!("Using the in-memory upstream backend; no real objects will be served");
            Arc::new(MemoryBackend::new())
        }
    };

    let pool = ConnectionPool::connect(
        connector.as_ref(),
        &config.upstream.bot_token,
        &config.upstream.multi_tokens,
    )
    .await
    .context("Failed to start the primary client")?;

    let app_state = AppState::new(config.clone(), pool);

    let keepalive = if config.keepalive.enabled {
        let handle = keepalive::spawn(
            config.server.public_url(),
            Duration::from_secs(config.keepalive.ping_interval_secs),
        )
        .context("Failed to start keepalive")?;
        Some(handle)
    } else {
        None
    };

    let app = routes::router(app_state.clone());

    // Start server with graceful shutdown
    let ip = config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind_address))?;
    let addr = SocketAddr::new(ip, config.server.port);
    tracing::info!("Thunder Server listening on {}", addr);
    tracing::info!("Public URL: {}", config.server.public_url());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(handle) = keepalive {
        handle.abort();
    }
    app_state.shutdown().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
