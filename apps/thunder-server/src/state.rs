//! Application state management

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::streaming::{ConnectionPool, StreamerCache};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    pool: ConnectionPool,
    streamers: StreamerCache,
    started_at: Instant,
}

impl AppState {
    pub fn new(config: Config, pool: ConnectionPool) -> Self {
        let streamers =
            StreamerCache::new(config.stream.streamer_config(config.upstream.channel));
        Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                streamers,
                started_at: Instant::now(),
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the upstream connection pool
    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    /// Get the streamer cache
    pub fn streamers(&self) -> &StreamerCache {
        &self.inner.streamers
    }

    pub fn uptime(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    /// Stop every cached shard session
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down application state...");
        self.inner.streamers.close_all().await;
    }
}
