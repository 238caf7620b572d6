//! Upstream connection pool and workload tracking
//!
//! The pool holds one primary connection (index 0) plus any secondary
//! connections that logged in successfully. Each connection carries a live
//! stream counter; requests go to the least-loaded connection.
//!
//! # Workload accounting
//!
//! ```text
//! begin_stream() → WorkloadGuard ──────── drop()
//!       ↓                                   ↓
//!  [load++]                             [load--]
//! ```
//!
//! The guard travels with the byte stream, so the counter is released
//! exactly once however the stream ends: completion, error, or the client
//! going away.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;

use crate::upstream::{Connector, UpstreamClient, UpstreamError};

/// One authenticated identity and its live stream count
pub struct UpstreamConnection {
    index: usize,
    client: Arc<dyn UpstreamClient>,
    load: AtomicUsize,
}

impl UpstreamConnection {
    pub fn new(index: usize, client: Arc<dyn UpstreamClient>) -> Self {
        Self {
            index,
            client,
            load: AtomicUsize::new(0),
        }
    }

    /// Identity index; 0 is the primary connection
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn client(&self) -> &Arc<dyn UpstreamClient> {
        &self.client
    }

    /// Streams currently using this connection
    pub fn load(&self) -> usize {
        self.load.load(Ordering::Relaxed)
    }

    /// Count a stream against this connection until the guard is dropped
    pub fn begin_stream(self: &Arc<Self>) -> WorkloadGuard {
        self.load.fetch_add(1, Ordering::Relaxed);
        WorkloadGuard {
            connection: self.clone(),
        }
    }
}

/// RAII guard - releases one unit of workload on drop
pub struct WorkloadGuard {
    connection: Arc<UpstreamConnection>,
}

impl WorkloadGuard {
    pub fn connection(&self) -> &Arc<UpstreamConnection> {
        &self.connection
    }
}

impl Drop for WorkloadGuard {
    fn drop(&mut self) {
        self.connection.load.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Fixed set of upstream connections, built once at startup
#[derive(Clone)]
pub struct ConnectionPool {
    /// Sorted by index; never empty
    connections: Arc<[Arc<UpstreamConnection>]>,
}

impl ConnectionPool {
    /// Build a pool from an already connected primary and secondaries
    pub fn new(
        primary: Arc<dyn UpstreamClient>,
        secondaries: impl IntoIterator<Item = (usize, Arc<dyn UpstreamClient>)>,
    ) -> Self {
        let mut connections = vec![Arc::new(UpstreamConnection::new(0, primary))];
        connections.extend(
            secondaries
                .into_iter()
                .filter(|(index, _)| *index != 0)
                .map(|(index, client)| Arc::new(UpstreamConnection::new(index, client))),
        );
        connections.sort_by_key(|c| c.index);
        connections.dedup_by_key(|c| c.index);

        Self {
            connections: connections.into(),
        }
    }

    /// Log in the primary identity and every secondary token concurrently
    ///
    /// A failed primary login is fatal. Secondaries that fail are dropped
    /// with a warning.
    pub async fn connect(
        connector: &dyn Connector,
        primary_token: &str,
        secondary_tokens: &BTreeMap<usize, String>,
    ) -> Result<Self, UpstreamError> {
        tracing::info!("Starting primary client");
        let primary = connector.connect(0, primary_token).await?;

        if secondary_tokens.is_empty() {
            tracing::info!("No additional clients configured, using the primary client only");
            return Ok(Self::new(primary, Vec::new()));
        }

        tracing::info!(count = secondary_tokens.len(), "Starting additional clients");
        let attempts = secondary_tokens.iter().map(|(&index, token)| async move {
            match connector.connect(index, token).await {
                Ok(client) => {
                    tracing::info!(client = index, "Client started");
                    Some((index, client))
                }
                Err(e) => {
                    tracing::warn!(client = index, "Failed to start client: {}", e);
                    None
                }
            }
        });
        let secondaries: Vec<_> = join_all(attempts).await.into_iter().flatten().collect();

        let pool = Self::new(primary, secondaries);
        if pool.len() > 1 {
            tracing::info!(clients = pool.len(), "Multi-client mode enabled");
        } else {
            tracing::warn!("No additional clients started, using the primary client only");
        }
        Ok(pool)
    }

    /// Least-loaded connection, lowest index on ties
    pub fn select(&self) -> Arc<UpstreamConnection> {
        let mut best = &self.connections[0];
        let mut best_load = best.load();
        for connection in self.connections.iter().skip(1) {
            let load = connection.load();
            if load < best_load {
                best = connection;
                best_load = load;
            }
        }
        best.clone()
    }

    pub fn get(&self, index: usize) -> Option<Arc<UpstreamConnection>> {
        self.connections.iter().find(|c| c.index == index).cloned()
    }

    /// Snapshot of `(index, load)` for every connection
    pub fn loads(&self) -> Vec<(usize, usize)> {
        self.connections.iter().map(|c| (c.index, c.load())).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::memory::MemoryBackend;

    fn pool(backend: &MemoryBackend, secondaries: usize) -> ConnectionPool {
        ConnectionPool::new(
            backend.client(1),
            (1..=secondaries).map(|i| (i, backend.client(1) as Arc<dyn UpstreamClient>)),
        )
    }

    #[test]
    fn test_select_least_loaded() {
        let backend = MemoryBackend::new();
        let pool = pool(&backend, 2);

        let first = pool.select();
        assert_eq!(first.index(), 0);
        // Selection itself does not mutate load
        assert_eq!(pool.select().index(), 0);

        let _a = first.begin_stream();
        assert_eq!(pool.select().index(), 1);

        let _b = pool.select().begin_stream();
        assert_eq!(pool.select().index(), 2);

        let _c = pool.select().begin_stream();
        assert_eq!(pool.select().index(), 0);
        assert_eq!(pool.loads(), vec![(0, 1), (1, 1), (2, 1)]);
    }

    #[test]
    fn test_guard_releases_load() {
        let backend = MemoryBackend::new();
        let pool = pool(&backend, 0);
        let connection = pool.select();

        let guards: Vec<_> = (0..5).map(|_| connection.begin_stream()).collect();
        assert_eq!(connection.load(), 5);

        drop(guards);
        assert_eq!(connection.load(), 0);
    }

    #[tokio::test]
    async fn test_connect_drops_failed_secondaries() {
        let backend = MemoryBackend::new();
        backend.reject_token("broken");

        let tokens = BTreeMap::from([
            (1, "one".to_string()),
            (2, "broken".to_string()),
            (3, "three".to_string()),
        ]);
        let pool = ConnectionPool::connect(&backend, "primary", &tokens).await.unwrap();

        assert_eq!(pool.len(), 3);
        assert!(pool.get(2).is_none());
        assert_eq!(pool.loads(), vec![(0, 0), (1, 0), (3, 0)]);
    }

    #[tokio::test]
    async fn test_connect_requires_primary() {
        let backend = MemoryBackend::new();
        backend.reject_token("primary");

        let result = ConnectionPool::connect(&backend, "primary", &BTreeMap::new()).await;
        assert!(result.is_err());
    }
}
