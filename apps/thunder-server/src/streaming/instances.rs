//! Bounded cache of media streamers
//!
//! Keyed by connection index. Hits take a shared read lock and bump an
//! atomic recency stamp; only misses take the write lock to insert and, past
//! capacity, evict the least recently used streamer.
//!
//! Evicting a streamer drops its descriptor cache and session map and stops
//! its flush task. Streams already running keep their own session handle
//! and are unaffected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinHandle;

use super::pool::UpstreamConnection;
use super::streamer::MediaStreamer;
use super::StreamerConfig;

struct CachedStreamer {
    streamer: Arc<MediaStreamer>,
    last_used: AtomicU64,
    flush_task: JoinHandle<()>,
}

impl Drop for CachedStreamer {
    fn drop(&mut self) {
        self.flush_task.abort();
    }
}

/// Shared LRU cache of [`MediaStreamer`] instances
pub struct StreamerCache {
    entries: RwLock<HashMap<usize, CachedStreamer>>,
    capacity: usize,
    clock: AtomicU64,
    config: StreamerConfig,
}

impl StreamerCache {
    pub fn new(config: StreamerConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: config.cache_size.max(1),
            clock: AtomicU64::new(0),
            config,
        }
    }

    /// Streamer for `connection`, created on first use
    pub fn get_or_create(&self, connection: &Arc<UpstreamConnection>) -> Arc<MediaStreamer> {
        let index = connection.index();
        let stamp = self.clock.fetch_add(1, Ordering::Relaxed) + 1;

        if let Some(streamer) = self.touch(&self.entries.read(), index, stamp) {
            return streamer;
        }

        let mut entries = self.entries.write();
        if let Some(streamer) = self.touch(&entries, index, stamp) {
            return streamer;
        }

        if entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used.load(Ordering::Relaxed))
                .map(|(&key, _)| key);
            if let Some(key) = oldest {
                entries.remove(&key);
                tracing::debug!(connection = key, "Evicted media streamer");
            }
        }

        let streamer = Arc::new(MediaStreamer::new(connection.clone(), &self.config));
        let flush_task = streamer.spawn_flush(self.config.flush_interval);
        entries.insert(
            index,
            CachedStreamer {
                streamer: streamer.clone(),
                last_used: AtomicU64::new(stamp),
                flush_task,
            },
        );
        tracing::debug!(connection = index, cached = entries.len(), "Created media streamer");

        streamer
    }

    fn touch(
        &self,
        entries: &HashMap<usize, CachedStreamer>,
        index: usize,
        stamp: u64,
    ) -> Option<Arc<MediaStreamer>> {
        entries.get(&index).map(|entry| {
            entry.last_used.fetch_max(stamp, Ordering::Relaxed);
            entry.streamer.clone()
        })
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every streamer, stopping their shard sessions
    pub async fn close_all(&self) {
        let streamers: Vec<Arc<MediaStreamer>> = self
            .entries
            .write()
            .drain()
            .map(|(_, entry)| entry.streamer.clone())
            .collect();

        for streamer in streamers {
            streamer.sessions().close_all().await;
        }
    }
}
