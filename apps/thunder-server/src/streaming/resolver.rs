//! Descriptor resolution with a per-connection cache
//!
//! The cache is flushed wholesale on a fixed interval instead of expiring
//! entries one by one. A descriptor may therefore outlive its access
//! credential by up to one interval; callers evict it explicitly with
//! [`DescriptorResolver::invalidate`] when a download reports the
//! credential as expired.

use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use super::descriptor::{ObjectDescriptor, ResolveError};
use crate::upstream::UpstreamClient;

/// Resolves message ids in the storage channel into object descriptors
pub struct DescriptorResolver {
    client: Arc<dyn UpstreamClient>,
    channel: i64,
    cache: Mutex<LruCache<i64, ObjectDescriptor>>,
}

impl DescriptorResolver {
    pub fn new(client: Arc<dyn UpstreamClient>, channel: i64, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            client,
            channel,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Resolve a message id, consulting the cache first
    pub async fn resolve(&self, message_id: i64) -> Result<ObjectDescriptor, ResolveError> {
        let cached = self.cache.lock().get(&message_id).cloned();
        if let Some(descriptor) = cached {
            tracing::trace!(message_id, "Descriptor cache hit");
            return Ok(descriptor);
        }

        tracing::debug!(message_id, channel = self.channel, "Descriptor cache miss");
        let message = self.client.get_message(self.channel, message_id).await?;
        let descriptor = ObjectDescriptor::from_message(message_id, message)?;

        self.cache.lock().put(message_id, descriptor.clone());
        Ok(descriptor)
    }

    /// Drop a single cached descriptor
    pub fn invalidate(&self, message_id: i64) {
        if self.cache.lock().pop(&message_id).is_some() {
            tracing::debug!(message_id, "Invalidated cached descriptor");
        }
    }

    /// Drop every cached descriptor, returning how many were held
    pub fn flush(&self) -> usize {
        let mut cache = self.cache.lock();
        let count = cache.len();
        cache.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

/// Flush `resolver` every `period`
///
/// The task only holds a weak reference and exits once the resolver has
/// been dropped.
pub fn spawn_flush_task(resolver: &Arc<DescriptorResolver>, period: Duration) -> JoinHandle<()> {
    let resolver: Weak<DescriptorResolver> = Arc::downgrade(resolver);
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            ticker.tick().await;
            let Some(resolver) = resolver.upgrade() else {
                break;
            };
            let flushed = resolver.flush();
            tracing::debug!(flushed, "Descriptor cache flushed");
        }
    })
}
