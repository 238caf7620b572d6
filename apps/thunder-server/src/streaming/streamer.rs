//! Per-connection media streamer
//!
//! Bundles one upstream connection with its descriptor cache and shard
//! sessions. Instances are shared through the [`StreamerCache`] so repeated
//! requests on the same connection reuse warm caches.
//!
//! [`StreamerCache`]: super::StreamerCache

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::descriptor::{ObjectDescriptor, ResolveError};
use super::pool::UpstreamConnection;
use super::producer::{produce, ByteStream};
use super::range::StreamRange;
use super::resolver::{spawn_flush_task, DescriptorResolver};
use super::session::SessionManager;
use super::StreamerConfig;
use crate::upstream::{ShardSession, UpstreamError};

pub struct MediaStreamer {
    connection: Arc<UpstreamConnection>,
    resolver: Arc<DescriptorResolver>,
    sessions: SessionManager,
    fetch_timeout: Duration,
}

impl MediaStreamer {
    pub fn new(connection: Arc<UpstreamConnection>, config: &StreamerConfig) -> Self {
        let client = connection.client().clone();
        Self {
            resolver: Arc::new(DescriptorResolver::new(
                client.clone(),
                config.channel,
                config.descriptor_capacity,
            )),
            sessions: SessionManager::new(client, config.auth_retry),
            fetch_timeout: config.fetch_timeout,
            connection,
        }
    }

    pub fn connection(&self) -> &Arc<UpstreamConnection> {
        &self.connection
    }

    pub fn resolver(&self) -> &Arc<DescriptorResolver> {
        &self.resolver
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Start flushing this streamer's descriptor cache every `period`
    pub fn spawn_flush(&self, period: Duration) -> JoinHandle<()> {
        spawn_flush_task(&self.resolver, period)
    }

    pub async fn resolve(&self, message_id: i64) -> Result<ObjectDescriptor, ResolveError> {
        self.resolver.resolve(message_id).await
    }

    /// Forget a descriptor whose access credential was rejected
    pub fn invalidate(&self, message_id: i64) {
        self.resolver.invalidate(message_id);
    }

    /// Session on the shard holding `descriptor`
    pub async fn session(
        &self,
        descriptor: &ObjectDescriptor,
    ) -> Result<Arc<dyn ShardSession>, UpstreamError> {
        self.sessions.get_session(descriptor.shard()).await
    }

    /// Stream `range` of `descriptor`, counted against this connection's workload
    pub fn stream(
        &self,
        descriptor: &ObjectDescriptor,
        session: Arc<dyn ShardSession>,
        range: StreamRange,
    ) -> ByteStream {
        let workload = self.connection.begin_stream();
        tracing::debug!(
            connection = self.connection.index(),
            message_id = descriptor.message_id,
            from = range.from,
            until = range.until,
            parts = range.part_count,
            "Starting chunk stream"
        );
        produce(
            session,
            descriptor.location.clone(),
            range,
            self.fetch_timeout,
            workload,
        )
    }
}
