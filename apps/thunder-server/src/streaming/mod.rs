//! Streaming gateway core
//!
//! Request flow:
//!
//! ```text
//! ConnectionPool::select ─→ StreamerCache::get_or_create ─→ MediaStreamer
//!                                                               │
//!         ┌─────────────────────────────────────────────────────┤
//!         ↓                           ↓                         ↓
//! DescriptorResolver::resolve   SessionManager::get_session   produce()
//!   (LRU + periodic flush)       (one session per shard)      (chunked reads)
//! ```

use std::time::Duration;

pub mod descriptor;
pub mod instances;
pub mod pool;
pub mod producer;
pub mod range;
pub mod resolver;
pub mod session;
pub mod streamer;

pub use descriptor::{ObjectDescriptor, ResolveError, SECURE_HASH_LENGTH};
pub use instances::StreamerCache;
pub use pool::{ConnectionPool, UpstreamConnection, WorkloadGuard};
pub use producer::ByteStream;
pub use range::{ByteRange, RangeError, StreamRange, CHUNK_SIZE};
pub use resolver::DescriptorResolver;
pub use session::{AuthRetryPolicy, SessionManager};
pub use streamer::MediaStreamer;

/// Settings shared by every [`MediaStreamer`]
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Storage channel holding the objects
    pub channel: i64,
    /// Maximum number of cached streamers
    pub cache_size: usize,
    /// Per-connection descriptor cache bound
    pub descriptor_capacity: usize,
    /// Interval between wholesale descriptor cache flushes
    pub flush_interval: Duration,
    pub auth_retry: AuthRetryPolicy,
    /// Upper bound on a single chunk fetch
    pub fetch_timeout: Duration,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            cache_size: 100,
            descriptor_capacity: 1024,
            flush_interval: Duration::from_secs(30 * 60),
            auth_retry: AuthRetryPolicy::default(),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}
