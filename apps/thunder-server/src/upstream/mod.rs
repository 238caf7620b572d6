//! Upstream messaging platform capability
//!
//! The gateway never speaks the platform's wire protocol itself. It consumes
//! three narrow capabilities, expressed here as traits:
//!
//! - [`Connector`]: log in one identity and hand back an [`UpstreamClient`]
//! - [`UpstreamClient`]: message metadata lookup, shard session creation,
//!   and authorization export
//! - [`ShardSession`]: authorization import and chunked reads
//!
//! # Backends
//!
//! - [`bridge`]: JSON over HTTP to a sidecar that owns the real protocol
//! - [`memory`]: in-process backend with counters and fault injection

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

pub mod bridge;
mod error;
pub mod memory;
mod types;

pub use error::{Result, UpstreamError};
pub use types::*;

/// One authenticated identity on the messaging platform
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Shard that holds this identity's own authorization
    fn home_shard(&self) -> ShardId;

    /// Look up a message in a channel; `None` when the platform has no such message
    async fn get_message(&self, channel: i64, message_id: i64) -> Result<Option<StoredMessage>>;

    /// Start a transfer session on `shard`
    async fn open_session(
        &self,
        shard: ShardId,
        credential: SessionCredential,
    ) -> Result<Arc<dyn ShardSession>>;

    /// Export this identity's authorization for use on another shard
    async fn export_authorization(&self, shard: ShardId) -> Result<ExportedAuthorization>;
}

/// An authenticated transfer channel to one shard
#[async_trait]
pub trait ShardSession: Send + Sync {
    fn shard(&self) -> ShardId;

    async fn import_authorization(&self, authorization: &ExportedAuthorization) -> Result<()>;

    /// Read up to `limit` bytes of the object at `location`, starting at `offset`
    ///
    /// An empty payload means the offset is past the end of the object.
    async fn fetch(&self, location: &FileLocation, offset: u64, limit: u32) -> Result<Bytes>;

    async fn stop(&self);
}

/// Logs identities in to the platform
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, index: usize, token: &str) -> Result<Arc<dyn UpstreamClient>>;
}
