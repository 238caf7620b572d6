//! Upstream error types

use std::time::Duration;

use thiserror::Error;

use super::types::ShardId;

/// Errors raised by upstream connections and shard sessions
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// Rate-limit backpressure; the call may be retried after the wait
    #[error("Flood wait: retry after {}s", .0.as_secs())]
    FloodWait(Duration),

    /// The shard rejected an imported authorization
    #[error("Authorization bytes rejected")]
    AuthBytesInvalid,

    #[error("Failed to import authorization for shard {shard} after {attempts} attempts")]
    AuthorizationExhausted { shard: ShardId, attempts: u32 },

    /// The location's access credential is no longer valid
    #[error("File reference expired")]
    FileReferenceExpired,

    #[error("Upstream request timed out")]
    Timeout,

    #[error("Upstream connection lost: {0}")]
    Disconnected(String),

    #[error("Upstream RPC error {code}: {message}")]
    Rpc { code: u16, message: String },

    #[error("Upstream protocol error: {0}")]
    Protocol(String),
}

impl UpstreamError {
    /// Transport-level failures worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamError::Timeout | UpstreamError::Disconnected(_))
    }
}

/// Result type alias for upstream operations
pub type Result<T> = std::result::Result<T, UpstreamError>;
