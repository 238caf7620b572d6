//! Upstream protocol types

use serde::{Deserialize, Serialize};

/// Backend shard ("data center") identifier
pub type ShardId = i32;

/// Kind of media attached to a stored message
///
/// Resolved once when the message is fetched; `None` marks an attachment
/// the gateway does not know how to stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Document,
    Photo,
    Video,
    Audio,
    Voice,
    Sticker,
    Animation,
    VideoNote,
    None,
}

impl MediaKind {
    /// Whether this kind carries a streamable binary payload
    pub fn is_streamable(self) -> bool {
        !matches!(self, MediaKind::None)
    }
}

/// Opaque handle locating an object's bytes on its shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLocation {
    pub shard: ShardId,
    pub media_id: i64,
    pub access_hash: i64,
    /// Access credential; the platform may expire it at any time
    pub file_reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb_size: Option<String>,
}

/// Media metadata attached to a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMedia {
    pub kind: MediaKind,
    pub file_size: u64,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    pub file_unique_id: String,
    pub location: FileLocation,
}

/// A message looked up in the storage channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    /// Set by the platform for deleted or service messages
    #[serde(default)]
    pub empty: bool,
    #[serde(default)]
    pub media: Option<MessageMedia>,
}

/// Credential used to open a shard session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionCredential {
    /// The connection's own long-lived key (home shard only)
    Home,
    /// A freshly negotiated key that still needs an imported authorization
    Fresh,
}

/// Authorization exported from the home shard for import into another shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedAuthorization {
    pub id: i64,
    pub bytes: Vec<u8>,
}
