//! Object descriptors
//!
//! Resolved metadata for one stored object, built from a channel message.

use thiserror::Error;

use crate::upstream::{FileLocation, MediaKind, ShardId, StoredMessage, UpstreamError};

/// Length of the secure hash carried in public links
pub const SECURE_HASH_LENGTH: usize = 6;

/// Errors raised while resolving an object reference
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No such message, an empty message, or no media attached
    #[error("Object {0} not found")]
    ObjectMissing(i64),

    /// Media attached but of a kind that cannot be streamed
    #[error("Object {0} has unsupported media")]
    UnsupportedMedia(i64),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Resolved metadata for one stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescriptor {
    pub message_id: i64,
    pub kind: MediaKind,
    pub location: FileLocation,
    pub file_size: u64,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
    pub unique_id: String,
}

impl ObjectDescriptor {
    /// Build a descriptor from a message lookup result
    pub fn from_message(
        message_id: i64,
        message: Option<StoredMessage>,
    ) -> Result<Self, ResolveError> {
        let message = match message {
            Some(message) if !message.empty => message,
            _ => return Err(ResolveError::ObjectMissing(message_id)),
        };
        let media = message.media.ok_or(ResolveError::ObjectMissing(message_id))?;
        if !media.kind.is_streamable() {
            return Err(ResolveError::UnsupportedMedia(message_id));
        }

        Ok(Self {
            message_id,
            kind: media.kind,
            location: media.location,
            file_size: media.file_size,
            mime_type: media.mime_type.filter(|m| !m.is_empty()),
            file_name: media.file_name.filter(|n| !n.is_empty()),
            unique_id: media.file_unique_id,
        })
    }

    /// Shard holding the object's bytes
    pub fn shard(&self) -> ShardId {
        self.location.shard
    }

    /// Capability token used in public links
    pub fn secure_hash(&self) -> &str {
        match self.unique_id.char_indices().nth(SECURE_HASH_LENGTH) {
            Some((end, _)) => &self.unique_id[..end],
            None => &self.unique_id,
        }
    }

    pub fn matches_hash(&self, hash: &str) -> bool {
        hash.len() == SECURE_HASH_LENGTH && self.secure_hash() == hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::MessageMedia;

    fn message(kind: MediaKind) -> StoredMessage {
        StoredMessage {
            id: 10,
            empty: false,
            media: Some(MessageMedia {
                kind,
                file_size: 42,
                mime_type: Some(String::new()),
                file_name: Some("clip.mp4".to_string()),
                file_unique_id: "AgADxyz123".to_string(),
                location: FileLocation {
                    shard: 4,
                    media_id: 99,
                    access_hash: 1,
                    file_reference: "ref".to_string(),
                    thumb_size: None,
                },
            }),
        }
    }

    #[test]
    fn test_descriptor_from_message() {
        let descriptor = ObjectDescriptor::from_message(10, Some(message(MediaKind::Video))).unwrap();

        assert_eq!(descriptor.shard(), 4);
        assert_eq!(descriptor.file_size, 42);
        assert_eq!(descriptor.mime_type, None);
        assert_eq!(descriptor.secure_hash(), "AgADxy");
        assert!(descriptor.matches_hash("AgADxy"));
        assert!(!descriptor.matches_hash("AgADxz"));
        assert!(!descriptor.matches_hash("AgAD"));
    }

    #[test]
    fn test_missing_and_unsupported() {
        assert!(matches!(
            ObjectDescriptor::from_message(1, None),
            Err(ResolveError::ObjectMissing(1))
        ));

        let mut empty = message(MediaKind::Document);
        empty.empty = true;
        assert!(matches!(
            ObjectDescriptor::from_message(1, Some(empty)),
            Err(ResolveError::ObjectMissing(1))
        ));

        let mut bare = message(MediaKind::Document);
        bare.media = None;
        assert!(matches!(
            ObjectDescriptor::from_message(1, Some(bare)),
            Err(ResolveError::ObjectMissing(1))
        ));

        assert!(matches!(
            ObjectDescriptor::from_message(1, Some(message(MediaKind::None))),
            Err(ResolveError::UnsupportedMedia(1))
        ));
    }
}
