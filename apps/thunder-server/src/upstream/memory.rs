//! In-process upstream backend
//!
//! Holds messages and object bytes in memory and counts every call, so the
//! streaming layer can be exercised without a platform connection. Faults
//! (flood waits, rejected authorizations, timeouts) can be queued per call
//! site and are consumed in order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use super::{
    Connector, ExportedAuthorization, FileLocation, MediaKind, MessageMedia, Result,
    SessionCredential, ShardId, ShardSession, StoredMessage, UpstreamClient, UpstreamError,
};

/// Home shard given to identities created by [`MemoryBackend::connect`]
pub const DEFAULT_HOME_SHARD: ShardId = 1;

/// Shared in-memory "platform"
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<BackendInner>,
}

#[derive(Default)]
struct BackendInner {
    messages: RwLock<HashMap<i64, StoredMessage>>,
    blobs: RwLock<HashMap<i64, Bytes>>,
    rejected_tokens: RwLock<HashSet<String>>,
    faults: Mutex<Faults>,
    fetch_delay: Mutex<Option<Duration>>,
    message_fetches: AtomicUsize,
    chunk_fetches: AtomicUsize,
    sessions_opened: AtomicUsize,
    imports: AtomicUsize,
}

#[derive(Default)]
struct Faults {
    fetch: VecDeque<UpstreamError>,
    import: VecDeque<UpstreamError>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a file as message `message_id` on `shard`, returning its unique id
    pub fn add_file(
        &self,
        message_id: i64,
        shard: ShardId,
        file_name: &str,
        mime_type: &str,
        data: impl Into<Bytes>,
    ) -> String {
        let data = data.into();
        let unique_id = format!("Ag{:04}x{}Q", message_id.rem_euclid(10_000), shard);
        let kind = match mime_type.split('/').next() {
            Some("video") => MediaKind::Video,
            Some("audio") => MediaKind::Audio,
            _ => MediaKind::Document,
        };

        let message = StoredMessage {
            id: message_id,
            empty: false,
            media: Some(MessageMedia {
                kind,
                file_size: data.len() as u64,
                mime_type: Some(mime_type.to_string()),
                file_name: Some(file_name.to_string()),
                file_unique_id: unique_id.clone(),
                location: FileLocation {
                    shard,
                    media_id: message_id,
                    access_hash: message_id.wrapping_mul(31),
                    file_reference: format!("ref-{}", message_id),
                    thumb_size: None,
                },
            }),
        };

        self.inner.blobs.write().insert(message_id, data);
        self.add_message(message);
        unique_id
    }

    /// Store an arbitrary message (empty, media-less, unsupported media)
    pub fn add_message(&self, message: StoredMessage) {
        self.inner.messages.write().insert(message.id, message);
    }

    /// Queue an error for the next chunk fetch on any session
    pub fn fail_next_fetch(&self, error: UpstreamError) {
        self.inner.faults.lock().fetch.push_back(error);
    }

    /// Queue an error for the next authorization import on any session
    pub fn fail_next_import(&self, error: UpstreamError) {
        self.inner.faults.lock().import.push_back(error);
    }

    /// Delay every chunk fetch by `delay`
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *self.inner.fetch_delay.lock() = delay;
    }

    /// Make [`Connector::connect`] fail for `token`
    pub fn reject_token(&self, token: &str) {
        self.inner.rejected_tokens.write().insert(token.to_string());
    }

    /// Create a client whose identity lives on `home_shard`
    pub fn client(&self, home_shard: ShardId) -> Arc<MemoryClient> {
        Arc::new(MemoryClient {
            backend: self.clone(),
            home_shard,
        })
    }

    pub fn message_fetches(&self) -> usize {
        self.inner.message_fetches.load(Ordering::SeqCst)
    }

    pub fn chunk_fetches(&self) -> usize {
        self.inner.chunk_fetches.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.inner.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn imports(&self) -> usize {
        self.inner.imports.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryBackend {
    async fn connect(&self, index: usize, token: &str) -> Result<Arc<dyn UpstreamClient>> {
        if self.inner.rejected_tokens.read().contains(token) {
            return Err(UpstreamError::Rpc {
                code: 401,
                message: format!("ACCESS_TOKEN_INVALID for client {}", index),
            });
        }
        Ok(self.client(DEFAULT_HOME_SHARD))
    }
}

/// One identity on the in-memory platform
pub struct MemoryClient {
    backend: MemoryBackend,
    home_shard: ShardId,
}

#[async_trait]
impl UpstreamClient for MemoryClient {
    fn home_shard(&self) -> ShardId {
        self.home_shard
    }

    async fn get_message(&self, _channel: i64, message_id: i64) -> Result<Option<StoredMessage>> {
        let inner = &self.backend.inner;
        inner.message_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(inner.messages.read().get(&message_id).cloned())
    }

    async fn open_session(
        &self,
        shard: ShardId,
        credential: SessionCredential,
    ) -> Result<Arc<dyn ShardSession>> {
        self.backend
            .inner
            .sessions_opened
            .fetch_add(1, Ordering::SeqCst);

        // A home credential is only valid on the home shard
        let authorized = credential == SessionCredential::Home && shard == self.home_shard;
        Ok(Arc::new(MemorySession {
            backend: self.backend.clone(),
            shard,
            authorized: AtomicBool::new(authorized),
        }))
    }

    async fn export_authorization(&self, shard: ShardId) -> Result<ExportedAuthorization> {
        Ok(ExportedAuthorization {
            id: i64::from(self.home_shard),
            bytes: format!("auth:{}->{}", self.home_shard, shard).into_bytes(),
        })
    }
}

/// Session on one in-memory shard
pub struct MemorySession {
    backend: MemoryBackend,
    shard: ShardId,
    authorized: AtomicBool,
}

#[async_trait]
impl ShardSession for MemorySession {
    fn shard(&self) -> ShardId {
        self.shard
    }

    async fn import_authorization(&self, _authorization: &ExportedAuthorization) -> Result<()> {
        let inner = &self.backend.inner;
        inner.imports.fetch_add(1, Ordering::SeqCst);

        let fault = inner.faults.lock().import.pop_front();
        if let Some(error) = fault {
            return Err(error);
        }

        self.authorized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch(&self, location: &FileLocation, offset: u64, limit: u32) -> Result<Bytes> {
        let inner = &self.backend.inner;
        inner.chunk_fetches.fetch_add(1, Ordering::SeqCst);

        let fault = inner.faults.lock().fetch.pop_front();
        if let Some(error) = fault {
            return Err(error);
        }

        let delay = *inner.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if !self.authorized.load(Ordering::SeqCst) {
            return Err(UpstreamError::Rpc {
                code: 401,
                message: "AUTH_KEY_UNREGISTERED".to_string(),
            });
        }
        if location.shard != self.shard {
            return Err(UpstreamError::Rpc {
                code: 303,
                message: format!("FILE_MIGRATE_{}", location.shard),
            });
        }

        let blobs = inner.blobs.read();
        let data = blobs.get(&location.media_id).ok_or_else(|| UpstreamError::Rpc {
            code: 400,
            message: "FILE_ID_INVALID".to_string(),
        })?;

        let len = data.len() as u64;
        if offset >= len {
            return Ok(Bytes::new());
        }
        let end = (offset + u64::from(limit)).min(len);
        Ok(data.slice(offset as usize..end as usize))
    }

    async fn stop(&self) {
        self.authorized.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_slices_object() {
        let backend = MemoryBackend::new();
        backend.add_file(7, 1, "a.bin", "application/octet-stream", vec![1u8, 2, 3, 4, 5]);
        let client = backend.client(1);

        let message = client.get_message(-100, 7).await.unwrap().unwrap();
        let location = message.media.unwrap().location;
        let session = client.open_session(1, SessionCredential::Home).await.unwrap();

        assert_eq!(session.fetch(&location, 1, 2).await.unwrap().as_ref(), &[2, 3]);
        assert_eq!(session.fetch(&location, 3, 10).await.unwrap().as_ref(), &[4, 5]);
        assert!(session.fetch(&location, 5, 10).await.unwrap().is_empty());
        assert_eq!(backend.chunk_fetches(), 3);
    }

    #[tokio::test]
    async fn test_fresh_session_requires_import() {
        let backend = MemoryBackend::new();
        backend.add_file(8, 2, "b.bin", "application/octet-stream", vec![9u8; 4]);
        let client = backend.client(1);
        let location = client
            .get_message(-100, 8)
            .await
            .unwrap()
            .unwrap()
            .media
            .unwrap()
            .location;

        let session = client.open_session(2, SessionCredential::Fresh).await.unwrap();
        assert!(session.fetch(&location, 0, 4).await.is_err());

        let exported = client.export_authorization(2).await.unwrap();
        session.import_authorization(&exported).await.unwrap();
        assert_eq!(session.fetch(&location, 0, 4).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_rejected_token() {
        let backend = MemoryBackend::new();
        backend.reject_token("bad");

        assert!(backend.connect(1, "bad").await.is_err());
        assert!(backend.connect(2, "good").await.is_ok());
    }
}
