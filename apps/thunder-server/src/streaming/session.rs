//! Shard session management
//!
//! Each connection keeps at most one live session per shard. Sessions on
//! the connection's home shard reuse its own credential; sessions on any
//! other shard start with a fresh key and import an authorization exported
//! from the home shard.
//!
//! Creation for a given shard goes through a per-shard [`OnceCell`], so
//! concurrent callers collapse into a single attempt and all receive its
//! result. A failed attempt leaves the cell empty for the next caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::upstream::{SessionCredential, ShardId, ShardSession, UpstreamClient, UpstreamError};

type SessionCell = Arc<OnceCell<Arc<dyn ShardSession>>>;

/// Retry policy for the cross-shard authorization exchange
#[derive(Debug, Clone, Copy)]
pub struct AuthRetryPolicy {
    /// Failed attempts allowed before giving up (flood waits do not count)
    pub attempts: u32,
    /// Linear backoff unit; the n-th failure sleeps `n * backoff`
    pub backoff: Duration,
}

impl Default for AuthRetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 6,
            backoff: Duration::from_millis(250),
        }
    }
}

/// Per-connection cache of shard sessions
pub struct SessionManager {
    client: Arc<dyn UpstreamClient>,
    sessions: Mutex<HashMap<ShardId, SessionCell>>,
    policy: AuthRetryPolicy,
}

impl SessionManager {
    pub fn new(client: Arc<dyn UpstreamClient>, policy: AuthRetryPolicy) -> Self {
        Self {
            client,
            sessions: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// Get the session for `shard`, creating it on first use
    pub async fn get_session(&self, shard: ShardId) -> Result<Arc<dyn ShardSession>, UpstreamError> {
        let cell = self.sessions.lock().entry(shard).or_default().clone();
        let session = cell.get_or_try_init(|| self.create_session(shard)).await?;
        Ok(session.clone())
    }

    /// Number of shards with a live session
    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop and forget every session
    pub async fn close_all(&self) {
        let cells: Vec<SessionCell> = self.sessions.lock().drain().map(|(_, cell)| cell).collect();
        for cell in cells {
            if let Some(session) = cell.get() {
                session.stop().await;
            }
        }
    }

    async fn create_session(&self, shard: ShardId) -> Result<Arc<dyn ShardSession>, UpstreamError> {
        let home = self.client.home_shard();
        if shard == home {
            let session = self.client.open_session(shard, SessionCredential::Home).await?;
            tracing::debug!(shard, "Created home shard session");
            return Ok(session);
        }

        let session = self.client.open_session(shard, SessionCredential::Fresh).await?;
        if let Err(e) = self.import_authorization(session.as_ref(), shard).await {
            session.stop().await;
            tracing::error!(shard, home, "Cross-shard authorization failed: {}", e);
            return Err(e);
        }

        tracing::debug!(shard, home, "Created cross-shard session");
        Ok(session)
    }

    /// Export the home authorization and import it into `session`
    ///
    /// Flood waits sleep for the signalled duration and are not counted.
    /// Rejected authorizations and transient transport errors count as an
    /// attempt and back off linearly. Anything else aborts immediately.
    async fn import_authorization(
        &self,
        session: &dyn ShardSession,
        shard: ShardId,
    ) -> Result<(), UpstreamError> {
        let mut failures = 0;

        while failures < self.policy.attempts {
            let result = match self.client.export_authorization(shard).await {
                Ok(exported) => session.import_authorization(&exported).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(UpstreamError::FloodWait(wait)) => {
                    tracing::warn!(shard, wait_secs = wait.as_secs(), "Flood wait during authorization import");
                    tokio::time::sleep(wait).await;
                }
                Err(e) if matches!(e, UpstreamError::AuthBytesInvalid) || e.is_transient() => {
                    failures += 1;
                    tracing::debug!(shard, attempt = failures, "Authorization import failed: {}", e);
                    if failures < self.policy.attempts {
                        tokio::time::sleep(self.policy.backoff * failures).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(UpstreamError::AuthorizationExhausted {
            shard,
            attempts: self.policy.attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::memory::MemoryBackend;

    fn manager(backend: &MemoryBackend) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(backend.client(1), AuthRetryPolicy::default()))
    }

    #[tokio::test]
    async fn test_home_shard_session_is_reused() {
        let backend = MemoryBackend::new();
        let sessions = manager(&backend);

        let first = sessions.get_session(1).await.unwrap();
        let second = sessions.get_session(1).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(backend.sessions_opened(), 1);
        assert_eq!(backend.imports(), 0);
        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_creation_collapses() {
        let backend = MemoryBackend::new();
        let sessions = manager(&backend);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let sessions = sessions.clone();
                tokio::spawn(async move { sessions.get_session(3).await.unwrap() })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(backend.sessions_opened(), 1);
        assert_eq!(backend.imports(), 1);
        assert!(results.iter().all(|s| Arc::ptr_eq(s, &results[0])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flood_wait_is_not_counted() {
        let backend = MemoryBackend::new();
        let sessions = Arc::new(SessionManager::new(
            backend.client(1),
            AuthRetryPolicy {
                attempts: 2,
                backoff: Duration::from_millis(10),
            },
        ));

        backend.fail_next_import(UpstreamError::FloodWait(Duration::from_secs(5)));
        backend.fail_next_import(UpstreamError::FloodWait(Duration::from_secs(5)));
        backend.fail_next_import(UpstreamError::AuthBytesInvalid);

        let started = tokio::time::Instant::now();
        sessions.get_session(2).await.unwrap();

        assert_eq!(backend.imports(), 4);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_fail() {
        let backend = MemoryBackend::new();
        let sessions = manager(&backend);

        for _ in 0..6 {
            backend.fail_next_import(UpstreamError::AuthBytesInvalid);
        }

        let result = sessions.get_session(2).await;
        assert!(matches!(
            result,
            Err(UpstreamError::AuthorizationExhausted { shard: 2, attempts: 6 })
        ));
        assert_eq!(backend.imports(), 6);
        assert!(sessions.is_empty());

        // A later call starts over with a fresh session
        sessions.get_session(2).await.unwrap();
        assert_eq!(backend.sessions_opened(), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_aborts() {
        let backend = MemoryBackend::new();
        let sessions = manager(&backend);

        backend.fail_next_import(UpstreamError::Rpc {
            code: 400,
            message: "DC_ID_INVALID".to_string(),
        });

        assert!(matches!(
            sessions.get_session(9).await,
            Err(UpstreamError::Rpc { code: 400, .. })
        ));
        assert_eq!(backend.imports(), 1);
    }
}
