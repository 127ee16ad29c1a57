//! Remote session document store contract.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::types::SyncError;
use crate::session::CookingSession;

/// A document-style store addressed by session id.
///
/// Implementations own their wire format; the engine only needs whole
/// snapshot get/put and the stored `sync_version` back.
#[async_trait]
pub trait RemoteSessionStore: Send + Sync {
    /// Fetch the remote snapshot, `None` if the remote has never seen it.
    async fn get(&self, session_id: &str) -> Result<Option<CookingSession>, SyncError>;

    /// Store the whole snapshot. Returns the version the remote now holds.
    async fn put(&self, session: &CookingSession) -> Result<u64, SyncError>;
}

/// In-process remote store.
///
/// Used for tests and for hosts that sync between engines in one process.
/// Availability and latency can be toggled to exercise offline paths.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    sessions: Mutex<HashMap<String, CookingSession>>,
    unavailable: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub async fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().await = latency;
    }

    /// Write directly, bypassing the version guard (another device's write).
    pub async fn insert(&self, session: CookingSession) {
        self.sessions
            .lock()
            .await
            .insert(session.session_id.clone(), session);
    }

    pub async fn snapshot(&self, session_id: &str) -> Option<CookingSession> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    async fn simulate_network(&self) -> Result<(), SyncError> {
        let latency = *self.latency.lock().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SyncError::Unavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSessionStore for MemoryRemoteStore {
    async fn get(&self, session_id: &str) -> Result<Option<CookingSession>, SyncError> {
        self.simulate_network().await?;
        Ok(self.sessions.lock().await.get(session_id).cloned())
    }

    async fn put(&self, session: &CookingSession) -> Result<u64, SyncError> {
        self.simulate_network().await?;
        let mut sessions = self.sessions.lock().await;
        if let Some(stored) = sessions.get(&session.session_id) {
            if stored.sync_version >= session.sync_version {
                return Err(SyncError::Conflict {
                    attempted: session.sync_version,
                    stored: stored.sync_version,
                });
            }
        }
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(session.sync_version)
    }
}
