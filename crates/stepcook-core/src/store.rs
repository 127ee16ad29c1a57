//! Session store: durable local snapshots plus best-effort remote sync.
//!
//! Local writes are synchronous and version-guarded. Every local save also
//! queues the session for a push, so a transition committed while offline
//! reaches the remote on the next successful reconcile.
//!
//! Network absence is never an error here. Any remote failure or timeout
//! degrades `reconcile` to [`ReconcileOutcome::Offline`] and the caller keeps
//! working from the local copy.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{CoreError, DatabaseError, Result};
use crate::session::CookingSession;
use crate::storage::{EngineConfig, SessionDb, SessionFilter};
use crate::sync::{
    decide, HttpRemoteStore, MergeDecision, ReconcileOutcome, RemoteSessionStore,
    SyncError, SyncStatus,
};

const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SessionStore {
    db: Mutex<SessionDb>,
    remote: Option<Arc<dyn RemoteSessionStore>>,
    online: AtomicBool,
    reconcile_timeout: Duration,
    last_reconciled_at: Mutex<Option<DateTime<Utc>>>,
}

impl SessionStore {
    /// Local-only store.
    pub fn new(db: SessionDb) -> Self {
        Self {
            db: Mutex::new(db),
            remote: None,
            online: AtomicBool::new(false),
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
            last_reconciled_at: Mutex::new(None),
        }
    }

    /// Store with a remote reconciliation target. Starts out assuming
    /// connectivity; the host reports changes via [`SessionStore::set_online`].
    pub fn with_remote(db: SessionDb, remote: Arc<dyn RemoteSessionStore>) -> Self {
        Self {
            remote: Some(remote),
            online: AtomicBool::new(true),
            ..Self::new(db)
        }
    }

    pub fn reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    /// Build a store from configuration: opens the database under
    /// `data_dir` and, when sync is enabled, an HTTP remote.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or the remote URL
    /// is invalid.
    pub fn from_config(config: &EngineConfig, data_dir: &Path) -> Result<Self> {
        let db = SessionDb::open(&config.database_path(data_dir))?;
        let store = match (&config.sync.remote_url, config.sync.enabled) {
            (Some(url), true) => {
                let remote = HttpRemoteStore::new(url, config.sync.request_timeout())?;
                Self::with_remote(db, Arc::new(remote))
            }
            _ => Self::new(db),
        };
        Ok(store.reconcile_timeout(config.sync.reconcile_timeout()))
    }

    fn db(&self) -> Result<MutexGuard<'_, SessionDb>> {
        self.db
            .lock()
            .map_err(|_| CoreError::Database(DatabaseError::Poisoned))
    }

    // ── Local ────────────────────────────────────────────────────────

    /// Persist a snapshot and queue it for push.
    ///
    /// # Errors
    /// `VersionConflict` if an equal or newer snapshot is already stored.
    pub fn save(&self, session: &CookingSession) -> Result<()> {
        self.db()?.upsert_snapshot(session, true)
    }

    /// Latest local snapshot.
    ///
    /// # Errors
    /// `NotFound` if the session was never stored locally.
    pub fn load(&self, session_id: &str) -> Result<CookingSession> {
        self.db()?
            .load(session_id)?
            .ok_or_else(|| CoreError::NotFound(session_id.to_string()))
    }

    pub fn list_sessions(&self, filter: SessionFilter) -> Result<Vec<CookingSession>> {
        self.db()?.list(filter)
    }

    // ── Connectivity ─────────────────────────────────────────────────

    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was != online {
            info!(online, "connectivity changed");
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn status(&self) -> Result<SyncStatus> {
        let last_reconciled_at = *self
            .last_reconciled_at
            .lock()
            .map_err(|_| CoreError::Database(DatabaseError::Poisoned))?;
        Ok(SyncStatus {
            last_reconciled_at,
            pending_count: self.db()?.pending_count()?,
            online: self.is_online(),
            remote_configured: self.has_remote(),
        })
    }

    // ── Remote ───────────────────────────────────────────────────────

    /// Compare local and remote copies of a session and make them agree.
    ///
    /// # Errors
    /// `NotFound` only when neither side knows the session. Local storage
    /// failures propagate; remote failures never do.
    pub async fn reconcile(&self, session_id: &str) -> Result<ReconcileOutcome> {
        self.reconcile_checked(session_id, |_| Ok(())).await
    }

    /// Like [`SessionStore::reconcile`], but a remote snapshot is only
    /// stored locally if `accept` allows it. A rejected snapshot leaves the
    /// local copy in place, queued for push, and reports `Offline`.
    pub async fn reconcile_checked<F>(&self, session_id: &str, accept: F) -> Result<ReconcileOutcome>
    where
        F: Fn(&CookingSession) -> Result<()> + Send + Sync,
    {
        let local = self.db()?.load(session_id)?;

        let Some(remote) = self.remote.clone().filter(|_| self.is_online()) else {
            debug!(session_id, "reconcile skipped: offline or no remote");
            return match local {
                Some(_) => Ok(ReconcileOutcome::Offline),
                None => Err(CoreError::NotFound(session_id.to_string())),
            };
        };

        let remote_copy = match self.bounded(remote.get(session_id)).await {
            Ok(copy) => copy,
            Err(err) => {
                warn!(session_id, error = %err, "remote fetch failed; continuing offline");
                return match local {
                    Some(_) => Ok(ReconcileOutcome::Offline),
                    None => Err(CoreError::NotFound(session_id.to_string())),
                };
            }
        };

        let decision = decide(local.as_ref(), remote_copy.as_ref());

        let outcome = match (decision, local, remote_copy) {
            (MergeDecision::Missing, _, _) => {
                return Err(CoreError::NotFound(session_id.to_string()));
            }
            (MergeDecision::InSync, _, _) => {
                self.db()?.clear_push(session_id)?;
                ReconcileOutcome::InSync
            }
            (MergeDecision::UseRemote, local, Some(mut remote_copy)) => {
                if let Err(err) = accept(&remote_copy) {
                    warn!(session_id, error = %err, "rejected remote snapshot; keeping local copy");
                    self.db()?.enqueue_push(session_id)?;
                    return Ok(ReconcileOutcome::Offline);
                }
                // A finished remote copy may carry a lower version than the
                // active local one; it still has to land locally and remotely.
                let restamped = outrank(&mut remote_copy, local.as_ref());
                {
                    let db = self.db()?;
                    db.upsert_snapshot(&remote_copy, restamped)?;
                    if !restamped {
                        db.clear_push(session_id)?;
                    }
                }
                info!(
                    session_id,
                    sync_version = remote_copy.sync_version,
                    status = remote_copy.status.as_str(),
                    "pulled remote snapshot"
                );
                ReconcileOutcome::Pulled(remote_copy)
            }
            (MergeDecision::UseLocal, Some(mut local), remote_copy) => {
                if outrank(&mut local, remote_copy.as_ref()) {
                    self.db()?.upsert_snapshot(&local, true)?;
                    info!(
                        session_id,
                        sync_version = local.sync_version,
                        "re-stamped finished session above remote copy"
                    );
                }
                match self.bounded(remote.put(&local)).await {
                    Ok(sync_version) => {
                        self.clear_push_if_current(session_id, local.sync_version)?;
                        info!(session_id, sync_version, "pushed local snapshot");
                        ReconcileOutcome::Pushed { sync_version }
                    }
                    Err(err) => {
                        warn!(session_id, error = %err, "remote push failed; queued for retry");
                        self.db()?.enqueue_push(session_id)?;
                        return Ok(ReconcileOutcome::Offline);
                    }
                }
            }
            // decide only picks a side that is present.
            (MergeDecision::UseRemote, _, None) | (MergeDecision::UseLocal, None, _) => {
                return Err(CoreError::NotFound(session_id.to_string()));
            }
        };

        self.mark_reconciled()?;
        Ok(outcome)
    }

    /// Reconcile every session in the push queue, oldest first, except
    /// `skip` (a session whose owner reconciles it itself). Stops early once
    /// the remote turns out to be unreachable.
    pub async fn flush_pending(&self, skip: Option<&str>) -> Result<Vec<(String, ReconcileOutcome)>> {
        let pending = self.db()?.pending_pushes()?;
        let mut results = Vec::with_capacity(pending.len());
        for session_id in pending {
            if skip == Some(session_id.as_str()) {
                continue;
            }
            let outcome = match self.reconcile(&session_id).await {
                Ok(outcome) => outcome,
                Err(CoreError::NotFound(_)) => {
                    self.db()?.clear_push(&session_id)?;
                    continue;
                }
                Err(err) => return Err(err),
            };
            let offline = outcome.is_offline();
            results.push((session_id, outcome));
            if offline {
                break;
            }
        }
        Ok(results)
    }

    async fn bounded<T>(
        &self,
        request: impl std::future::Future<Output = Result<T, SyncError>>,
    ) -> Result<T, SyncError> {
        match tokio::time::timeout(self.reconcile_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(self.reconcile_timeout.as_millis() as u64)),
        }
    }

    /// A save may have landed while the push was in flight; only drop the
    /// queue entry if the pushed version is still the latest local one.
    fn clear_push_if_current(&self, session_id: &str, pushed_version: u64) -> Result<()> {
        let db = self.db()?;
        if db.stored_version(session_id)? == Some(pushed_version) {
            db.clear_push(session_id)?;
        }
        Ok(())
    }

    fn mark_reconciled(&self) -> Result<()> {
        *self
            .last_reconciled_at
            .lock()
            .map_err(|_| CoreError::Database(DatabaseError::Poisoned))? = Some(Utc::now());
        Ok(())
    }
}

/// Lift `winner` above `loser` so version-guarded writes on both sides
/// accept it. Returns whether the version changed.
fn outrank(winner: &mut CookingSession, loser: Option<&CookingSession>) -> bool {
    match loser {
        Some(loser) if winner.sync_version <= loser.sync_version => {
            winner.sync_version = loser.sync_version + 1;
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::MemoryRemoteStore;

    fn session(version: u64) -> CookingSession {
        let mut s = CookingSession::new("soup", Utc::now());
        s.session_id = "soup-1".into();
        s.sync_version = version;
        s
    }

    fn store_with_remote() -> (SessionStore, Arc<MemoryRemoteStore>) {
        let remote = Arc::new(MemoryRemoteStore::new());
        let store = SessionStore::with_remote(SessionDb::open_memory().unwrap(), remote.clone());
        (store, remote)
    }

    #[test]
    fn save_rejects_stale_version() {
        let store = SessionStore::new(SessionDb::open_memory().unwrap());
        store.save(&session(5)).unwrap();
        assert!(matches!(
            store.save(&session(3)),
            Err(CoreError::VersionConflict { attempted: 3, stored: 5, .. })
        ));
        assert_eq!(store.load("soup-1").unwrap().sync_version, 5);
    }

    #[test]
    fn load_unknown_is_not_found() {
        let store = SessionStore::new(SessionDb::open_memory().unwrap());
        assert!(matches!(store.load("nope"), Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn reconcile_without_remote_is_offline_noop() {
        let store = SessionStore::new(SessionDb::open_memory().unwrap());
        store.save(&session(1)).unwrap();
        assert_eq!(
            store.reconcile("soup-1").await.unwrap(),
            ReconcileOutcome::Offline
        );
        assert_eq!(store.status().unwrap().pending_count, 1);
    }

    #[tokio::test]
    async fn reconcile_pushes_newer_local() {
        let (store, remote) = store_with_remote();
        store.save(&session(3)).unwrap();
        remote.insert(session(1)).await;

        assert_eq!(
            store.reconcile("soup-1").await.unwrap(),
            ReconcileOutcome::Pushed { sync_version: 3 }
        );
        assert_eq!(remote.snapshot("soup-1").await.unwrap().sync_version, 3);
        assert_eq!(store.status().unwrap().pending_count, 0);
        assert!(store.status().unwrap().last_reconciled_at.is_some());
    }

    #[tokio::test]
    async fn reconcile_pulls_newer_remote() {
        let (store, remote) = store_with_remote();
        store.save(&session(2)).unwrap();
        let mut newer = session(6);
        newer.current_step_index = 4;
        remote.insert(newer.clone()).await;

        assert_eq!(
            store.reconcile("soup-1").await.unwrap(),
            ReconcileOutcome::Pulled(newer.clone())
        );
        assert_eq!(store.load("soup-1").unwrap(), newer);
        assert_eq!(store.status().unwrap().pending_count, 0);
    }

    #[tokio::test]
    async fn reconcile_twice_is_idempotent() {
        let (store, _remote) = store_with_remote();
        store.save(&session(2)).unwrap();

        assert!(matches!(
            store.reconcile("soup-1").await.unwrap(),
            ReconcileOutcome::Pushed { .. }
        ));
        let after_first = store.load("soup-1").unwrap();
        assert_eq!(
            store.reconcile("soup-1").await.unwrap(),
            ReconcileOutcome::InSync
        );
        assert_eq!(store.load("soup-1").unwrap(), after_first);
    }

    #[tokio::test]
    async fn unreachable_remote_degrades_to_offline() {
        let (store, remote) = store_with_remote();
        store.save(&session(1)).unwrap();
        remote.set_available(false);

        assert_eq!(
            store.reconcile("soup-1").await.unwrap(),
            ReconcileOutcome::Offline
        );
        assert_eq!(store.status().unwrap().pending_count, 1);
    }

    #[tokio::test]
    async fn slow_remote_times_out() {
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.set_latency(Some(Duration::from_secs(30))).await;
        let store = SessionStore::with_remote(SessionDb::open_memory().unwrap(), remote)
            .reconcile_timeout(Duration::from_millis(50));
        store.save(&session(1)).unwrap();

        let started = std::time::Instant::now();
        assert_eq!(
            store.reconcile("soup-1").await.unwrap(),
            ReconcileOutcome::Offline
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn offline_flag_skips_network() {
        let (store, remote) = store_with_remote();
        store.save(&session(1)).unwrap();
        store.set_online(false);
        assert!(store.reconcile("soup-1").await.unwrap().is_offline());
        assert!(remote.snapshot("soup-1").await.is_none());
    }

    #[tokio::test]
    async fn pulls_session_unknown_locally() {
        let (store, remote) = store_with_remote();
        remote.insert(session(4)).await;
        assert!(matches!(
            store.reconcile("soup-1").await.unwrap(),
            ReconcileOutcome::Pulled(_)
        ));
        assert_eq!(store.load("soup-1").unwrap().sync_version, 4);
    }

    #[tokio::test]
    async fn unknown_everywhere_is_not_found() {
        let (store, _remote) = store_with_remote();
        assert!(matches!(
            store.reconcile("ghost").await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn flush_pending_pushes_queue_after_reconnect() {
        let (store, remote) = store_with_remote();
        store.set_online(false);
        store.save(&session(1)).unwrap();
        let mut other = session(2);
        other.session_id = "soup-2".into();
        store.save(&other).unwrap();
        assert_eq!(store.status().unwrap().pending_count, 2);

        store.set_online(true);
        let results = store.flush_pending(None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(store.status().unwrap().pending_count, 0);
        assert!(remote.snapshot("soup-2").await.is_some());
    }
}
