//! Session facade: the caller-facing handle for one cooking session.
//!
//! A single actor task owns the [`SessionMachine`]. User commands, timer
//! ticks and remote refreshes all reach it through one bounded queue, so
//! nothing ever interleaves against the session. The tick source is a
//! separate task that only enqueues `Tick` signals.
//!
//! Three read-only streams are exposed:
//! - state: `watch` of the latest [`CookingSession`]
//! - ticks: `watch` of the active timer's remaining seconds
//! - events: `broadcast` of discrete [`SessionEvent`]s

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::events::SessionEvent;
use crate::recipe::Recipe;
use crate::session::{check_snapshot, Command, CookingSession, SessionMachine, TickUpdate};
use crate::storage::EngineConfig;
use crate::store::SessionStore;
use crate::sync::ReconcileOutcome;

const EVENT_CAPACITY: usize = 64;

enum Request {
    Command {
        command: Command,
        reply: oneshot::Sender<Result<CookingSession>>,
    },
    Tick,
    Reconcile {
        reply: oneshot::Sender<Result<ReconcileOutcome>>,
    },
    Suspend {
        reply: oneshot::Sender<()>,
    },
    ResumeForeground {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running cooking session. Cheap to clone; all clones drive
/// the same actor.
#[derive(Clone)]
pub struct SessionFacade {
    session_id: String,
    requests: mpsc::Sender<Request>,
    state: watch::Receiver<CookingSession>,
    ticks: watch::Receiver<Option<u64>>,
    events: broadcast::Sender<SessionEvent>,
    store: Arc<SessionStore>,
}

impl SessionFacade {
    /// Start a new session for `recipe`. The initial `NotStarted` snapshot
    /// is stored before the handle is returned.
    ///
    /// # Errors
    /// `InvalidInput` for an invalid recipe, or a storage error if the
    /// initial snapshot cannot be saved.
    pub async fn create(
        recipe: impl Into<Arc<Recipe>>,
        store: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let machine = SessionMachine::new(recipe.into(), clock.clone())?;
        store.save(&machine.session())?;
        Ok(Self::spawn(machine, store, clock, config))
    }

    /// Continue a stored session, reconciling with the remote first so a
    /// session continued on another device picks up where it left off.
    ///
    /// # Errors
    /// `NotFound` for an unknown id, `InvalidInput` if the stored session
    /// belongs to a different recipe.
    pub async fn resume_session(
        recipe: impl Into<Arc<Recipe>>,
        session_id: &str,
        store: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let recipe: Arc<Recipe> = recipe.into();
        let outcome = store
            .reconcile_checked(session_id, |snapshot| check_snapshot(&recipe, snapshot))
            .await?;
        debug!(session_id, ?outcome, "reconciled before resume");
        let snapshot = store.load(session_id)?;
        let machine = SessionMachine::restore(recipe, snapshot, clock.clone())?;
        info!(session_id, status = machine.status().as_str(), "resumed cooking session");
        Ok(Self::spawn(machine, store, clock, config))
    }

    fn spawn(
        machine: SessionMachine,
        store: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        let session_id = machine.session_id().to_string();
        let (requests, inbox) = mpsc::channel(config.facade.command_queue_depth.max(1));
        let (state_tx, state) = watch::channel(machine.session());
        let (tick_tx, ticks) = watch::channel(machine.remaining_seconds());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let actor = Actor {
            machine,
            store: store.clone(),
            clock,
            inbox,
            tick_source: requests.downgrade(),
            tick_interval: config.timer.tick_interval(),
            ticker: None,
            suspended: false,
            state: state_tx,
            ticks: tick_tx,
            events: events.clone(),
        };
        tokio::spawn(actor.run());

        Self {
            session_id,
            requests,
            state,
            ticks,
            events,
            store,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Latest published snapshot.
    pub fn current(&self) -> CookingSession {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CookingSession> {
        self.state.clone()
    }

    /// Remaining seconds on the current step's timer; `None` when no timer
    /// is set. Only changes are published.
    pub fn subscribe_ticks(&self) -> watch::Receiver<Option<u64>> {
        self.ticks.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Apply a command. Resolves once the resulting snapshot is stored
    /// locally.
    pub async fn submit(&self, command: Command) -> Result<CookingSession> {
        self.request(|reply| Request::Command { command, reply })
            .await?
    }

    pub async fn start(&self) -> Result<CookingSession> {
        self.submit(Command::Start).await
    }

    pub async fn confirm_step(&self) -> Result<CookingSession> {
        self.submit(Command::ConfirmStep).await
    }

    pub async fn pause(&self) -> Result<CookingSession> {
        self.submit(Command::PauseSession).await
    }

    pub async fn resume(&self) -> Result<CookingSession> {
        self.submit(Command::ResumeSession).await
    }

    pub async fn abandon(&self) -> Result<CookingSession> {
        self.submit(Command::AbandonSession).await
    }

    pub async fn go_to_step(&self, index: usize) -> Result<CookingSession> {
        self.submit(Command::GoToStep { index }).await
    }

    pub async fn start_step_timer(&self) -> Result<CookingSession> {
        self.submit(Command::StartStepTimer).await
    }

    // ── Sync ─────────────────────────────────────────────────────────

    /// Reconcile this session with the remote. Runs inside the actor, in
    /// line with commands. A newer remote snapshot is only stored if it fits
    /// this session's recipe, then replaces the in-memory session and is
    /// published on every stream. A finished session is never replaced.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        self.request(|reply| Request::Reconcile { reply }).await?
    }

    /// Connectivity signal from the host. Going online flushes the other
    /// queued pushes and then reconciles this session.
    pub async fn connectivity_changed(&self, online: bool) -> Result<Option<ReconcileOutcome>> {
        self.store.set_online(online);
        if !online {
            return Ok(None);
        }
        for (session_id, outcome) in self.store.flush_pending(Some(&self.session_id)).await? {
            debug!(%session_id, ?outcome, "flushed pending push");
        }
        self.reconcile().await.map(Some)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// The app is going to the background: stop tick scheduling. Timer
    /// state is kept as wall-clock data, so nothing is lost.
    pub async fn suspend(&self) -> Result<()> {
        self.request(|reply| Request::Suspend { reply }).await
    }

    /// Back in the foreground: observe the clock immediately (so time spent
    /// suspended is subtracted) and restart tick scheduling.
    pub async fn resume_foreground(&self) -> Result<()> {
        self.request(|reply| Request::ResumeForeground { reply })
            .await
    }

    /// Stop the actor. Later calls on any clone fail with `ChannelClosed`.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Request::Shutdown { reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(build(reply))
            .await
            .map_err(|_| CoreError::ChannelClosed)?;
        response.await.map_err(|_| CoreError::ChannelClosed)
    }
}

impl std::fmt::Debug for SessionFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFacade")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

struct Actor {
    machine: SessionMachine,
    store: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
    inbox: mpsc::Receiver<Request>,
    tick_source: mpsc::WeakSender<Request>,
    tick_interval: Duration,
    ticker: Option<JoinHandle<()>>,
    suspended: bool,
    state: watch::Sender<CookingSession>,
    ticks: watch::Sender<Option<u64>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Actor {
    async fn run(mut self) {
        self.settle();
        while let Some(request) = self.inbox.recv().await {
            match request {
                Request::Command { command, reply } => {
                    let result = self.on_command(command);
                    self.settle();
                    let _ = reply.send(result);
                }
                Request::Tick => {
                    self.on_tick();
                    self.settle();
                }
                Request::Reconcile { reply } => {
                    let result = self.on_reconcile().await;
                    self.settle();
                    let _ = reply.send(result);
                }
                Request::Suspend { reply } => {
                    self.suspended = true;
                    self.settle();
                    debug!(session_id = %self.machine.session_id(), "tick scheduling suspended");
                    let _ = reply.send(());
                }
                Request::ResumeForeground { reply } => {
                    self.suspended = false;
                    self.on_tick();
                    self.settle();
                    debug!(session_id = %self.machine.session_id(), "tick scheduling resumed");
                    let _ = reply.send(());
                }
                Request::Shutdown { reply } => {
                    self.stop_ticker();
                    let _ = reply.send(());
                    break;
                }
            }
        }
        self.stop_ticker();
        debug!(session_id = %self.machine.session_id(), "session actor stopped");
    }

    /// Bring the tick stream and tick source in line with the machine.
    /// Runs before any reply so callers observe a settled state.
    fn settle(&mut self) {
        self.publish_remaining();
        self.sync_ticker();
    }

    fn on_command(&mut self, command: Command) -> Result<CookingSession> {
        // Observe expiry first so a pending TimerExpired precedes the
        // command's own events.
        self.on_tick();

        let before = self.machine.clone();
        let transition = self.machine.apply(command)?;
        if let Err(err) = self.store.save(&transition.session) {
            warn!(
                session_id = %self.machine.session_id(),
                command = command.name(),
                error = %err,
                "failed to persist transition; rolled back"
            );
            self.machine = before;
            return Err(err);
        }

        self.state.send_replace(transition.session.clone());
        for event in transition.events {
            self.emit(event);
        }
        Ok(transition.session)
    }

    fn on_tick(&mut self) {
        if let Some(TickUpdate::Expired(event)) = self.machine.tick() {
            self.state.send_replace(self.machine.session());
            self.emit(event);
        }
    }

    async fn on_reconcile(&mut self) -> Result<ReconcileOutcome> {
        let store = self.store.clone();
        let machine = &self.machine;
        let outcome = store
            .reconcile_checked(machine.session_id(), |snapshot| machine.check_refresh(snapshot))
            .await?;
        match &outcome {
            ReconcileOutcome::Pulled(snapshot) => self.on_refresh(snapshot.clone()),
            ReconcileOutcome::Pushed { sync_version } if *sync_version > self.machine.sync_version() => {
                self.machine.adopt_version(*sync_version);
                self.state.send_replace(self.machine.session());
            }
            _ => {}
        }
        Ok(outcome)
    }

    fn on_refresh(&mut self, snapshot: CookingSession) {
        if self.machine.is_terminal() || snapshot.sync_version <= self.machine.sync_version() {
            return;
        }
        let sync_version = snapshot.sync_version;
        if let Err(err) = self.machine.replace_snapshot(snapshot) {
            warn!(session_id = %self.machine.session_id(), error = %err, "ignored remote snapshot");
            return;
        }
        info!(session_id = %self.machine.session_id(), sync_version, "applied remote snapshot");
        self.state.send_replace(self.machine.session());
        self.emit(SessionEvent::RemoteRefresh {
            session_id: self.machine.session_id().to_string(),
            sync_version,
            at: self.clock.now_utc(),
        });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish_remaining(&self) {
        let remaining = self.machine.remaining_seconds();
        self.ticks.send_if_modified(|current| {
            if *current == remaining {
                false
            } else {
                *current = remaining;
                true
            }
        });
    }

    fn sync_ticker(&mut self) {
        let wanted = !self.suspended && self.machine.needs_ticks();
        match (wanted, self.ticker.is_some()) {
            (true, false) => {
                self.ticker = Some(spawn_ticker(self.tick_source.clone(), self.tick_interval));
            }
            (false, true) => self.stop_ticker(),
            _ => {}
        }
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

/// Enqueue a `Tick` every `period`. A full queue drops the tick; the next
/// one recomputes from the clock anyway.
fn spawn_ticker(source: mpsc::WeakSender<Request>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let Some(requests) = source.upgrade() else {
                break;
            };
            match requests.try_send(Request::Tick) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Closed(_)) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::SessionStatus;
    use crate::storage::SessionDb;
    use crate::sync::MemoryRemoteStore;
    use crate::timer::TimerState;

    fn recipe() -> Recipe {
        Recipe::from_instructions(
            "omelette",
            [
                ("Whisk eggs", None),
                ("Cook", Some(90)),
                ("Fold and serve", None),
            ],
        )
        .unwrap()
    }

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.timer.tick_interval_ms = 100;
        config
    }

    async fn facade(clock: &ManualClock) -> SessionFacade {
        let store = Arc::new(SessionStore::new(SessionDb::open_memory().unwrap()));
        SessionFacade::create(recipe(), store, Arc::new(clock.clone()), &config())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_persists_initial_snapshot() {
        let clock = ManualClock::new(0);
        let facade = facade(&clock).await;
        let stored = facade.store().load(facade.session_id()).unwrap();
        assert_eq!(stored.status, SessionStatus::NotStarted);
        assert_eq!(stored.sync_version, 0);
        assert_eq!(facade.current(), stored);
    }

    #[tokio::test]
    async fn commands_are_acknowledged_after_save() {
        let clock = ManualClock::new(0);
        let facade = facade(&clock).await;
        facade.start().await.unwrap();
        let session = facade.confirm_step().await.unwrap();

        assert_eq!(session.current_step_index, 1);
        assert_eq!(session.sync_version, 2);
        assert_eq!(facade.store().load(facade.session_id()).unwrap(), session);
        assert_eq!(facade.current(), session);
    }

    #[tokio::test]
    async fn rejected_command_leaves_state_untouched() {
        let clock = ManualClock::new(0);
        let facade = facade(&clock).await;
        let before = facade.current();
        assert!(matches!(
            facade.pause().await,
            Err(CoreError::InvalidState { .. })
        ));
        assert_eq!(facade.current(), before);
    }

    #[tokio::test]
    async fn failed_save_rolls_back() {
        let clock = ManualClock::new(0);
        let facade = facade(&clock).await;
        let mut newer = facade.current();
        newer.sync_version = 10;
        facade.store().save(&newer).unwrap();

        assert!(matches!(
            facade.start().await,
            Err(CoreError::VersionConflict { attempted: 1, stored: 10, .. })
        ));
        assert_eq!(facade.current().status, SessionStatus::NotStarted);
        assert_eq!(facade.current().sync_version, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_drives_expiry_without_versioning() {
        let clock = ManualClock::new(0);
        let facade = facade(&clock).await;
        let mut events = facade.subscribe_events();
        let mut state = facade.subscribe_state();
        facade.start().await.unwrap();
        facade.confirm_step().await.unwrap();
        assert_eq!(*facade.subscribe_ticks().borrow(), Some(90));

        clock.advance(Duration::from_secs(90));
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| s.timer == TimerState::Expired),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(facade.current().sync_version, 2);
        assert_eq!(*facade.subscribe_ticks().borrow(), Some(0));
        let mut expired = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::TimerExpired { step_index: 1, .. }) {
                expired += 1;
            }
        }
        assert_eq!(expired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn suspend_keeps_remaining_time() {
        let clock = ManualClock::new(0);
        let facade = facade(&clock).await;
        facade.start().await.unwrap();
        facade.confirm_step().await.unwrap();
        facade.suspend().await.unwrap();

        clock.advance(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(*facade.subscribe_ticks().borrow(), Some(90));

        facade.resume_foreground().await.unwrap();
        assert_eq!(*facade.subscribe_ticks().borrow(), Some(60));
    }

    #[tokio::test]
    async fn reconcile_applies_newer_remote_snapshot() {
        let clock = ManualClock::new(0);
        let (store, remote) = remote_backed();
        let facade = SessionFacade::create(recipe(), store, Arc::new(clock.clone()), &config())
            .await
            .unwrap();
        let mut events = facade.subscribe_events();

        let mut elsewhere = facade.current();
        elsewhere.status = SessionStatus::InProgress;
        elsewhere.current_step_index = 2;
        elsewhere.sync_version = 5;
        remote.insert(elsewhere.clone()).await;

        assert_eq!(
            facade.reconcile().await.unwrap(),
            ReconcileOutcome::Pulled(elsewhere.clone())
        );
        assert_eq!(facade.current(), elsewhere);
        assert!(matches!(
            events.try_recv(),
            Ok(SessionEvent::RemoteRefresh { sync_version: 5, .. })
        ));

        // Commands continue from the refreshed version.
        let session = facade.confirm_step().await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.sync_version, 6);
    }

    fn remote_backed() -> (Arc<SessionStore>, Arc<MemoryRemoteStore>) {
        let remote = Arc::new(MemoryRemoteStore::new());
        let store = Arc::new(SessionStore::with_remote(
            SessionDb::open_memory().unwrap(),
            remote.clone(),
        ));
        (store, remote)
    }

    #[tokio::test]
    async fn abandoned_session_is_not_revived_by_remote() {
        let clock = ManualClock::new(0);
        let (store, remote) = remote_backed();
        let facade = SessionFacade::create(recipe(), store, Arc::new(clock.clone()), &config())
            .await
            .unwrap();
        facade.start().await.unwrap();
        let mut elsewhere = facade.current();
        facade.abandon().await.unwrap();

        elsewhere.current_step_index = 1;
        elsewhere.sync_version = 3;
        remote.insert(elsewhere).await;

        assert_eq!(
            facade.reconcile().await.unwrap(),
            ReconcileOutcome::Pushed { sync_version: 4 }
        );
        assert_eq!(facade.current().status, SessionStatus::Abandoned);
        assert_eq!(facade.current().sync_version, 4);
        assert_eq!(
            remote.snapshot(facade.session_id()).await.unwrap().status,
            SessionStatus::Abandoned
        );
        assert_eq!(
            facade.store().load(facade.session_id()).unwrap().status,
            SessionStatus::Abandoned
        );
        assert!(matches!(
            facade.confirm_step().await,
            Err(CoreError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn unusable_remote_snapshot_keeps_session_writable() {
        let clock = ManualClock::new(0);
        let (store, remote) = remote_backed();
        let facade = SessionFacade::create(recipe(), store, Arc::new(clock.clone()), &config())
            .await
            .unwrap();

        let mut broken = facade.current();
        broken.status = SessionStatus::InProgress;
        broken.current_step_index = 9;
        broken.sync_version = 5;
        remote.insert(broken).await;

        assert_eq!(facade.reconcile().await.unwrap(), ReconcileOutcome::Offline);
        assert_eq!(facade.current().sync_version, 0);
        assert_eq!(facade.store().load(facade.session_id()).unwrap().sync_version, 0);
        assert_eq!(facade.store().status().unwrap().pending_count, 1);

        let session = facade.start().await.unwrap();
        assert_eq!(session.sync_version, 1);
        assert_eq!(facade.store().load(facade.session_id()).unwrap(), session);
    }

    #[tokio::test]
    async fn resume_skips_remote_snapshot_for_another_recipe() {
        let clock = ManualClock::new(0);
        let (store, remote) = remote_backed();
        let facade = SessionFacade::create(recipe(), store.clone(), Arc::new(clock.clone()), &config())
            .await
            .unwrap();
        let session_id = facade.session_id().to_string();
        facade.shutdown().await.unwrap();

        let mut foreign = facade.current();
        foreign.recipe_id = "pancakes".into();
        foreign.sync_version = 4;
        remote.insert(foreign).await;

        let resumed =
            SessionFacade::resume_session(recipe(), &session_id, store, Arc::new(clock), &config())
                .await
                .unwrap();
        assert_eq!(resumed.current().recipe_id, "omelette");
        assert_eq!(resumed.current().sync_version, 0);
    }

    #[tokio::test]
    async fn shutdown_closes_every_clone() {
        let clock = ManualClock::new(0);
        let facade = facade(&clock).await;
        let other = facade.clone();
        facade.shutdown().await.unwrap();
        assert!(matches!(other.start().await, Err(CoreError::ChannelClosed)));
    }
}
