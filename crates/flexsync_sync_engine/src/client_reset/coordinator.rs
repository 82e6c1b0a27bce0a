//! Runs client resets.

use crate::client_reset::required::ClientResetRequiredError;
use crate::client_reset::strategy::{AfterResetCallback, BeforeResetCallback, ClientResetStrategy, ResetErrorCallback};
use crate::error::{guarded, CallbackError, SyncError, SyncResult};
use crate::session::SyncSessionFacade;
use crate::subscription::SubscriptionSetManager;
use flexsync_core::{Database, ObjectSet, Snapshot};
use flexsync_sync_protocol::{ProtocolError, SyncErrorCode};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Progress of a client reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientResetState {
    /// No reset has happened.
    Idle,
    /// A reset was requested; the session is paused.
    Detected,
    /// `on_before_reset` is running.
    BeforeCallback,
    /// Local data is being replaced with the server's.
    Recovery,
    /// `on_after_reset` is running.
    AfterCallback,
    /// The reset finished and the session was resumed.
    Resumed,
    /// The reset was handed to an error or manual callback.
    ErrorReported,
}

impl ClientResetState {
    /// Returns true while a reset is running.
    #[must_use]
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            ClientResetState::Detected
                | ClientResetState::BeforeCallback
                | ClientResetState::Recovery
                | ClientResetState::AfterCallback
        )
    }

    fn can_move_to(self, next: ClientResetState) -> bool {
        use ClientResetState::*;
        match next {
            Detected => !self.is_in_progress(),
            BeforeCallback => self == Detected,
            Recovery => self == BeforeCallback,
            AfterCallback => self == Recovery,
            Resumed => self == AfterCallback,
            ErrorReported => self.is_in_progress(),
            Idle => false,
        }
    }
}

/// Drives client resets for one database, one at a time.
///
/// A reset holds the engine's write gate while it replaces local data, so it
/// never interleaves with a subscription update.
pub struct ClientResetCoordinator {
    db: Arc<Database>,
    session: Arc<dyn SyncSessionFacade>,
    subscriptions: Option<Arc<SubscriptionSetManager>>,
    strategy: ClientResetStrategy,
    write_gate: Arc<tokio::sync::Mutex<()>>,
    state: watch::Sender<ClientResetState>,
}

impl ClientResetCoordinator {
    /// Creates an idle coordinator.
    pub fn new(
        db: Arc<Database>,
        session: Arc<dyn SyncSessionFacade>,
        subscriptions: Option<Arc<SubscriptionSetManager>>,
        strategy: ClientResetStrategy,
        write_gate: Arc<tokio::sync::Mutex<()>>,
    ) -> Self {
        let (state, _) = watch::channel(ClientResetState::Idle);
        Self {
            db,
            session,
            subscriptions,
            strategy,
            write_gate,
            state,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ClientResetState {
        *self.state.borrow()
    }

    /// Observes state changes.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ClientResetState> {
        self.state.subscribe()
    }

    /// Returns the configured strategy.
    #[must_use]
    pub fn strategy(&self) -> &ClientResetStrategy {
        &self.strategy
    }

    /// Runs a reset for `error`.
    ///
    /// User callback failures, panics included, are routed to the strategy's
    /// error callback and never returned. A reset requested while another is
    /// running is ignored.
    pub async fn handle(&self, error: ProtocolError) {
        if let Err(err) = self.transition(ClientResetState::Detected) {
            warn!(%error, reason = %err, "client reset already in progress, ignoring");
            return;
        }
        info!(
            location = self.db.location(),
            code = error.code,
            strategy = self.strategy.name(),
            "client reset requested"
        );
        self.session.pause();
        let reset = ClientResetRequiredError::new(&self.db, error);

        match &self.strategy {
            ClientResetStrategy::ManuallyRecoverUnsyncedChanges { on_client_reset } => {
                self.report(on_client_reset, reset);
            }
            ClientResetStrategy::DiscardUnsyncedChanges { on_error, .. }
                if reset.error().known_code() == Some(SyncErrorCode::AutoClientResetFailure) =>
            {
                self.report(on_error, reset);
            }
            ClientResetStrategy::DiscardUnsyncedChanges {
                on_before_reset,
                on_after_reset,
                on_error,
            } => match self.discard_unsynced_changes(on_before_reset, on_after_reset).await {
                Ok(()) => {
                    info!(location = self.db.location(), "client reset finished");
                    self.session.resume();
                }
                Err(cause) => {
                    warn!(cause = %cause, "client reset aborted");
                    self.report(on_error, reset.with_cause(cause));
                }
            },
        }
    }

    async fn discard_unsynced_changes(
        &self,
        on_before_reset: &BeforeResetCallback,
        on_after_reset: &AfterResetCallback,
    ) -> Result<(), CallbackError> {
        self.transition(ClientResetState::BeforeCallback)?;
        let before = self.db.snapshot();
        guarded(|| on_before_reset(&before))?;

        self.transition(ClientResetState::Recovery)?;
        let _gate = self.write_gate.lock().await;
        let fresh = self.session.download_fresh_copy().await?;
        self.replace_local_data(&before, fresh, on_after_reset)?;

        if let Some(subscriptions) = &self.subscriptions {
            subscriptions.on_client_reset()?;
        }
        self.transition(ClientResetState::Resumed)?;
        Ok(())
    }

    /// Replaces local objects with `fresh` and runs `on_after_reset` in the
    /// same transaction. A failed callback rolls the whole transaction back.
    fn replace_local_data(
        &self,
        before: &Snapshot,
        fresh: ObjectSet,
        on_after_reset: &AfterResetCallback,
    ) -> Result<(), CallbackError> {
        let mut after = self.db.begin_write()?;
        after.replace_all(fresh)?;
        self.transition(ClientResetState::AfterCallback)?;

        match guarded(|| on_after_reset(before, &mut after)) {
            Ok(()) => {
                if after.is_active() {
                    let version = after.commit()?;
                    debug!(version, "committed client reset data");
                }
                Ok(())
            }
            Err(cause) => {
                if after.is_active() {
                    after.rollback()?;
                }
                Err(cause)
            }
        }
    }

    fn report(&self, callback: &ResetErrorCallback, reset: ClientResetRequiredError) {
        if let Err(err) = self.transition(ClientResetState::ErrorReported) {
            error!(reason = %err, "client reset state out of order");
        }
        let session = self.session.as_ref();
        if let Err(err) = guarded(|| {
            callback(session, reset);
            Ok(())
        }) {
            error!(reason = %err, "client reset error callback failed");
        }
    }

    fn transition(&self, next: ClientResetState) -> SyncResult<()> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|current| {
            if current.can_move_to(next) {
                debug!(from = ?*current, to = ?next, "client reset state");
                *current = next;
                true
            } else {
                outcome = Err(SyncError::InvalidStateTransition {
                    from: format!("{current:?}"),
                    to: format!("{next:?}"),
                });
                false
            }
        });
        outcome
    }
}

impl std::fmt::Debug for ClientResetCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientResetCoordinator")
            .field("strategy", &self.strategy)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MockSession;
    use flexsync_core::{Object, Schema};
    use parking_lot::Mutex;

    fn setup(strategy: ClientResetStrategy) -> (Arc<Database>, Arc<MockSession>, ClientResetCoordinator) {
        let db = Arc::new(Database::in_memory(Schema::new(["Item"])));
        db.write(|txn| txn.insert(Object::new("Item", "local")))
            .unwrap();
        let session = Arc::new(MockSession::new());
        session.set_server_objects([Object::new("Item", "server")].into_iter().collect());
        let coordinator = ClientResetCoordinator::new(
            Arc::clone(&db),
            session.clone(),
            None,
            strategy,
            Arc::new(tokio::sync::Mutex::new(())),
        );
        (db, session, coordinator)
    }

    fn diverged() -> ProtocolError {
        ProtocolError::new(SyncErrorCode::DivergingHistories, "history diverged")
    }

    #[test]
    fn transitions() {
        use ClientResetState::*;
        assert!(Idle.can_move_to(Detected));
        assert!(Resumed.can_move_to(Detected));
        assert!(!Recovery.can_move_to(Detected));
        assert!(Recovery.can_move_to(ErrorReported));
        assert!(!Idle.can_move_to(Recovery));
        assert!(!ErrorReported.can_move_to(ErrorReported));
    }

    #[tokio::test]
    async fn discard_replaces_local_data() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (before_calls, after_calls, error_calls) = (calls.clone(), calls.clone(), calls.clone());
        let strategy = ClientResetStrategy::discard_unsynced_changes(
            move |before| {
                assert!(before.get("Item", "local").is_some());
                before_calls.lock().push("before");
                Ok(())
            },
            move |before, after| {
                assert!(after.get("Item", "server").is_some());
                after.insert(before.get("Item", "local").cloned().unwrap())?;
                after_calls.lock().push("after");
                Ok(())
            },
            move |_, _| error_calls.lock().push("error"),
        );
        let (db, session, coordinator) = setup(strategy);

        coordinator.handle(diverged()).await;

        assert_eq!(*calls.lock(), vec!["before", "after"]);
        assert_eq!(coordinator.state(), ClientResetState::Resumed);
        let snapshot = db.snapshot();
        assert!(snapshot.get("Item", "server").is_some());
        assert!(snapshot.get("Item", "local").is_some());
        assert_eq!((session.pause_calls(), session.resume_calls()), (1, 1));
    }

    #[tokio::test]
    async fn after_callback_failure_rolls_back() {
        let reported = Arc::new(Mutex::new(None));
        let sink = reported.clone();
        let strategy = ClientResetStrategy::discard_unsynced_changes(
            |_| Ok(()),
            |_, after| {
                after.insert(Object::new("Item", "extra"))?;
                Err(CallbackError::new("user failure"))
            },
            move |_, reset| *sink.lock() = Some(reset),
        );
        let (db, session, coordinator) = setup(strategy);
        let version = db.version();

        coordinator.handle(diverged()).await;

        let reset = reported.lock().take().unwrap();
        assert_eq!(reset.error(), &diverged());
        assert_eq!(reset.cause().unwrap().message(), "user failure");
        assert_eq!(db.version(), version);
        assert!(db.snapshot().get("Item", "local").is_some());
        assert!(db.snapshot().get("Item", "server").is_none());
        assert_eq!(coordinator.state(), ClientResetState::ErrorReported);
        assert_eq!(session.resume_calls(), 0);
    }

    #[tokio::test]
    async fn panicking_before_callback_is_captured() {
        let after_ran = Arc::new(Mutex::new(false));
        let reported = Arc::new(Mutex::new(None));
        let (flag, sink) = (after_ran.clone(), reported.clone());
        let strategy = ClientResetStrategy::discard_unsynced_changes(
            |_| panic!("before exploded"),
            move |_, _| {
                *flag.lock() = true;
                Ok(())
            },
            move |_, reset: ClientResetRequiredError| *sink.lock() = Some(reset.message()),
        );
        let (_db, _session, coordinator) = setup(strategy);

        coordinator.handle(diverged()).await;

        assert!(!*after_ran.lock());
        assert_eq!(
            reported.lock().as_deref(),
            Some("[Session][DivergingHistories(211)] history diverged")
        );
    }

    #[tokio::test]
    async fn failed_download_reports_error() {
        let reported = Arc::new(Mutex::new(None));
        let sink = reported.clone();
        let strategy = ClientResetStrategy::discard_unsynced_changes(
            |_| Ok(()),
            |_, _| Ok(()),
            move |_, reset| *sink.lock() = reset.cause().cloned(),
        );
        let (db, session, coordinator) = setup(strategy);
        session.set_fresh_copy_fails(true);

        coordinator.handle(diverged()).await;

        assert!(reported.lock().is_some());
        assert!(db.snapshot().get("Item", "local").is_some());
        assert_eq!(coordinator.state(), ClientResetState::ErrorReported);
    }

    #[tokio::test]
    async fn automatic_recovery_failure_skips_callbacks() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (before_calls, error_calls) = (calls.clone(), calls.clone());
        let strategy = ClientResetStrategy::discard_unsynced_changes(
            move |_| {
                before_calls.lock().push("before");
                Ok(())
            },
            |_, _| Ok(()),
            move |_, _| error_calls.lock().push("error"),
        );
        let (_db, _session, coordinator) = setup(strategy);

        coordinator
            .handle(ProtocolError::new(
                SyncErrorCode::AutoClientResetFailure,
                "Automatic recovery from client reset failed.",
            ))
            .await;

        assert_eq!(*calls.lock(), vec!["error"]);
    }

    #[tokio::test]
    async fn second_reset_runs_after_first_finishes() {
        let (_db, session, coordinator) = setup(ClientResetStrategy::default());
        coordinator.handle(diverged()).await;
        coordinator.handle(diverged()).await;
        assert_eq!(coordinator.state(), ClientResetState::Resumed);
        assert_eq!(session.resume_calls(), 2);
    }
}
