//! The sync client: wires a session to the subscription, progress and
//! client reset components of one database.

use crate::client_reset::{ClientResetCoordinator, ClientResetState};
use crate::config::{ErrorHandler, SyncConfig};
use crate::error::{guarded, SyncError, SyncResult};
use crate::progress::{ProgressMode, ProgressStream, ProgressTracker};
use crate::session::SyncSessionFacade;
use crate::subscription::SubscriptionSetManager;
use flexsync_core::{Database, Object, Query};
use flexsync_sync_protocol::{ProgressDirection, SessionEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// When [`SyncClient::subscribe`] waits for the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WaitForSync {
    /// Wait only when the subscription is new.
    #[default]
    FirstTime,
    /// Always wait; an existing subscription waits for all server changes.
    Always,
    /// Never wait.
    Never,
}

/// Options for [`SyncClient::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Subscription name. Anonymous when `None`.
    pub name: Option<String>,
    /// Replace the query of an existing subscription with the same name.
    pub update_existing: bool,
    /// When to wait for the server.
    pub mode: WaitForSync,
    /// Bound on the whole call.
    pub timeout: Duration,
}

impl SubscribeOptions {
    /// Anonymous subscription, waiting the first time, without a timeout.
    pub fn new() -> Self {
        Self {
            name: None,
            update_existing: false,
            mode: WaitForSync::FirstTime,
            timeout: Duration::MAX,
        }
    }

    /// Names the subscription.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replaces the query of an existing subscription with the same name.
    #[must_use]
    pub fn with_update_existing(mut self, update: bool) -> Self {
        self.update_existing = update;
        self
    }

    /// Sets when to wait for the server.
    #[must_use]
    pub fn with_mode(mut self, mode: WaitForSync) -> Self {
        self.mode = mode;
        self
    }

    /// Bounds the call.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes session events to the component that owns them.
struct EventRouter {
    session: Arc<dyn SyncSessionFacade>,
    subscriptions: Option<Arc<SubscriptionSetManager>>,
    progress: ProgressTracker,
    client_reset: ClientResetCoordinator,
    error_handler: ErrorHandler,
}

impl EventRouter {
    async fn route(&self, event: SessionEvent) {
        match event {
            SessionEvent::Progress(report) => self.progress.on_report(&report),
            SessionEvent::SubscriptionStateChanged(ack) => match &self.subscriptions {
                Some(subscriptions) => subscriptions.on_server_state(ack.version, &ack.state),
                None => warn!(version = ack.version, "subscription ack on a partition-based session"),
            },
            SessionEvent::Error(protocol_error) => {
                if protocol_error.is_client_reset_requested() {
                    self.client_reset.handle(protocol_error.clone()).await;
                } else {
                    warn!(error = %protocol_error, "sync session error");
                }
                let session = self.session.as_ref();
                let handler = &self.error_handler;
                if let Err(err) = guarded(|| {
                    handler(session, &protocol_error);
                    Ok(())
                }) {
                    error!(reason = %err, "sync error handler failed");
                }
            }
            SessionEvent::ConnectionStateChanged(state) => {
                debug!(?state, "connection state changed");
            }
        }
    }
}

/// A synced database.
///
/// Opening a client registers an event channel with the session and spawns
/// a task that routes session events until the client is closed or dropped.
pub struct SyncClient {
    db: Arc<Database>,
    session: Arc<dyn SyncSessionFacade>,
    router: Arc<EventRouter>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl SyncClient {
    /// Opens a client for `db` on `session`.
    ///
    /// Applies the configured initial subscriptions and waits for initial
    /// remote data before returning. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - `IllegalArgument` for an invalid configuration
    /// - Errors from the initial subscriptions block
    /// - [`SyncError::InitialDownloadTimedOut`] if initial data did not
    ///   arrive in time
    pub async fn open(
        db: Arc<Database>,
        session: Arc<dyn SyncSessionFacade>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        config.validate()?;
        let flexible = config.is_flexible();
        let write_gate = Arc::new(tokio::sync::Mutex::new(()));

        let subscriptions = if flexible {
            Some(Arc::new(SubscriptionSetManager::open(
                Arc::clone(&db),
                Arc::clone(&write_gate),
            )?))
        } else {
            None
        };
        let client_reset = ClientResetCoordinator::new(
            Arc::clone(&db),
            Arc::clone(&session),
            subscriptions.clone(),
            config.client_reset_strategy.clone(),
            write_gate,
        );
        let router = Arc::new(EventRouter {
            session: Arc::clone(&session),
            subscriptions,
            progress: ProgressTracker::new(flexible),
            client_reset,
            error_handler: Arc::clone(&config.error_handler),
        });

        let (sink, mut events) = mpsc::unbounded_channel();
        session.register_event_sink(sink);
        let dispatcher = {
            let router = Arc::clone(&router);
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    router.route(event).await;
                }
                debug!("session event channel closed");
            })
        };

        let client = Self {
            db,
            session,
            router,
            dispatcher: Mutex::new(Some(dispatcher)),
        };
        info!(
            location = client.db.location(),
            mode = ?config.mode,
            strategy = config.client_reset_strategy.name(),
            "opened sync client"
        );

        client.apply_initial_configuration(&config).await?;
        Ok(client)
    }

    async fn apply_initial_configuration(&self, config: &SyncConfig) -> SyncResult<()> {
        if let (Some(initial), Some(subscriptions)) =
            (&config.initial_subscriptions, &self.router.subscriptions)
        {
            if subscriptions.current().version() == 0 || initial.rerun_on_open() {
                let callback = Arc::clone(initial.callback());
                let set = subscriptions.update(move |mutable| callback(mutable)).await?;
                debug!(version = set.version(), "applied initial subscriptions");
            }
        }

        if let Some(initial) = config.initial_remote_data {
            let after = initial.timeout;
            let downloaded = match &self.router.subscriptions {
                Some(subscriptions) => match subscriptions.wait_for_synchronization(after).await {
                    Ok(_) => true,
                    Err(SyncError::Timeout { .. }) => false,
                    Err(err) => return Err(err),
                },
                None => self.session.download_all_server_changes(after).await?,
            };
            if !downloaded {
                return Err(SyncError::InitialDownloadTimedOut { after });
            }
        }
        Ok(())
    }

    /// Routes one session event.
    ///
    /// The dispatch task calls this for every event the session sends; it
    /// is public for transports that deliver events themselves.
    pub async fn dispatch(&self, event: SessionEvent) {
        self.router.route(event).await;
    }

    /// Decodes a CBOR event frame and routes it.
    ///
    /// # Errors
    ///
    /// `Codec` if the frame does not decode.
    pub async fn dispatch_frame(&self, frame: &[u8]) -> SyncResult<()> {
        let event = SessionEvent::decode(frame)?;
        self.dispatch(event).await;
        Ok(())
    }

    /// The subscription set manager.
    ///
    /// # Errors
    ///
    /// `IllegalState` on partition-based sessions.
    pub fn subscriptions(&self) -> SyncResult<&SubscriptionSetManager> {
        self.router.subscriptions.as_deref().ok_or_else(|| {
            SyncError::IllegalState(
                "Subscriptions are only available on Realms configured for Flexible Sync.".into(),
            )
        })
    }

    /// Opens a progress stream.
    ///
    /// # Errors
    ///
    /// `UnsupportedOperation` on flexible sync sessions.
    pub fn progress(&self, direction: ProgressDirection, mode: ProgressMode) -> SyncResult<ProgressStream> {
        self.router.progress.progress(direction, mode)
    }

    /// The current client reset state.
    #[must_use]
    pub fn client_reset_state(&self) -> ClientResetState {
        self.router.client_reset.state()
    }

    /// Observes client reset state changes.
    #[must_use]
    pub fn client_reset_state_changes(&self) -> watch::Receiver<ClientResetState> {
        self.router.client_reset.state_changes()
    }

    /// The session.
    #[must_use]
    pub fn session(&self) -> &dyn SyncSessionFacade {
        self.session.as_ref()
    }

    /// The database.
    #[must_use]
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Subscribes to `query` and returns its results.
    ///
    /// Adds the subscription when it does not exist yet, or replaces it
    /// when `update_existing` is set. Then waits according to
    /// `options.mode`. The results are read from the latest snapshot.
    ///
    /// # Errors
    ///
    /// - `IllegalState` inside a write transaction or on partition-based
    ///   sessions
    /// - [`SyncError::Timeout`] when `options.timeout` elapses first
    /// - [`SyncError::BadFlexibleSyncQuery`] if the server rejects the set
    pub async fn subscribe(&self, query: &Query, options: SubscribeOptions) -> SyncResult<Vec<Object>> {
        let subscriptions = self.subscriptions()?;
        if self.db.is_write_held_by_current_thread() {
            return Err(SyncError::IllegalState(
                "Calling `subscribe()` inside a write transaction is not allowed.".into(),
            ));
        }

        let timeout = options.timeout;
        let work = async {
            let current = subscriptions.current();
            let existing = match &options.name {
                Some(name) => current.find_by_name(name).is_some(),
                None => current.find_by_query(query).is_some(),
            };
            if !existing || options.update_existing {
                subscriptions
                    .update(|set| {
                        match &options.name {
                            Some(name) => set.add_named(name, query, options.update_existing)?,
                            None => set.add(query)?,
                        };
                        Ok(())
                    })
                    .await?;
            }

            match options.mode {
                WaitForSync::FirstTime | WaitForSync::Always if !existing => {
                    subscriptions.wait_for_synchronization(timeout).await?;
                }
                WaitForSync::Always => {
                    if !self.session.download_all_server_changes(timeout).await? {
                        return Err(SyncError::Timeout { after: timeout });
                    }
                }
                _ => {}
            }
            Ok(self.db.snapshot().query(query))
        };

        tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| SyncError::Timeout { after: timeout })?
    }

    /// Stops routing session events, ends open progress streams and closes
    /// the database.
    ///
    /// # Errors
    ///
    /// Storage errors from closing the database.
    pub fn close(&self) -> SyncResult<()> {
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.abort();
        }
        self.router.progress.close();
        self.db.close()?;
        info!(location = self.db.location(), "closed sync client");
        Ok(())
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.get_mut().take() {
            dispatcher.abort();
        }
        self.router.progress.close();
    }
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("location", &self.db.location())
            .field("subscriptions", &self.router.subscriptions)
            .field("progress", &self.router.progress)
            .field("client_reset", &self.router.client_reset)
            .finish_non_exhaustive()
    }
}
