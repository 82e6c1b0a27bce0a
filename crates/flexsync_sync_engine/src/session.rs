//! The sync session boundary.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use flexsync_core::ObjectSet;
use flexsync_sync_protocol::{
    AckState, ConnectionState, ErrorCategory, ProgressDirection, ProgressReport, ProtocolError,
    SessionEvent, SubscriptionAck, SyncErrorCode,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Not connected and not trying to.
    Inactive,
    /// Synchronizing.
    Active,
    /// Stopped by the client until `resume`.
    Paused,
    /// Shutting down.
    Dying,
    /// Waiting for a fresh access token.
    WaitingForAccessToken,
}

/// What the engine needs from a sync session.
///
/// The session delivers [`SessionEvent`]s to the sink registered with
/// [`register_event_sink`](Self::register_event_sink); everything else is a
/// command.
#[async_trait]
pub trait SyncSessionFacade: Send + Sync {
    /// Returns the session state.
    fn state(&self) -> SessionState;

    /// Returns the network connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Stops synchronizing until [`resume`](Self::resume).
    fn pause(&self);

    /// Resumes synchronizing.
    fn resume(&self);

    /// Waits until every local change is uploaded. Returns false on timeout.
    async fn upload_all_local_changes(&self, timeout: Duration) -> SyncResult<bool>;

    /// Waits until every server change is downloaded. Returns false on
    /// timeout.
    async fn download_all_server_changes(&self, timeout: Duration) -> SyncResult<bool>;

    /// Fetches the server's current data, used to rebuild the local database
    /// during a client reset.
    async fn download_fresh_copy(&self) -> SyncResult<ObjectSet>;

    /// Registers the channel events are delivered to. Replaces any earlier
    /// sink.
    fn register_event_sink(&self, sink: mpsc::UnboundedSender<SessionEvent>);

    /// Delivers a protocol error as if the server had sent it.
    fn simulate_error(&self, code: i32, category: ErrorCategory);
}

/// Message attached to simulated errors.
fn simulated_message(category: ErrorCategory, code: i32) -> &'static str {
    match SyncErrorCode::from_code(category, code) {
        Some(SyncErrorCode::AutoClientResetFailure) => {
            "Automatic recovery from client reset failed."
        }
        _ => "Simulated session error",
    }
}

/// An in-process session for tests and demos.
///
/// Events are pushed by hand through [`emit`](Self::emit) and its helpers.
#[derive(Debug)]
pub struct MockSession {
    state: Mutex<SessionState>,
    connection: Mutex<ConnectionState>,
    sink: Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
    server_objects: Mutex<ObjectSet>,
    transfers_succeed: AtomicBool,
    fresh_copy_fails: AtomicBool,
    pause_calls: AtomicUsize,
    resume_calls: AtomicUsize,
}

impl MockSession {
    /// Creates an active, connected session with no server data.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Active),
            connection: Mutex::new(ConnectionState::Connected),
            sink: Mutex::new(None),
            server_objects: Mutex::new(ObjectSet::new()),
            transfers_succeed: AtomicBool::new(true),
            fresh_copy_fails: AtomicBool::new(false),
            pause_calls: AtomicUsize::new(0),
            resume_calls: AtomicUsize::new(0),
        }
    }

    /// Delivers an event. Returns false if no sink is registered.
    pub fn emit(&self, event: SessionEvent) -> bool {
        match self.sink.lock().as_ref() {
            Some(sink) => sink.send(event).is_ok(),
            None => false,
        }
    }

    /// Delivers a progress report.
    pub fn report_progress(&self, direction: ProgressDirection, transferred: u64, transferable: u64) -> bool {
        self.emit(SessionEvent::Progress(ProgressReport {
            direction,
            transferred,
            transferable,
        }))
    }

    /// Delivers a subscription acknowledgement.
    pub fn acknowledge_subscriptions(&self, version: i64, state: AckState) -> bool {
        self.emit(SessionEvent::SubscriptionStateChanged(SubscriptionAck {
            version,
            state,
        }))
    }

    /// Sets the data returned by `download_fresh_copy`.
    pub fn set_server_objects(&self, objects: ObjectSet) {
        *self.server_objects.lock() = objects;
    }

    /// When false, upload and download waits time out.
    pub fn set_transfers_succeed(&self, succeed: bool) {
        self.transfers_succeed.store(succeed, Ordering::SeqCst);
    }

    /// When true, `download_fresh_copy` fails.
    pub fn set_fresh_copy_fails(&self, fails: bool) {
        self.fresh_copy_fails.store(fails, Ordering::SeqCst);
    }

    /// Sets the connection state and reports the change.
    pub fn set_connection_state(&self, state: ConnectionState) {
        *self.connection.lock() = state;
        self.emit(SessionEvent::ConnectionStateChanged(state));
    }

    /// Number of `pause` calls so far.
    pub fn pause_calls(&self) -> usize {
        self.pause_calls.load(Ordering::SeqCst)
    }

    /// Number of `resume` calls so far.
    pub fn resume_calls(&self) -> usize {
        self.resume_calls.load(Ordering::SeqCst)
    }

    async fn wait_for_transfer(&self, timeout: Duration) -> SyncResult<bool> {
        if timeout.is_zero() {
            return Err(SyncError::IllegalArgument(format!(
                "'timeout' must be > 0. It was: {timeout:?}"
            )));
        }
        if self.transfers_succeed.load(Ordering::SeqCst) {
            return Ok(true);
        }
        tokio::time::sleep(timeout).await;
        Ok(false)
    }
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncSessionFacade for MockSession {
    fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn connection_state(&self) -> ConnectionState {
        *self.connection.lock()
    }

    fn pause(&self) {
        self.pause_calls.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = SessionState::Paused;
    }

    fn resume(&self) {
        self.resume_calls.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = SessionState::Active;
    }

    async fn upload_all_local_changes(&self, timeout: Duration) -> SyncResult<bool> {
        self.wait_for_transfer(timeout).await
    }

    async fn download_all_server_changes(&self, timeout: Duration) -> SyncResult<bool> {
        self.wait_for_transfer(timeout).await
    }

    async fn download_fresh_copy(&self) -> SyncResult<ObjectSet> {
        if self.fresh_copy_fails.load(Ordering::SeqCst) {
            return Err(SyncError::Protocol(ProtocolError::new(
                SyncErrorCode::ConnectionClosed,
                "connection closed while downloading a fresh copy",
            )));
        }
        Ok(self.server_objects.lock().clone())
    }

    fn register_event_sink(&self, sink: mpsc::UnboundedSender<SessionEvent>) {
        *self.sink.lock() = Some(sink);
    }

    fn simulate_error(&self, code: i32, category: ErrorCategory) {
        let error = ProtocolError::raw(category, code, simulated_message(category, code));
        self.emit(SessionEvent::Error(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flexsync_core::Object;

    #[test]
    fn emit_needs_a_sink() {
        let session = MockSession::new();
        assert!(!session.acknowledge_subscriptions(1, AckState::Complete));

        let (sink, mut events) = mpsc::unbounded_channel();
        session.register_event_sink(sink);
        assert!(session.report_progress(ProgressDirection::Upload, 1, 2));
        assert!(matches!(
            events.try_recv(),
            Ok(SessionEvent::Progress(ProgressReport { transferred: 1, .. }))
        ));
    }

    #[test]
    fn simulated_client_reset_failure() {
        let session = MockSession::new();
        let (sink, mut events) = mpsc::unbounded_channel();
        session.register_event_sink(sink);

        session.simulate_error(
            SyncErrorCode::AutoClientResetFailure.code(),
            ErrorCategory::Client,
        );
        match events.try_recv() {
            Ok(SessionEvent::Error(error)) => {
                assert!(error.is_client_reset_requested());
                assert_eq!(
                    error.to_string(),
                    "[Client][AutoClientResetFailure(132)] Automatic recovery from client reset failed."
                );
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn pause_and_resume() {
        let session = MockSession::new();
        session.pause();
        assert_eq!(session.state(), SessionState::Paused);
        session.resume();
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!((session.pause_calls(), session.resume_calls()), (1, 1));
    }

    #[tokio::test]
    async fn transfers() {
        let session = MockSession::new();
        assert!(session
            .upload_all_local_changes(Duration::from_secs(1))
            .await
            .unwrap());

        session.set_transfers_succeed(false);
        assert!(!session
            .download_all_server_changes(Duration::from_millis(10))
            .await
            .unwrap());
        assert!(session
            .download_all_server_changes(Duration::ZERO)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn fresh_copy() {
        let session = MockSession::new();
        session.set_server_objects([Object::new("Item", "1")].into_iter().collect());
        assert_eq!(session.download_fresh_copy().await.unwrap().len(), 1);

        session.set_fresh_copy_fails(true);
        assert!(matches!(
            session.download_fresh_copy().await,
            Err(SyncError::Protocol(_))
        ));
    }
}
