//! Client reset strategies.

use crate::client_reset::required::ClientResetRequiredError;
use crate::error::CallbackError;
use crate::session::SyncSessionFacade;
use flexsync_core::{Snapshot, WriteTransaction};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

/// Receives the frozen pre-reset data.
pub type BeforeResetCallback = Arc<dyn Fn(&Snapshot) -> Result<(), CallbackError> + Send + Sync>;

/// Receives the pre-reset data and the write transaction holding the
/// server's data.
pub type AfterResetCallback =
    Arc<dyn Fn(&Snapshot, &mut WriteTransaction<'_>) -> Result<(), CallbackError> + Send + Sync>;

/// Receives a reset that could not be handled automatically.
pub type ResetErrorCallback =
    Arc<dyn Fn(&dyn SyncSessionFacade, ClientResetRequiredError) + Send + Sync>;

/// What to do when the server demands a client reset.
#[derive(Clone)]
pub enum ClientResetStrategy {
    /// Replace local data with the server's, discarding unsynced changes.
    DiscardUnsyncedChanges {
        /// Runs before local data is replaced.
        on_before_reset: BeforeResetCallback,
        /// Runs inside the transaction that replaced local data.
        on_after_reset: AfterResetCallback,
        /// Runs when the reset failed or a callback failed.
        on_error: ResetErrorCallback,
    },
    /// Hand the reset to the application, which may call
    /// [`ClientResetRequiredError::execute_client_reset`].
    ManuallyRecoverUnsyncedChanges {
        /// Receives the reset.
        on_client_reset: ResetErrorCallback,
    },
}

impl ClientResetStrategy {
    /// Builds a discard strategy from closures.
    pub fn discard_unsynced_changes<B, A, E>(on_before_reset: B, on_after_reset: A, on_error: E) -> Self
    where
        B: Fn(&Snapshot) -> Result<(), CallbackError> + Send + Sync + 'static,
        A: Fn(&Snapshot, &mut WriteTransaction<'_>) -> Result<(), CallbackError> + Send + Sync + 'static,
        E: Fn(&dyn SyncSessionFacade, ClientResetRequiredError) + Send + Sync + 'static,
    {
        ClientResetStrategy::DiscardUnsyncedChanges {
            on_before_reset: Arc::new(on_before_reset),
            on_after_reset: Arc::new(on_after_reset),
            on_error: Arc::new(on_error),
        }
    }

    /// Builds a manual strategy from a closure.
    pub fn manually_recover_unsynced_changes<F>(on_client_reset: F) -> Self
    where
        F: Fn(&dyn SyncSessionFacade, ClientResetRequiredError) + Send + Sync + 'static,
    {
        ClientResetStrategy::ManuallyRecoverUnsyncedChanges {
            on_client_reset: Arc::new(on_client_reset),
        }
    }

    /// The manual strategy that only logs the reset.
    #[must_use]
    pub fn default_manual() -> Self {
        Self::manually_recover_unsynced_changes(|_session, reset| {
            error!(
                error = %reset,
                "Client Reset required on Realm: {}",
                reset.original_file_path().display()
            );
        })
    }

    /// Short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientResetStrategy::DiscardUnsyncedChanges { .. } => "discard-unsynced-changes",
            ClientResetStrategy::ManuallyRecoverUnsyncedChanges { .. } => "manual",
        }
    }
}

impl Default for ClientResetStrategy {
    /// Discards unsynced changes and logs each step.
    fn default() -> Self {
        Self::discard_unsynced_changes(
            |before| {
                info!("Client Reset is about to happen on Realm: {}", before.location());
                Ok(())
            },
            |_before, after| {
                info!("Client Reset complete on Realm: {}", after.location());
                Ok(())
            },
            |_session, reset| {
                error!(
                    error = %reset,
                    "Discard unsynced changes client reset failed on Realm: {}",
                    reset.original_file_path().display()
                );
            },
        )
    }
}

impl fmt::Debug for ClientResetStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ClientResetStrategy").field(&self.name()).finish()
    }
}
