//! Configuration for the sync engine.

use crate::client_reset::ClientResetStrategy;
use crate::error::{SyncError, SyncResult};
use crate::session::SyncSessionFacade;
use crate::subscription::MutableSubscriptionSet;
use flexsync_sync_protocol::ProtocolError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Receives protocol errors reported by the session.
pub type ErrorHandler = Arc<dyn Fn(&dyn SyncSessionFacade, &ProtocolError) + Send + Sync>;

/// Block run against the subscription set when the client opens.
pub type InitialSubscriptionsCallback =
    Arc<dyn Fn(&mut MutableSubscriptionSet<'_>) -> SyncResult<()> + Send + Sync>;

/// How the server decides which objects to synchronize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMode {
    /// Objects are selected by the client's subscription set.
    Flexible,
    /// Objects are selected by a fixed partition value.
    PartitionBased(String),
}

/// Subscriptions added when the client opens.
#[derive(Clone)]
pub struct InitialSubscriptions {
    callback: InitialSubscriptionsCallback,
    rerun_on_open: bool,
}

impl InitialSubscriptions {
    /// Runs `callback` the first time the database is opened.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&mut MutableSubscriptionSet<'_>) -> SyncResult<()> + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
            rerun_on_open: false,
        }
    }

    /// Runs the callback on every open instead of only the first.
    #[must_use]
    pub fn with_rerun_on_open(mut self, rerun: bool) -> Self {
        self.rerun_on_open = rerun;
        self
    }

    /// Whether the callback runs on every open.
    #[must_use]
    pub fn rerun_on_open(&self) -> bool {
        self.rerun_on_open
    }

    pub(crate) fn callback(&self) -> &InitialSubscriptionsCallback {
        &self.callback
    }
}

impl fmt::Debug for InitialSubscriptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitialSubscriptions")
            .field("rerun_on_open", &self.rerun_on_open)
            .finish_non_exhaustive()
    }
}

/// Wait for server data before `open` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitialRemoteData {
    /// How long to wait.
    pub timeout: Duration,
}

impl InitialRemoteData {
    /// Waits up to `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Configuration for a [`SyncClient`](crate::SyncClient).
#[derive(Clone)]
pub struct SyncConfig {
    /// Sync mode.
    pub mode: SyncMode,
    /// What to do when the server demands a client reset.
    pub client_reset_strategy: ClientResetStrategy,
    /// Receives every protocol error, after any client reset has run.
    pub error_handler: ErrorHandler,
    /// Subscriptions to add on open. Flexible sync only.
    pub initial_subscriptions: Option<InitialSubscriptions>,
    /// Wait for server data on open.
    pub initial_remote_data: Option<InitialRemoteData>,
}

impl SyncConfig {
    /// Creates a flexible sync configuration.
    pub fn flexible() -> Self {
        Self::with_mode(SyncMode::Flexible)
    }

    /// Creates a partition-based configuration.
    pub fn partition_based(partition: impl Into<String>) -> Self {
        Self::with_mode(SyncMode::PartitionBased(partition.into()))
    }

    fn with_mode(mode: SyncMode) -> Self {
        Self {
            mode,
            client_reset_strategy: ClientResetStrategy::default(),
            error_handler: Arc::new(|_session, error| {
                warn!(%error, "sync session error");
            }),
            initial_subscriptions: None,
            initial_remote_data: None,
        }
    }

    /// Sets the client reset strategy.
    #[must_use]
    pub fn with_client_reset_strategy(mut self, strategy: ClientResetStrategy) -> Self {
        self.client_reset_strategy = strategy;
        self
    }

    /// Sets the error handler.
    #[must_use]
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&dyn SyncSessionFacade, &ProtocolError) + Send + Sync + 'static,
    {
        self.error_handler = Arc::new(handler);
        self
    }

    /// Sets the initial subscriptions.
    #[must_use]
    pub fn with_initial_subscriptions(mut self, initial: InitialSubscriptions) -> Self {
        self.initial_subscriptions = Some(initial);
        self
    }

    /// Waits for server data on open.
    #[must_use]
    pub fn with_initial_remote_data(mut self, initial: InitialRemoteData) -> Self {
        self.initial_remote_data = Some(initial);
        self
    }

    /// Returns true for flexible sync.
    #[must_use]
    pub fn is_flexible(&self) -> bool {
        self.mode == SyncMode::Flexible
    }

    /// Checks the configuration for combinations that cannot work.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` for initial subscriptions on a partition-based
    /// configuration or a zero initial data timeout.
    pub fn validate(&self) -> SyncResult<()> {
        if !self.is_flexible() && self.initial_subscriptions.is_some() {
            return Err(SyncError::IllegalArgument(
                "initial subscriptions require flexible sync".into(),
            ));
        }
        if let Some(initial) = self.initial_remote_data {
            if initial.timeout.is_zero() {
                return Err(SyncError::IllegalArgument(format!(
                    "'timeout' must be > 0. It was: {:?}",
                    initial.timeout
                )));
            }
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::flexible()
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("mode", &self.mode)
            .field("client_reset_strategy", &self.client_reset_strategy)
            .field("initial_subscriptions", &self.initial_subscriptions)
            .field("initial_remote_data", &self.initial_remote_data)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::flexible()
            .with_client_reset_strategy(ClientResetStrategy::default_manual())
            .with_initial_subscriptions(InitialSubscriptions::new(|_| Ok(())).with_rerun_on_open(true))
            .with_initial_remote_data(InitialRemoteData::new(Duration::from_secs(60)));

        assert!(config.is_flexible());
        assert_eq!(config.client_reset_strategy.name(), "manual");
        assert!(config.initial_subscriptions.as_ref().unwrap().rerun_on_open());
        assert_eq!(
            config.initial_remote_data,
            Some(InitialRemoteData::new(Duration::from_secs(60)))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_is_flexible_with_discard_reset() {
        let config = SyncConfig::default();
        assert_eq!(config.mode, SyncMode::Flexible);
        assert_eq!(config.client_reset_strategy.name(), "discard-unsynced-changes");
    }

    #[test]
    fn partition_rejects_initial_subscriptions() {
        let config = SyncConfig::partition_based("user-1")
            .with_initial_subscriptions(InitialSubscriptions::new(|_| Ok(())));
        assert!(!config.is_flexible());
        assert!(matches!(
            config.validate(),
            Err(SyncError::IllegalArgument(_))
        ));
    }

    #[test]
    fn zero_initial_data_timeout_is_rejected() {
        let config = SyncConfig::partition_based("user-1")
            .with_initial_remote_data(InitialRemoteData::new(Duration::ZERO));
        assert!(config.validate().is_err());
    }
}
