//! Error types for the sync engine.

use flexsync_core::CoreError;
use flexsync_sync_protocol::{CodecError, ErrorCategory, ProtocolError};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Coarse classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller passed an invalid argument.
    IllegalArgument,
    /// The operation is not allowed in the current state.
    IllegalState,
    /// The caller stopped waiting. Server-side state is unaffected.
    Timeout,
    /// The server rejected a subscription set.
    Server,
    /// A protocol error reported by the session.
    Protocol,
    /// The session does not support the operation.
    Unsupported,
    /// Local database or codec failure.
    Internal,
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] CoreError),

    /// Invalid argument.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// Operation not allowed in the current state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A subscription with this name already exists for a different query.
    #[error("a subscription named '{name}' already exists with a different query")]
    ConflictingSubscriptionName {
        /// The conflicting name.
        name: String,
    },

    /// Timeout.
    #[error("operation timed out after {after:?}")]
    Timeout {
        /// How long the caller waited.
        after: Duration,
    },

    /// The server rejected the subscription set. Carries the server message.
    #[error("{0}")]
    BadFlexibleSyncQuery(String),

    /// The session does not support the operation.
    #[error("{0}")]
    UnsupportedOperation(String),

    /// Protocol error reported by the session.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The handle being waited on went away.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(String),

    /// The subscription set moved on while an update was being built.
    #[error("subscription set moved from version {base} to {latest} during update")]
    StaleSubscriptionSet {
        /// Version the update started from.
        base: i64,
        /// Version found at commit.
        latest: i64,
    },

    /// Initial remote data did not arrive in time.
    #[error("initial remote data was not downloaded within {after:?}")]
    InitialDownloadTimedOut {
        /// Configured timeout.
        after: Duration,
    },

    /// A user callback failed.
    #[error("callback failed: {0}")]
    Callback(#[from] CallbackError),
}

impl SyncError {
    /// Classifies this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::IllegalArgument(_) => ErrorKind::IllegalArgument,
            SyncError::Database(CoreError::UnknownObjectType { .. })
            | SyncError::Database(CoreError::InvalidQuery { .. }) => ErrorKind::IllegalArgument,
            SyncError::Database(CoreError::DatabaseClosed) => ErrorKind::IllegalState,
            SyncError::IllegalState(_)
            | SyncError::ConflictingSubscriptionName { .. }
            | SyncError::StaleSubscriptionSet { .. }
            | SyncError::InvalidStateTransition { .. }
            | SyncError::Cancelled => ErrorKind::IllegalState,
            SyncError::Timeout { .. } | SyncError::InitialDownloadTimedOut { .. } => {
                ErrorKind::Timeout
            }
            SyncError::BadFlexibleSyncQuery(_) => ErrorKind::Server,
            SyncError::Protocol(_) => ErrorKind::Protocol,
            SyncError::UnsupportedOperation(_) => ErrorKind::Unsupported,
            SyncError::Database(_) | SyncError::Codec(_) | SyncError::Callback(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Timeout { .. } => true,
            SyncError::Protocol(error) => error.category == ErrorCategory::Connection,
            _ => false,
        }
    }
}

impl From<CodecError> for SyncError {
    fn from(err: CodecError) -> Self {
        SyncError::Codec(err.to_string())
    }
}

/// Failure reported by, or captured from, a user callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CallbackError {
    message: String,
}

impl CallbackError {
    /// Creates a callback error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::new(format!("callback panicked: {detail}"))
    }
}

/// Runs a user callback, turning a panic into a [`CallbackError`].
pub(crate) fn guarded<F>(callback: F) -> Result<(), CallbackError>
where
    F: FnOnce() -> Result<(), CallbackError>,
{
    panic::catch_unwind(AssertUnwindSafe(callback))
        .unwrap_or_else(|payload| Err(CallbackError::from_panic(payload)))
}

impl From<SyncError> for CallbackError {
    fn from(err: SyncError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<CoreError> for CallbackError {
    fn from(err: CoreError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}
