//! The error handed to client reset callbacks.

use crate::error::{CallbackError, SyncError, SyncResult};
use chrono::Utc;
use flexsync_core::{CoreError, Database};
use flexsync_sync_protocol::ProtocolError;
use std::fs;
use std::path::{Path, PathBuf};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Directory, next to the database file, that recovered files are moved to.
pub const RECOVERY_DIR: &str = "recovered-realms";

#[derive(Debug)]
struct FileRecovery {
    db: Weak<Database>,
    /// Set once the file has been moved. Held for the whole move.
    executed: Mutex<bool>,
}

/// A client reset is needed.
///
/// Displays exactly as the protocol error that triggered it. The paths stay
/// valid until [`execute_client_reset`](Self::execute_client_reset) moves the
/// database file aside.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct ClientResetRequiredError {
    error: ProtocolError,
    original_file_path: PathBuf,
    recovery_file_path: PathBuf,
    #[source]
    cause: Option<CallbackError>,
    recovery: Arc<FileRecovery>,
}

impl ClientResetRequiredError {
    pub(crate) fn new(db: &Arc<Database>, error: ProtocolError) -> Self {
        let original_file_path = db
            .path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(db.location()));
        let recovery_file_path = recovery_path_for(&original_file_path);
        Self {
            error,
            original_file_path,
            recovery_file_path,
            cause: None,
            recovery: Arc::new(FileRecovery {
                db: Arc::downgrade(db),
                executed: Mutex::new(false),
            }),
        }
    }

    pub(crate) fn with_cause(mut self, cause: CallbackError) -> Self {
        self.cause = Some(cause);
        self
    }

    /// The protocol error that triggered the reset.
    #[must_use]
    pub fn error(&self) -> &ProtocolError {
        &self.error
    }

    /// The protocol error's message, unmodified.
    #[must_use]
    pub fn message(&self) -> String {
        self.error.to_string()
    }

    /// Path of the database being reset.
    #[must_use]
    pub fn original_file_path(&self) -> &Path {
        &self.original_file_path
    }

    /// Where [`execute_client_reset`](Self::execute_client_reset) moves the
    /// database.
    #[must_use]
    pub fn recovery_file_path(&self) -> &Path {
        &self.recovery_file_path
    }

    /// The callback failure that aborted an automatic reset, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&CallbackError> {
        self.cause.as_ref()
    }

    /// Closes the database and moves its file to the recovery path.
    ///
    /// Returns `Ok(false)` if the reset was already executed. A failed move
    /// can be retried.
    ///
    /// # Errors
    ///
    /// `IllegalState` for in-memory databases; I/O errors from the move.
    pub fn execute_client_reset(&self) -> SyncResult<bool> {
        let mut executed = self.recovery.executed.lock();
        if *executed {
            return Ok(false);
        }
        let db = self.recovery.db.upgrade();
        if db.as_ref().is_some_and(|db| db.path().is_none()) {
            return Err(SyncError::IllegalState(
                "an in-memory database has no file to recover".into(),
            ));
        }

        // The database stays usable if the recovery directory cannot be made.
        if let Some(parent) = self.recovery_file_path.parent() {
            fs::create_dir_all(parent).map_err(CoreError::from)?;
        }
        if let Some(db) = db {
            db.close()?;
        }
        fs::rename(&self.original_file_path, &self.recovery_file_path).map_err(CoreError::from)?;
        *executed = true;

        info!(
            original = %self.original_file_path.display(),
            recovery = %self.recovery_file_path.display(),
            "moved database aside for client reset"
        );
        Ok(true)
    }
}

/// `<dir>/recovered-realms/recovered_realm-<timestamp>-<uuid>[.<ext>]`
pub(crate) fn recovery_path_for(original: &Path) -> PathBuf {
    let mut name = format!(
        "recovered_realm-{}-{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        Uuid::new_v4().simple()
    );
    if let Some(ext) = original.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    original
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(RECOVERY_DIR)
        .join(name)
}
