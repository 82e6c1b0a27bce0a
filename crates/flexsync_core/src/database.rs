//! Database facade and recovery.

use crate::cbor::{from_cbor, to_cbor};
use crate::config::DatabaseConfig;
use crate::error::{CoreError, CoreResult};
use crate::object::ObjectSet;
use crate::schema::Schema;
use crate::snapshot::Snapshot;
use crate::transaction::WriteTransaction;
use flexsync_storage::{FileBackend, InMemoryBackend, RecordLog};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Everything one commit persists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct DatabaseState {
    pub(crate) version: u64,
    pub(crate) objects: ObjectSet,
    pub(crate) metadata: BTreeMap<String, Vec<u8>>,
}

/// The main database handle.
///
/// `Database` provides:
/// - Frozen snapshots for readers
/// - One write transaction at a time
/// - A metadata area for engine state
///
/// Each commit appends the full state as one record; the newest intact
/// record wins on open, so a crash mid-commit loses only that commit.
///
/// # Opening a Database
///
/// ```rust,no_run
/// use flexsync_core::{Database, DatabaseConfig, Object, Schema};
///
/// let config = DatabaseConfig::new("default.realm", Schema::new(["Item"]));
/// let db = Database::open(config)?;
///
/// db.write(|txn| txn.insert(Object::new("Item", "1")))?;
///
/// db.close()?;
/// # Ok::<(), flexsync_core::CoreError>(())
/// ```
///
/// # In-Memory Databases
///
/// For testing, use `Database::in_memory()`:
///
/// ```rust
/// use flexsync_core::{Database, Schema};
///
/// let db = Database::in_memory(Schema::new(["Item"]));
/// assert_eq!(db.version(), 0);
/// ```
pub struct Database {
    schema: Arc<Schema>,
    /// None for in-memory databases.
    path: Option<PathBuf>,
    location: Arc<str>,
    compact_threshold: u64,
    committed: RwLock<Arc<DatabaseState>>,
    /// None once closed.
    log: Mutex<Option<RecordLog>>,
    /// Single-writer lock.
    write_lock: Mutex<()>,
    writer: Mutex<Option<ThreadId>>,
}

impl Database {
    /// Opens a file-backed database.
    ///
    /// The file is locked exclusively until [`Database::close`] or drop.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another handle has the file locked (`DatabaseLocked`)
    /// - The newest record cannot be decoded (`InvalidFormat`)
    /// - I/O errors occur
    pub fn open(config: DatabaseConfig) -> CoreResult<Self> {
        if !config.create_if_missing && !config.path.exists() {
            return Err(CoreError::invalid_operation(format!(
                "database file does not exist: {}",
                config.path.display()
            )));
        }

        let backend = FileBackend::open(&config.path)?;
        let mut log = RecordLog::new(Box::new(backend));
        if log.repair()? {
            tracing::warn!(path = %config.path.display(), "discarded torn trailing record");
        }

        let state = match log.last_record()? {
            Some(bytes) => from_cbor::<DatabaseState>(&bytes)
                .map_err(|e| CoreError::invalid_format(e.to_string()))?,
            None => DatabaseState::default(),
        };

        tracing::info!(
            path = %config.path.display(),
            version = state.version,
            objects = state.objects.len(),
            "database opened"
        );

        Ok(Self::from_parts(
            config.schema,
            Some(config.path),
            config.compact_threshold,
            log,
            state,
        ))
    }

    /// Creates an empty in-memory database.
    #[must_use]
    pub fn in_memory(schema: Schema) -> Self {
        let log = RecordLog::new(Box::new(InMemoryBackend::new()));
        Self::from_parts(schema, None, u64::MAX, log, DatabaseState::default())
    }

    fn from_parts(
        schema: Schema,
        path: Option<PathBuf>,
        compact_threshold: u64,
        log: RecordLog,
        state: DatabaseState,
    ) -> Self {
        let location: Arc<str> = match &path {
            Some(path) => path.display().to_string().into(),
            None => "<in-memory>".into(),
        };
        Self {
            schema: Arc::new(schema),
            path,
            location,
            compact_threshold,
            committed: RwLock::new(Arc::new(state)),
            log: Mutex::new(Some(log)),
            write_lock: Mutex::new(()),
            writer: Mutex::new(None),
        }
    }

    /// Returns the schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the database file, or `None` when in memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Human-readable location used in log messages.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Returns the latest committed version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.committed.read().version
    }

    /// Returns a frozen view of the latest committed version.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(
            Arc::clone(&self.committed.read()),
            Arc::clone(&self.schema),
            Arc::clone(&self.location),
        )
    }

    /// Starts the write transaction, blocking while another one is active.
    ///
    /// # Errors
    ///
    /// `DatabaseClosed` after close; `InvalidOperation` if the calling thread
    /// already holds the write transaction.
    pub fn begin_write(&self) -> CoreResult<WriteTransaction<'_>> {
        self.ensure_open()?;
        if self.is_write_held_by_current_thread() {
            return Err(CoreError::invalid_operation(
                "write transaction already active on this thread",
            ));
        }

        let guard = self.write_lock.lock();
        *self.writer.lock() = Some(thread::current().id());
        let base = (**self.committed.read()).clone();
        Ok(WriteTransaction::new(self, guard, base))
    }

    /// Runs `f` in a write transaction.
    ///
    /// Commits when `f` succeeds and leaves the transaction active; rolls
    /// back when it fails.
    pub fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> Result<T, E>,
        E: From<CoreError>,
    {
        let mut txn = self.begin_write()?;
        match f(&mut txn) {
            Ok(value) => {
                if txn.is_active() {
                    txn.commit()?;
                }
                Ok(value)
            }
            Err(err) => {
                if txn.is_active() {
                    txn.rollback()?;
                }
                Err(err)
            }
        }
    }

    /// Returns true if the calling thread holds the write transaction.
    #[must_use]
    pub fn is_write_held_by_current_thread(&self) -> bool {
        *self.writer.lock() == Some(thread::current().id())
    }

    /// Reads a committed metadata entry.
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<Vec<u8>> {
        self.committed.read().metadata.get(key).cloned()
    }

    /// Writes one metadata entry in its own transaction.
    pub fn set_metadata(&self, key: impl Into<String>, value: Vec<u8>) -> CoreResult<u64> {
        let mut txn = self.begin_write()?;
        txn.set_metadata(key, value)?;
        txn.commit()
    }

    /// Closes the database and releases the file lock.
    pub fn close(&self) -> CoreResult<()> {
        if self.log.lock().take().is_some() {
            tracing::debug!(location = %self.location(), "database closed");
        }
        Ok(())
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.log.lock().is_some()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    pub(crate) fn clear_writer(&self) {
        *self.writer.lock() = None;
    }

    /// Writes `state` durably and publishes it. Caller holds the write lock.
    pub(crate) fn persist(&self, state: DatabaseState) -> CoreResult<u64> {
        let payload = to_cbor(&state)?;

        let mut guard = self.log.lock();
        let log = guard.as_mut().ok_or(CoreError::DatabaseClosed)?;
        if log.size() + payload.len() as u64 > self.compact_threshold {
            log.rewrite(&payload)?;
            tracing::debug!(version = state.version, "compacted database log");
        } else {
            log.append(&payload)?;
        }

        let version = state.version;
        *self.committed.write() = Arc::new(state);
        Ok(version)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.location())
            .field("is_open", &self.is_open())
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}
