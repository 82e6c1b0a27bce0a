//! The single write transaction.

use crate::database::{Database, DatabaseState};
use crate::error::{CoreError, CoreResult};
use crate::object::{Object, ObjectSet};
use crate::query::Query;
use crate::transaction::state::TransactionState;
use parking_lot::MutexGuard;

/// A live, mutable view of the database.
///
/// Holds the database's write lock from `begin_write()` until it is
/// committed, rolled back or dropped. Dropping an active transaction rolls
/// it back.
///
/// # Example
///
/// ```rust
/// use flexsync_core::{Database, Object, Schema};
///
/// let db = Database::in_memory(Schema::new(["Item"]));
/// let mut txn = db.begin_write().unwrap();
/// txn.insert(Object::new("Item", "1").with("section", 42)).unwrap();
/// let version = txn.commit().unwrap();
/// assert_eq!(version, 1);
/// assert!(db.snapshot().get("Item", "1").is_some());
/// ```
pub struct WriteTransaction<'db> {
    db: &'db Database,
    guard: Option<MutexGuard<'db, ()>>,
    base_version: u64,
    working: DatabaseState,
    state: TransactionState,
}

impl<'db> WriteTransaction<'db> {
    pub(crate) fn new(db: &'db Database, guard: MutexGuard<'db, ()>, base: DatabaseState) -> Self {
        Self {
            db,
            guard: Some(guard),
            base_version: base.version,
            working: base,
            state: TransactionState::Active,
        }
    }

    /// Returns the version this transaction started from.
    #[must_use]
    pub fn base_version(&self) -> u64 {
        self.base_version
    }

    /// Location of the database being written.
    #[must_use]
    pub fn location(&self) -> &str {
        self.db.location()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Inserts a new object.
    ///
    /// # Errors
    ///
    /// [`CoreError::ObjectExists`] if the key is taken,
    /// [`CoreError::UnknownObjectType`] if the type is not in the schema.
    pub fn insert(&mut self, object: Object) -> CoreResult<()> {
        self.state.ensure_active()?;
        self.db.schema().ensure_contains(&object.object_type)?;
        if self
            .working
            .objects
            .get(&object.object_type, &object.primary_key)
            .is_some()
        {
            return Err(CoreError::ObjectExists {
                object_type: object.object_type,
                primary_key: object.primary_key,
            });
        }
        self.working.objects.insert(object);
        Ok(())
    }

    /// Inserts or replaces an object. Returns the replaced one.
    pub fn upsert(&mut self, object: Object) -> CoreResult<Option<Object>> {
        self.state.ensure_active()?;
        self.db.schema().ensure_contains(&object.object_type)?;
        Ok(self.working.objects.insert(object))
    }

    /// Deletes an object. Returns false if it did not exist.
    pub fn delete(&mut self, object_type: &str, primary_key: &str) -> CoreResult<bool> {
        self.state.ensure_active()?;
        Ok(self.working.objects.remove(object_type, primary_key).is_some())
    }

    /// Replaces every object with `objects`.
    pub fn replace_all(&mut self, objects: ObjectSet) -> CoreResult<()> {
        self.state.ensure_active()?;
        for object in objects.iter() {
            self.db.schema().ensure_contains(&object.object_type)?;
        }
        self.working.objects = objects;
        Ok(())
    }

    /// Looks up an object, including uncommitted changes.
    #[must_use]
    pub fn get(&self, object_type: &str, primary_key: &str) -> Option<&Object> {
        self.working.objects.get(object_type, primary_key)
    }

    /// Returns every object, including uncommitted changes.
    #[must_use]
    pub fn objects(&self) -> &ObjectSet {
        &self.working.objects
    }

    /// Returns the objects matching `query`.
    #[must_use]
    pub fn query(&self, query: &Query) -> Vec<Object> {
        self.working
            .objects
            .of_type(query.object_type())
            .filter(|o| query.matches(o))
            .cloned()
            .collect()
    }

    /// Reads a metadata entry, including uncommitted changes.
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&[u8]> {
        self.working.metadata.get(key).map(Vec::as_slice)
    }

    /// Writes a metadata entry.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Vec<u8>) -> CoreResult<()> {
        self.state.ensure_active()?;
        self.working.metadata.insert(key.into(), value);
        Ok(())
    }

    /// Commits all changes and returns the new version.
    ///
    /// On failure the transaction is aborted and the database stays at its
    /// previous version.
    pub fn commit(&mut self) -> CoreResult<u64> {
        self.state.ensure_active()?;
        let mut next = std::mem::take(&mut self.working);
        next.version = self.base_version + 1;

        let result = self.db.persist(next);
        self.state = match result {
            Ok(_) => TransactionState::Committed,
            Err(_) => TransactionState::RolledBack,
        };
        self.release();
        result
    }

    /// Discards all changes.
    pub fn rollback(&mut self) -> CoreResult<()> {
        self.state.ensure_active()?;
        self.state = TransactionState::RolledBack;
        self.working = DatabaseState::default();
        self.release();
        Ok(())
    }

    fn release(&mut self) {
        if let Some(guard) = self.guard.take() {
            self.db.clear_writer();
            drop(guard);
        }
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        if self.is_active() {
            tracing::debug!(base_version = self.base_version, "rolling back dropped write transaction");
            self.state = TransactionState::RolledBack;
        }
        self.release();
    }
}

impl std::fmt::Debug for WriteTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("base_version", &self.base_version)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
