//! Frozen read views.

use crate::database::DatabaseState;
use crate::object::{Object, ObjectSet};
use crate::query::Query;
use crate::schema::Schema;
use std::sync::Arc;

/// An immutable view of the database at one committed version.
///
/// Snapshots are cheap to clone and never observe later commits. Handing
/// one to user code cannot change the database.
#[derive(Debug, Clone)]
pub struct Snapshot {
    state: Arc<DatabaseState>,
    schema: Arc<Schema>,
    location: Arc<str>,
}

impl Snapshot {
    pub(crate) fn new(state: Arc<DatabaseState>, schema: Arc<Schema>, location: Arc<str>) -> Self {
        Self {
            state,
            schema,
            location,
        }
    }

    /// Location of the database this snapshot was taken from.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Returns the committed version this snapshot reflects.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.state.version
    }

    /// Always true; a snapshot never changes.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        true
    }

    /// Returns the schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Looks up an object.
    #[must_use]
    pub fn get(&self, object_type: &str, primary_key: &str) -> Option<&Object> {
        self.state.objects.get(object_type, primary_key)
    }

    /// Returns every object.
    #[must_use]
    pub fn objects(&self) -> &ObjectSet {
        &self.state.objects
    }

    /// Counts the objects of one type.
    #[must_use]
    pub fn count(&self, object_type: &str) -> usize {
        self.state.objects.of_type(object_type).count()
    }

    /// Returns the objects matching `query`, ordered by primary key.
    #[must_use]
    pub fn query(&self, query: &Query) -> Vec<Object> {
        self.state
            .objects
            .of_type(query.object_type())
            .filter(|o| query.matches(o))
            .cloned()
            .collect()
    }

    /// Reads a metadata entry.
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&[u8]> {
        self.state.metadata.get(key).map(Vec::as_slice)
    }
}
