//! Object type registry.

use crate::error::{CoreError, CoreResult};
use std::collections::BTreeSet;

/// The set of object types a database stores and syncs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    types: BTreeSet<String>,
}

impl Schema {
    /// Creates a schema from type names.
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if `object_type` is part of the schema.
    #[must_use]
    pub fn contains(&self, object_type: &str) -> bool {
        self.types.contains(object_type)
    }

    /// Fails with [`CoreError::UnknownObjectType`] unless the type is known.
    pub fn ensure_contains(&self, object_type: &str) -> CoreResult<()> {
        if self.contains(object_type) {
            Ok(())
        } else {
            Err(CoreError::UnknownObjectType {
                name: object_type.to_string(),
            })
        }
    }

    /// Iterates over type names in sorted order.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(String::as_str)
    }

    /// Returns the number of types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if the schema has no types.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
