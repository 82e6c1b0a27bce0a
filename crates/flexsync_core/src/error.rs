//! Error types for FlexSync core.

use flexsync_storage::StorageError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the local database.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The record log failed.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// I/O error outside the record log.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// CBOR encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation was refused.
        message: String,
    },

    /// The database was closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// Another handle has the database file open.
    #[error("database file is already open: {}", path.display())]
    DatabaseLocked {
        /// The database file.
        path: PathBuf,
    },

    /// Object type is not part of the schema.
    #[error("unknown object type: {name}")]
    UnknownObjectType {
        /// The rejected type name.
        name: String,
    },

    /// Query text could not be parsed.
    #[error("invalid query '{query}': {message}")]
    InvalidQuery {
        /// The query text as given.
        query: String,
        /// What went wrong.
        message: String,
    },

    /// Insert hit an existing primary key.
    #[error("object already exists: {object_type}[{primary_key}]")]
    ObjectExists {
        /// Object type.
        object_type: String,
        /// Primary key.
        primary_key: String,
    },

    /// Persisted state could not be understood.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// What is wrong with it.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid query error.
    pub fn invalid_query(query: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            query: query.into(),
            message: message.into(),
        }
    }
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Locked { path } => Self::DatabaseLocked { path },
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_storage_names_the_file() {
        let err: CoreError = StorageError::Locked {
            path: PathBuf::from("default.realm"),
        }
        .into();
        assert!(matches!(err, CoreError::DatabaseLocked { .. }));
        assert_eq!(err.to_string(), "database file is already open: default.realm");
    }

    #[test]
    fn display_includes_query() {
        let err = CoreError::invalid_query("age >", "expected literal");
        assert_eq!(err.to_string(), "invalid query 'age >': expected literal");
    }
}
