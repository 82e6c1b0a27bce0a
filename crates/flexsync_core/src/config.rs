//! Database configuration.

use crate::schema::Schema;
use std::path::{Path, PathBuf};

/// Configuration for opening a file-backed database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path of the database file.
    pub path: PathBuf,

    /// Object types stored in this database.
    pub schema: Schema,

    /// Whether to create the file (and its parent directories) if missing.
    pub create_if_missing: bool,

    /// Log size in bytes above which the next commit compacts the log.
    pub compact_threshold: u64,
}

impl DatabaseConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new(path: impl AsRef<Path>, schema: Schema) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            schema,
            create_if_missing: true,
            compact_threshold: 4 * 1024 * 1024, // 4 MB
        }
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the compaction threshold.
    #[must_use]
    pub fn compact_threshold(mut self, bytes: u64) -> Self {
        self.compact_threshold = bytes;
        self
    }
}
