//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// A record could not be framed.
    #[error("record too large: {len} bytes")]
    RecordTooLarge {
        /// Payload length in bytes.
        len: usize,
    },

    /// Another process holds the file lock.
    #[error("storage file is locked by another process: {path}")]
    Locked {
        /// The locked file.
        path: PathBuf,
    },
}

impl StorageError {
    pub(crate) fn invalid_truncate(new_size: u64, current: u64) -> Self {
        Self::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "cannot truncate to size {} which is greater than current size {}",
                new_size, current
            ),
        ))
    }
}
