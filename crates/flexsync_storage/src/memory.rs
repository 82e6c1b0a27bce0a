//! Volatile backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};

/// Keeps the log in a `Vec<u8>`.
///
/// Backs `Database::in_memory`; nothing survives the process.
///
/// ```rust
/// use flexsync_storage::{InMemoryBackend, StorageBackend};
///
/// let mut backend = InMemoryBackend::new();
/// assert_eq!(backend.append(b"state").unwrap(), 0);
/// assert_eq!(backend.len(), 5);
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    bytes: Vec<u8>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from existing bytes, e.g. a log cut short by a crash.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// The stored bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = self.len();
        usize::try_from(offset)
            .ok()
            .and_then(|start| Some(start..start.checked_add(len)?))
            .and_then(|range| self.bytes.get(range))
            .map(<[u8]>::to_vec)
            .ok_or(StorageError::ReadPastEnd { offset, len, size })
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.len();
        self.bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        let current = self.len();
        if len > current {
            return Err(StorageError::invalid_truncate(len, current));
        }
        self.bytes.truncate(len as usize);
        Ok(())
    }
}
