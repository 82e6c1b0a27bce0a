//! The byte store underneath a [`RecordLog`](crate::RecordLog).

use crate::error::StorageResult;

/// An append-only byte store that can be cut back.
///
/// The record log is the only writer. It appends whole frames, syncs after
/// every commit and truncates when it compacts or drops a torn tail.
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// [`crate::StorageError::ReadPastEnd`] if the range is not fully
    /// written.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it starts at.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Number of bytes written.
    fn len(&self) -> u64;

    /// Makes every appended byte durable.
    fn sync(&mut self) -> StorageResult<()>;

    /// Cuts the store back to `len` bytes. Never grows it.
    fn truncate(&mut self, len: u64) -> StorageResult<()>;
}
