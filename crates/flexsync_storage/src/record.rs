//! Length-prefixed record framing over a storage backend.
//!
//! Layout of one record:
//!
//! ```text
//! ┌──────────────┬─────────────────────┐
//! │ len: u32 LE  │ payload: len bytes  │
//! └──────────────┴─────────────────────┘
//! ```
//!
//! A record whose header or payload is cut short (a crash mid-append) is a
//! torn tail. Scanning stops there and reports it; everything before it is
//! intact.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};

/// Size of the record header in bytes.
pub const RECORD_HEADER_SIZE: usize = 4;

/// Result of scanning a record log.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordScan {
    /// Intact records in append order.
    pub records: Vec<Vec<u8>>,
    /// Offset just past the last intact record.
    pub valid_len: u64,
    /// Whether trailing bytes after `valid_len` were discarded.
    pub torn_tail: bool,
}

/// Append-only log of length-prefixed records.
pub struct RecordLog {
    backend: Box<dyn StorageBackend>,
}

impl RecordLog {
    /// Wraps a backend.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Appends one record and syncs it. Returns the record offset.
    pub fn append(&mut self, payload: &[u8]) -> StorageResult<u64> {
        let len = u32::try_from(payload.len())
            .map_err(|_| StorageError::RecordTooLarge { len: payload.len() })?;

        let mut frame = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(payload);

        let offset = self.backend.append(&frame)?;
        self.backend.sync()?;
        Ok(offset)
    }

    /// Reads every intact record.
    pub fn scan(&self) -> StorageResult<RecordScan> {
        let size = self.backend.len();
        let mut scan = RecordScan::default();
        let mut offset = 0u64;

        while offset < size {
            if size - offset < RECORD_HEADER_SIZE as u64 {
                scan.torn_tail = true;
                break;
            }
            let header = self.backend.read_at(offset, RECORD_HEADER_SIZE)?;
            let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as u64;
            let start = offset + RECORD_HEADER_SIZE as u64;
            if size - start < len {
                scan.torn_tail = true;
                break;
            }
            scan.records.push(self.backend.read_at(start, len as usize)?);
            offset = start + len;
        }

        scan.valid_len = offset;
        Ok(scan)
    }

    /// Returns the most recent intact record, if any.
    pub fn last_record(&self) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.scan()?.records.pop())
    }

    /// Drops every record and writes `payload` as the only one.
    pub fn rewrite(&mut self, payload: &[u8]) -> StorageResult<u64> {
        self.backend.truncate(0)?;
        self.append(payload)
    }

    /// Cuts a torn tail so the next append starts on a record boundary.
    pub fn repair(&mut self) -> StorageResult<bool> {
        let scan = self.scan()?;
        if scan.torn_tail {
            self.backend.truncate(scan.valid_len)?;
        }
        Ok(scan.torn_tail)
    }

    /// Returns the log size in bytes.
    pub fn size(&self) -> u64 {
        self.backend.len()
    }
}
