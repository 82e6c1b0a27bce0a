//! # FlexSync Storage
//!
//! Storage backends for the FlexSync local database.
//!
//! Backends are **opaque byte stores**: they read, append, sync and
//! truncate bytes and know nothing about objects, snapshots or
//! subscriptions. On top of a backend, [`RecordLog`] frames payloads as
//! length-prefixed records so the database can persist one committed state
//! per record and recover the latest intact one after a crash.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and ephemeral databases
//! - [`FileBackend`] - For persistent storage, holding an exclusive file lock
//!
//! ## Example
//!
//! ```rust
//! use flexsync_storage::{InMemoryBackend, RecordLog};
//!
//! let mut log = RecordLog::new(Box::new(InMemoryBackend::new()));
//! log.append(b"state v1").unwrap();
//! log.append(b"state v2").unwrap();
//! assert_eq!(log.last_record().unwrap(), Some(b"state v2".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod record;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use record::{RecordLog, RecordScan, RECORD_HEADER_SIZE};
