//! File backend holding an exclusive lock on the database file.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stores the log in one file.
///
/// Opening takes an exclusive advisory lock, so a second handle on the same
/// database (in this process or another) fails with
/// [`StorageError::Locked`]. Dropping the backend releases it.
///
/// ```no_run
/// use flexsync_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("data/default.realm")).unwrap();
/// backend.append(b"state").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    /// Reads seek, so they need the handle exclusively too.
    file: Mutex<File>,
    len: u64,
}

impl FileBackend {
    /// Opens or creates the file, creating missing parent directories.
    ///
    /// # Errors
    ///
    /// [`StorageError::Locked`] if the file is already open; I/O errors.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        file.try_lock_exclusive().map_err(|_| StorageError::Locked {
            path: path.to_path_buf(),
        })?;

        let len = file.metadata()?.len();
        debug!(path = %path.display(), len, "opened storage file");
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            len,
        })
    }

    /// Path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let end = offset.checked_add(len as u64);
        if end.map_or(true, |end| end > self.len) {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: self.len,
            });
        }

        let mut buffer = vec![0; len];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.len;
        // Opened in append mode: every write lands at the end.
        self.file.get_mut().write_all(data)?;
        self.len += data.len() as u64;
        Ok(offset)
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn sync(&mut self) -> StorageResult<()> {
        let file = self.file.get_mut();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        if len > self.len {
            return Err(StorageError::invalid_truncate(len, self.len));
        }
        let file = self.file.get_mut();
        file.set_len(len)?;
        file.sync_all()?;
        self.len = len;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app").join("sync").join("default.realm");

        let backend = FileBackend::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(backend.len(), 0);
        assert_eq!(backend.path(), path);
    }

    #[test]
    fn appended_bytes_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("default.realm");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"v1").unwrap();
            assert_eq!(backend.append(b"v2").unwrap(), 2);
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.len(), 4);
        assert_eq!(backend.read_at(0, 4).unwrap(), b"v1v2");
        assert!(backend.read_at(3, 2).is_err());
    }

    #[test]
    fn one_handle_at_a_time() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("default.realm");

        let first = FileBackend::open(&path).unwrap();
        assert!(matches!(
            FileBackend::open(&path),
            Err(StorageError::Locked { .. })
        ));
        drop(first);
        assert!(FileBackend::open(&path).is_ok());
    }

    #[test]
    fn truncate_then_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("default.realm");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"state torn").unwrap();
        backend.truncate(5).unwrap();
        assert!(backend.truncate(6).is_err());

        assert_eq!(backend.append(b"!").unwrap(), 5);
        assert_eq!(backend.read_at(0, 6).unwrap(), b"state!");
    }
}
