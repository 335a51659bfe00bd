//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A storage backend over a single OS file.
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync_data()` calls `File::sync_data()`
/// - `sync()` calls `File::sync_all()`
///
/// Syncs go through a second handle to the same file, so a flusher thread
/// forcing data to disk never waits for the writer's lock.
///
/// # Example
///
/// ```no_run
/// use walden_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("wal-000001.log")).unwrap();
/// backend.append(b"record bytes").unwrap();
/// backend.sync_data().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    sync_handle: File,
    size: RwLock<u64>,
    writable: bool,
}

impl FileBackend {
    /// Opens or creates a file for reading and appending.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::from_file(path, file, true)
    }

    /// Opens an existing file for reading only.
    ///
    /// The file is never created; writes fail with [`StorageError::ReadOnly`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Self::from_file(path, file, false)
    }

    /// Opens or creates a file, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    fn from_file(path: &Path, file: File, writable: bool) -> StorageResult<Self> {
        let size = file.metadata()?.len();
        let sync_handle = file.try_clone()?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            sync_handle,
            size: RwLock::new(size),
            writable,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether this backend accepts writes.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&self, data: &[u8]) -> StorageResult<u64> {
        if !self.writable {
            return Err(StorageError::ReadOnly);
        }
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.lock();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&self) -> StorageResult<()> {
        self.file.lock().flush()?;
        Ok(())
    }

    fn sync_data(&self) -> StorageResult<()> {
        if self.writable {
            self.sync_handle.sync_data()?;
        }
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        if self.writable {
            self.sync_handle.sync_all()?;
        }
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn truncate(&self, new_size: u64) -> StorageResult<()> {
        if !self.writable {
            return Err(StorageError::ReadOnly);
        }

        let file = self.file.lock();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size: *size,
            });
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_empty_log_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal-000001.log");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
        assert!(backend.is_writable());
    }

    #[test]
    fn appends_return_offsets() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("wal-000001.log")).unwrap();

        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);
        assert_eq!(&backend.read_at(0, 11).unwrap(), b"hello world");
        assert_eq!(&backend.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn reading_past_end_is_an_error() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("wal-000001.log")).unwrap();
        backend.append(b"hello").unwrap();

        let result = backend.read_at(3, 5);
        assert!(matches!(
            result,
            Err(StorageError::ReadPastEnd {
                offset: 3,
                len: 5,
                size: 5
            })
        ));
    }

    #[test]
    fn synced_bytes_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal-000001.log");

        {
            let backend = FileBackend::open(&path).unwrap();
            backend.append(b"record 1|record 2").unwrap();
            backend.sync_data().unwrap();
        }

        let backend = FileBackend::open_read_only(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 17);
        assert_eq!(&backend.read_at(9, 8).unwrap(), b"record 2");
    }

    #[test]
    fn read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal-000001.log");
        FileBackend::open(&path).unwrap().append(b"abc").unwrap();

        let backend = FileBackend::open_read_only(&path).unwrap();
        assert!(!backend.is_writable());
        assert!(matches!(backend.append(b"x"), Err(StorageError::ReadOnly)));
        assert!(matches!(backend.truncate(0), Err(StorageError::ReadOnly)));
        assert!(backend.sync_data().is_ok());
    }

    #[test]
    fn read_only_does_not_create() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.bin");

        assert!(matches!(
            FileBackend::open_read_only(&path),
            Err(StorageError::Io(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn truncate_drops_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal-000001.log");
        let backend = FileBackend::open(&path).unwrap();
        backend.append(b"complete|partial").unwrap();

        backend.truncate(8).unwrap();
        assert_eq!(backend.size().unwrap(), 8);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8);

        assert_eq!(backend.append(b"!").unwrap(), 8);
        assert_eq!(&backend.read_at(0, 9).unwrap(), b"complete!");
    }

    #[test]
    fn truncate_cannot_grow() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("wal-000001.log")).unwrap();
        backend.append(b"abc").unwrap();

        assert!(matches!(
            backend.truncate(10),
            Err(StorageError::InvalidTruncate {
                requested: 10,
                size: 3
            })
        ));
    }

    #[test]
    fn empty_append_returns_current_end() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("wal-000001.log")).unwrap();
        backend.append(b"x").unwrap();

        assert_eq!(backend.append(b"").unwrap(), 1);
        assert_eq!(backend.size().unwrap(), 1);
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("wal").join("wal-000001.log");

        let backend = FileBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert_eq!(backend.path(), path);
    }

    #[test]
    fn sync_from_another_thread() {
        let dir = tempdir().unwrap();
        let backend = std::sync::Arc::new(FileBackend::open(&dir.path().join("wal-000001.log")).unwrap());

        let syncer = {
            let backend = std::sync::Arc::clone(&backend);
            std::thread::spawn(move || {
                for _ in 0..10 {
                    backend.sync_data().unwrap();
                }
            })
        };
        for i in 0..100u8 {
            backend.append(&[i]).unwrap();
        }
        syncer.join().unwrap();
        assert_eq!(backend.size().unwrap(), 100);
    }
}
