//! Crash simulation for log files.
//!
//! Two ways to get a log into the state a crash would leave behind:
//!
//! 1. **Backend level**: [`CrashableBackend`] wraps any storage backend and
//!    stops writing part way through an append, or fails syncs.
//! 2. **File level**: helpers that truncate, extend or corrupt files in a
//!    closed log directory before it is reopened.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use walden_testkit::crash::{chop_bytes, flip_byte};
//!
//! chop_bytes(&log.file("wal-000001.log"), 3)?; // torn final record
//! flip_byte(&log.file("wal-000001.log"), 30)?;  // checksum mismatch
//! ```

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use walden_storage::{StorageBackend, StorageError, StorageResult};

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Arc<dyn StorageBackend>,
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
}

impl CrashableBackend {
    /// Creates a new crashable backend wrapping an inner backend.
    pub fn new(inner: Arc<dyn StorageBackend>) -> Self {
        Self {
            inner,
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
            fail_on_sync: AtomicBool::new(false),
        }
    }

    /// Crashes once `bytes` more bytes have been appended.
    ///
    /// The append that crosses the limit writes only the bytes below it.
    pub fn crash_after(&self, bytes: usize) {
        self.bytes_written.store(0, Ordering::SeqCst);
        self.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Sets whether syncs should fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    fn crash(&self, what: &str) -> StorageError {
        self.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }

    fn check_sync(&self) -> StorageResult<()> {
        if self.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.crash("sync"));
        }
        Ok(())
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&self, bytes: &[u8]) -> StorageResult<u64> {
        if self.has_crashed() {
            return Err(self.crash("write"));
        }
        let current = self.bytes_written.fetch_add(bytes.len(), Ordering::SeqCst);
        let threshold = self.crash_after_bytes.load(Ordering::SeqCst);

        if current >= threshold {
            return Err(self.crash("write"));
        }
        if current + bytes.len() > threshold {
            let partial = threshold - current;
            self.inner.append(&bytes[..partial])?;
            return Err(self.crash("partial write"));
        }

        self.inner.append(bytes)
    }

    fn flush(&self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn sync_data(&self) -> StorageResult<()> {
        self.check_sync()?;
        self.inner.sync_data()
    }

    fn sync(&self) -> StorageResult<()> {
        self.check_sync()?;
        self.inner.sync()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn truncate(&self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}

/// Cuts a file down to `len` bytes.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or resized.
pub fn truncate_file(path: &Path, len: u64) -> io::Result<()> {
    OpenOptions::new().write(true).open(path)?.set_len(len)
}

/// Removes the last `count` bytes of a file, as a crash mid-append would.
///
/// # Errors
///
/// Returns an error if the file is shorter than `count` or cannot be resized.
pub fn chop_bytes(path: &Path, count: u64) -> io::Result<()> {
    let len = std::fs::metadata(path)?.len();
    let new_len = len.checked_sub(count).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("cannot chop {count} bytes from a {len}-byte file"),
        )
    })?;
    truncate_file(path, new_len)
}

/// Inverts every bit of the byte at `offset`.
///
/// # Errors
///
/// Returns an error if the offset is past the end or the file cannot be
/// rewritten.
pub fn flip_byte(path: &Path, offset: usize) -> io::Result<()> {
    let mut bytes = std::fs::read(path)?;
    let byte = bytes.get_mut(offset).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("offset {offset} is past the end of the file"),
        )
    })?;
    *byte ^= 0xFF;
    std::fs::write(path, bytes)
}

/// Appends raw bytes to a file.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or written.
pub fn append_bytes(path: &Path, bytes: &[u8]) -> io::Result<()> {
    OpenOptions::new().append(true).open(path)?.write_all(bytes)
}

/// Appends `count` zero bytes, as a crash after the file was extended but
/// before the data landed would.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or written.
pub fn append_zeros(path: &Path, count: usize) -> io::Result<()> {
    append_bytes(path, &vec![0; count])
}
