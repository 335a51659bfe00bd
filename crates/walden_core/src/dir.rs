//! Log directory management.
//!
//! This module handles the file system layout of a Walden log:
//!
//! ```text
//! <wal_dir>/
//! ├─ metadata.json        # Descriptor naming the live files
//! ├─ LOCK                 # Advisory lock for single-writer
//! ├─ snapshot-000002.bin  # Latest snapshot
//! ├─ wal-000002.log       # Log files written since that snapshot
//! └─ wal-000003.log
//! ```
//!
//! The LOCK file ensures only one process writes to the directory at a time.
//! Files not named by the descriptor are leftovers of earlier generations.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// Descriptor file name.
pub const METADATA_FILE: &str = "metadata.json";
/// Lock file name.
pub const LOCK_FILE: &str = "LOCK";
/// Prefix of log file names.
pub const WAL_PREFIX: &str = "wal";
/// Extension of log file names.
pub const WAL_EXTENSION: &str = ".log";
/// Prefix of snapshot file names.
pub const SNAPSHOT_PREFIX: &str = "snapshot";
/// Extension of snapshot file names.
pub const SNAPSHOT_EXTENSION: &str = ".bin";
/// Suffix of files that were never made live.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Builds `<prefix>-<number>.<ext>` with the number zero-padded to six digits.
#[must_use]
pub fn file_name(prefix: &str, number: u64, extension: &str) -> String {
    format!("{prefix}-{number:06}{extension}")
}

/// Extracts the generation number from a log or snapshot file name.
///
/// The number is the text between the last `-` and the four-character
/// extension, and must be positive.
///
/// # Errors
///
/// Returns [`CoreError::InvalidFileName`] for any other shape.
pub fn extract_number_from_file_name(name: &str) -> CoreResult<u64> {
    let invalid = || CoreError::InvalidFileName {
        name: name.to_string(),
    };
    let stem = name
        .len()
        .checked_sub(4)
        .and_then(|end| name.get(..end))
        .ok_or_else(invalid)?;
    let dash = stem.rfind('-').ok_or_else(invalid)?;
    let digits = &stem[dash + 1..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    match digits.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(invalid()),
    }
}

/// Returns the name following `current` in its series.
///
/// # Errors
///
/// Returns [`CoreError::InvalidFileName`] if `current` cannot be parsed.
pub fn next_file_name(current: &str, prefix: &str, extension: &str) -> CoreResult<String> {
    Ok(file_name(
        prefix,
        extract_number_from_file_name(current)? + 1,
        extension,
    ))
}

/// Manages the log directory and its lock.
///
/// # Thread Safety
///
/// A locking `WalDir` holds an exclusive lock on the directory until it
/// is dropped or [`unlock`](WalDir::unlock)ed. Only one such instance can
/// exist per directory at a time.
#[derive(Debug)]
pub struct WalDir {
    /// Root directory path.
    path: PathBuf,
    /// Lock file handle (held for exclusive access).
    lock_file: Option<File>,
}

impl WalDir {
    /// Opens or creates a log directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `DirectoryLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool, lock: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("log directory does not exist: {}", path.display()),
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_operation(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = if lock {
            let lock_file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path.join(LOCK_FILE))?;
            if lock_file.try_lock_exclusive().is_err() {
                return Err(CoreError::DirectoryLocked {
                    path: path.to_path_buf(),
                });
            }
            Some(lock_file)
        } else {
            None
        };

        Ok(Self {
            path: path.to_path_buf(),
            lock_file,
        })
    }

    /// Returns the path to the log directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of a file inside the directory.
    #[must_use]
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Returns the path to the descriptor.
    #[must_use]
    pub fn metadata_path(&self) -> PathBuf {
        self.path.join(METADATA_FILE)
    }

    /// Whether this instance holds the directory lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock_file.is_some()
    }

    /// Releases the directory lock.
    pub fn unlock(&mut self) {
        // closing the handle releases the advisory lock
        self.lock_file = None;
    }

    /// Creates an empty file if none exists under `name`.
    pub(crate) fn ensure_file(&self, name: &str) -> CoreResult<PathBuf> {
        let path = self.file_path(name);
        OpenOptions::new().append(true).create(true).open(&path)?;
        Ok(path)
    }

    /// Creates an empty temporary file that is deleted unless persisted.
    pub(crate) fn create_temp(&self, prefix: &str, suffix: &str) -> CoreResult<TempPath> {
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(&self.path)?;
        Ok(file.into_temp_path())
    }

    /// Writes `contents` to a synced temporary file, ready to be renamed.
    pub(crate) fn write_temp(
        &self,
        prefix: &str,
        suffix: &str,
        contents: &[u8],
    ) -> CoreResult<TempPath> {
        let mut file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(&self.path)?;
        file.write_all(contents)?;
        file.as_file().sync_all()?;
        Ok(file.into_temp_path())
    }

    /// Renames a temporary file over `name`.
    pub(crate) fn persist(&self, temp: TempPath, name: &str) -> CoreResult<PathBuf> {
        let path = self.file_path(name);
        temp.persist(&path).map_err(|e| CoreError::Io(e.error))?;
        Ok(path)
    }

    /// Syncs the directory to ensure metadata updates are durable.
    ///
    /// After creating, renaming, or deleting files, the directory must be
    /// fsynced for the new entries to survive a crash.
    #[cfg(unix)]
    pub fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    /// Syncs the directory to ensure metadata updates are durable.
    ///
    /// NTFS journals metadata and does not support directory fsync.
    #[cfg(not(unix))]
    pub fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("new_wal");

        let dir = WalDir::open(&path, true, true).unwrap();
        assert!(path.is_dir());
        assert!(dir.is_locked());
    }

    #[test]
    fn open_fails_if_not_exists_and_no_create() {
        let temp = tempdir().unwrap();
        assert!(WalDir::open(&temp.path().join("nonexistent"), false, true).is_err());
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("locked");

        let _first = WalDir::open(&path, true, true).unwrap();
        assert!(matches!(
            WalDir::open(&path, true, true),
            Err(CoreError::DirectoryLocked { .. })
        ));
        // readers that skip the lock are unaffected
        assert!(WalDir::open(&path, true, false).is_ok());
    }

    #[test]
    fn unlock_allows_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("relock");

        let mut first = WalDir::open(&path, true, true).unwrap();
        first.unlock();
        assert!(!first.is_locked());
        let _second = WalDir::open(&path, true, true).unwrap();
    }

    #[test]
    fn temp_files_vanish_unless_persisted() {
        let temp = tempdir().unwrap();
        let dir = WalDir::open(temp.path(), true, false).unwrap();

        let dropped = dir.write_temp("metadata", ".json.tmp", b"{}").unwrap();
        let dropped_path = dropped.to_path_buf();
        drop(dropped);
        assert!(!dropped_path.exists());

        let kept = dir.write_temp("metadata", ".json.tmp", b"{}").unwrap();
        let path = dir.persist(kept, "kept.json").unwrap();
        assert_eq!(fs::read(path).unwrap(), b"{}");
    }

    #[test]
    fn file_names() {
        assert_eq!(file_name(WAL_PREFIX, 1, WAL_EXTENSION), "wal-000001.log");
        assert_eq!(
            file_name(SNAPSHOT_PREFIX, 1_234_567, SNAPSHOT_EXTENSION),
            "snapshot-1234567.bin"
        );
        assert_eq!(
            next_file_name("wal-000009.log", WAL_PREFIX, WAL_EXTENSION).unwrap(),
            "wal-000010.log"
        );
    }

    #[test]
    fn number_extraction() {
        assert_eq!(extract_number_from_file_name("wal-000042.log").unwrap(), 42);
        assert_eq!(
            extract_number_from_file_name("my-snapshot-7.bin").unwrap(),
            7
        );
        for bad in ["wal-000000.log", "wal.log", "wal-.log", "wal-1x.log", "x"] {
            assert!(
                matches!(
                    extract_number_from_file_name(bad),
                    Err(CoreError::InvalidFileName { .. })
                ),
                "{bad}"
            );
        }
    }
}
