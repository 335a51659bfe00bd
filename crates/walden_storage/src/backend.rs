//! Storage backend trait definition.

use crate::error::StorageResult;

/// A byte store holding one log or snapshot file.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `sync_data` makes every previously appended byte survive a crash
/// - All methods may be called concurrently from different threads
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range extends past
    /// the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is read-only or an I/O error occurs.
    fn append(&self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&self) -> StorageResult<()>;

    /// Forces file contents (not necessarily metadata) to stable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync_data(&self) -> StorageResult<()>;

    /// Forces file contents and metadata to stable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&self) -> StorageResult<()>;

    /// Returns the current size in bytes, which is where the next append lands.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Cuts the storage down to `new_size` bytes.
    ///
    /// Used to drop a partially written record at the tail of a log file.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is read-only, if `new_size` is larger
    /// than the current size, or if an I/O error occurs.
    fn truncate(&self, new_size: u64) -> StorageResult<()>;
}
