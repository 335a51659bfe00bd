//! Read-only and writable log files.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::types::{Durability, RecordNumber};
use crate::wal::flusher::{FailureHook, Flusher};
use crate::wal::iterator::RecordIterator;
use crate::wal::record::{encode_record, LogRecord};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walden_storage::{FileBackend, StorageBackend};

/// Settings shared by every log file of one log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFileOptions {
    /// Largest payload accepted on write and on read.
    pub max_payload_size: u32,
    /// Batching window of the background flusher.
    pub flush_interval: Duration,
}

impl Default for LogFileOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for LogFileOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_payload_size: config.max_payload_size,
            flush_interval: config.flush_interval,
        }
    }
}

/// Outcome of replaying one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileReplay {
    /// Records handed to the consumer.
    pub records: u64,
    /// First record number in the file.
    pub first_record_number: Option<RecordNumber>,
    /// Last record number in the file.
    pub last_record_number: Option<RecordNumber>,
    /// Whether an incomplete trailing record was skipped.
    pub torn_tail: bool,
}

/// A log or snapshot file opened for replay.
pub struct ReadOnlyLogFile {
    path: PathBuf,
    backend: Box<dyn StorageBackend>,
    options: LogFileOptions,
}

impl ReadOnlyLogFile {
    /// Opens an existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open(path: &Path, options: LogFileOptions) -> CoreResult<Self> {
        let backend = FileBackend::open_read_only(path)?;
        Ok(Self::from_backend(path, Box::new(backend), options))
    }

    /// Wraps an already opened backend.
    pub fn from_backend(
        path: impl Into<PathBuf>,
        backend: Box<dyn StorageBackend>,
        options: LogFileOptions,
    ) -> Self {
        Self {
            path: path.into(),
            backend,
            options,
        }
    }

    /// Path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the file in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be read.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Returns a streaming iterator over the file's records.
    ///
    /// # Errors
    ///
    /// Returns an error if the file size cannot be read.
    pub fn records(&self) -> CoreResult<RecordIterator<'_>> {
        RecordIterator::new(&*self.backend, self.options.max_payload_size)
    }

    /// Hands every complete record to `consumer` in file order.
    ///
    /// Stops at the first corrupt record or consumer error.
    ///
    /// # Errors
    ///
    /// Returns corruption errors from the file and errors from `consumer`.
    pub fn replay_all<F>(&self, mut consumer: F) -> CoreResult<FileReplay>
    where
        F: FnMut(LogRecord) -> CoreResult<()>,
    {
        let started = Instant::now();
        debug!(path = %self.path.display(), "Replaying log file");

        let mut summary = FileReplay::default();
        let mut records = self.records()?;
        for item in records.by_ref() {
            let (_, record) = item?;
            summary
                .first_record_number
                .get_or_insert(record.record_number);
            summary.last_record_number = Some(record.record_number);
            consumer(record)?;
            summary.records += 1;
        }
        summary.torn_tail = records.has_torn_tail();

        info!(
            path = %self.path.display(),
            records = summary.records,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Replayed log file"
        );
        Ok(summary)
    }
}

/// A log file opened for appending.
///
/// Opening scans the whole file: an incomplete trailing record left by a
/// crash is truncated away, anything else that fails validation aborts the
/// open. Record numbering continues after the last complete record, or
/// starts at the caller's default for an empty file.
pub struct WritableLogFile {
    path: PathBuf,
    backend: Arc<dyn StorageBackend>,
    next_record_number: RecordNumber,
    options: LogFileOptions,
    frame: Vec<u8>,
    flusher: Option<Flusher>,
    on_flush_failure: Option<FailureHook>,
    failed: bool,
    closed: bool,
}

impl WritableLogFile {
    /// Opens or creates a log file for appending.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or holds corrupt records.
    pub fn open(
        path: &Path,
        default_next: RecordNumber,
        options: LogFileOptions,
    ) -> CoreResult<Self> {
        let backend = FileBackend::open(path)?;
        Self::from_backend(path, Arc::new(backend), default_next, options)
    }

    /// Opens a log file over an arbitrary backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend holds corrupt records.
    pub fn from_backend(
        path: impl Into<PathBuf>,
        backend: Arc<dyn StorageBackend>,
        default_next: RecordNumber,
        options: LogFileOptions,
    ) -> CoreResult<Self> {
        let path = path.into();
        let (valid_end, last, torn) = {
            let mut records = RecordIterator::new(&*backend, options.max_payload_size)?;
            for item in records.by_ref() {
                item?;
            }
            (
                records.valid_end(),
                records.last_record_number(),
                records.has_torn_tail(),
            )
        };

        if torn {
            let size = backend.size()?;
            warn!(
                path = %path.display(),
                discarded = size - valid_end,
                "Truncating incomplete record at end of log file"
            );
            backend.truncate(valid_end)?;
            backend.sync_data()?;
        }

        let next_record_number = last.map_or(default_next, RecordNumber::next);
        debug!(path = %path.display(), next = %next_record_number, "Opened log file for writing");
        Ok(Self {
            path,
            backend,
            next_record_number,
            options,
            frame: Vec::new(),
            flusher: None,
            on_flush_failure: None,
            failed: false,
            closed: false,
        })
    }

    /// Path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Registers a callback for background sync failures.
    ///
    /// Batched writes are synced by a background thread. When one of those
    /// syncs fails, `hook` runs on that thread at once, before any later
    /// call on this file reports the failure. Takes effect for the flusher
    /// started by the next batched write, so set it right after opening.
    pub fn on_flush_failure(&mut self, hook: impl Fn(&CoreError) + Send + Sync + 'static) {
        self.on_flush_failure = Some(Arc::new(hook));
    }

    /// Number the next record will receive.
    #[must_use]
    pub fn next_record_number(&self) -> RecordNumber {
        self.next_record_number
    }

    /// Current size of the file in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be read.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Appends one record and returns its number.
    ///
    /// # Errors
    ///
    /// Returns an error for an oversized payload, a closed or failed file,
    /// or an I/O failure. After an I/O failure the file refuses all writes.
    pub fn write(
        &mut self,
        type_id: u32,
        payload: &[u8],
        durability: Durability,
    ) -> CoreResult<RecordNumber> {
        self.write_slice(type_id, payload, 0, payload.len(), durability)
    }

    /// Appends `payload[offset..offset + len]` as one record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the range is out of bounds, otherwise
    /// the same errors as [`write`](Self::write).
    pub fn write_slice(
        &mut self,
        type_id: u32,
        payload: &[u8],
        offset: usize,
        len: usize,
        durability: Durability,
    ) -> CoreResult<RecordNumber> {
        if self.closed {
            return Err(CoreError::Closed);
        }
        if self.failed {
            return Err(CoreError::Poisoned);
        }
        let payload = offset
            .checked_add(len)
            .and_then(|end| payload.get(offset..end))
            .ok_or_else(|| {
                CoreError::invalid_operation(format!(
                    "range {offset}+{len} outside payload of {} bytes",
                    payload.len()
                ))
            })?;
        if payload.len() > self.options.max_payload_size as usize {
            return Err(CoreError::invalid_operation(format!(
                "payload of {} bytes exceeds the limit of {}",
                payload.len(),
                self.options.max_payload_size
            )));
        }

        let record_number = self.next_record_number;
        self.frame.clear();
        encode_record(&mut self.frame, type_id, payload, record_number)?;
        if let Err(e) = self.persist_frame(durability) {
            self.failed = true;
            return Err(e);
        }
        self.next_record_number = record_number.next();
        Ok(record_number)
    }

    fn persist_frame(&mut self, durability: Durability) -> CoreResult<()> {
        if let Some(flusher) = &self.flusher {
            flusher.check()?;
        }
        self.backend.append(&self.frame)?;
        match durability {
            Durability::None => {}
            Durability::Immediate => self.backend.sync_data()?,
            Durability::Batched => {
                if self.flusher.is_none() {
                    self.flusher = Some(Flusher::start(
                        Arc::clone(&self.backend),
                        self.options.flush_interval,
                        &self.path,
                        self.on_flush_failure.clone(),
                    )?);
                }
                if let Some(flusher) = &self.flusher {
                    flusher.request()?;
                }
            }
        }
        Ok(())
    }

    /// Flushes pending batched writes, syncs and closes the file.
    ///
    /// # Errors
    ///
    /// Returns the first background flush or sync failure.
    pub fn close(mut self) -> CoreResult<()> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> CoreResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let flushed = self.flusher.take().map_or(Ok(()), Flusher::shutdown);
        let synced = self.backend.sync_data().map_err(CoreError::from);
        debug!(path = %self.path.display(), "Closed log file");
        flushed.and(synced)
    }
}

impl Drop for WritableLogFile {
    fn drop(&mut self) {
        if let Err(e) = self.close_inner() {
            warn!(path = %self.path.display(), error = %e, "Failed to close log file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::record::{HEADER_SIZE, RECORD_OVERHEAD};
    use std::fs;
    use tempfile::tempdir;
    use walden_storage::{InMemoryBackend, StorageError, StorageResult};

    fn options() -> LogFileOptions {
        LogFileOptions {
            max_payload_size: 1024,
            flush_interval: Duration::from_millis(1),
        }
    }

    fn read_all(path: &Path) -> Vec<LogRecord> {
        let file = ReadOnlyLogFile::open(path, options()).unwrap();
        let mut records = Vec::new();
        file.replay_all(|r| {
            records.push(r);
            Ok(())
        })
        .unwrap();
        records
    }

    #[test]
    fn write_then_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal-000001.log");

        let mut file = WritableLogFile::open(&path, RecordNumber::FIRST, options()).unwrap();
        assert_eq!(file.write(7, b"one", Durability::None).unwrap(), RecordNumber(1));
        assert_eq!(file.write(7, b"two", Durability::Immediate).unwrap(), RecordNumber(2));
        assert_eq!(file.write(8, b"three", Durability::Batched).unwrap(), RecordNumber(3));
        file.close().unwrap();

        let records = read_all(&path);
        let payloads: Vec<&[u8]> = records.iter().map(|r| r.payload.as_slice()).collect();
        assert_eq!(payloads, vec![&b"one"[..], b"two", b"three"]);
        assert_eq!(records[2].type_id, 8);
    }

    #[test]
    fn reopen_continues_numbering() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal-000001.log");

        let mut file = WritableLogFile::open(&path, RecordNumber(40), options()).unwrap();
        file.write(1, b"a", Durability::None).unwrap();
        file.write(1, b"b", Durability::None).unwrap();
        file.close().unwrap();

        let mut file = WritableLogFile::open(&path, RecordNumber(1), options()).unwrap();
        assert_eq!(file.next_record_number(), RecordNumber(42));
        assert_eq!(file.write(1, b"c", Durability::None).unwrap(), RecordNumber(42));
    }

    #[test]
    fn reopen_truncates_partial_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal-000001.log");

        let mut file = WritableLogFile::open(&path, RecordNumber::FIRST, options()).unwrap();
        file.write(1, b"kept", Durability::None).unwrap();
        file.write(1, b"lost", Durability::None).unwrap();
        file.close().unwrap();

        let full = fs::read(&path).unwrap();
        let first_len = RECORD_OVERHEAD + 4;
        fs::write(&path, &full[..first_len + HEADER_SIZE + 2]).unwrap();

        let mut file = WritableLogFile::open(&path, RecordNumber::FIRST, options()).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), first_len as u64);
        assert_eq!(file.write(1, b"next", Durability::None).unwrap(), RecordNumber(2));
        file.close().unwrap();

        let records = read_all(&path);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].payload, b"next");
    }

    #[test]
    fn open_rejects_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal-000001.log");

        let mut file = WritableLogFile::open(&path, RecordNumber::FIRST, options()).unwrap();
        file.write(1, b"payload", Durability::None).unwrap();
        file.close().unwrap();

        let mut bytes = fs::read(&path).unwrap();
        bytes[HEADER_SIZE + 1] ^= 0x40;
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            WritableLogFile::open(&path, RecordNumber::FIRST, options()),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn open_keeps_record_with_damaged_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal-000001.log");

        let mut file = WritableLogFile::open(&path, RecordNumber::FIRST, options()).unwrap();
        file.write(1, b"first", Durability::None).unwrap();
        file.write(1, b"committed", Durability::None).unwrap();
        file.close().unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let len_low = RECORD_OVERHEAD + 5 + HEADER_SIZE - 1;
        bytes[len_low] ^= 0x10;
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            WritableLogFile::open(&path, RecordNumber::FIRST, options()),
            Err(CoreError::Corruption { .. })
        ));
        assert_eq!(fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn write_slice_bounds() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut file =
            WritableLogFile::from_backend("mem", backend, RecordNumber::FIRST, options()).unwrap();

        file.write_slice(1, b"abcdef", 2, 3, Durability::None).unwrap();
        assert!(matches!(
            file.write_slice(1, b"abc", 2, 5, Durability::None),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert!(matches!(
            file.write_slice(1, b"abc", usize::MAX, 2, Durability::None),
            Err(CoreError::InvalidOperation { .. })
        ));
        // rejected writes do not consume record numbers
        assert_eq!(file.next_record_number(), RecordNumber(2));
    }

    #[test]
    fn oversized_payload_rejected() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut file =
            WritableLogFile::from_backend("mem", backend, RecordNumber::FIRST, options()).unwrap();
        let big = vec![0u8; 1025];
        assert!(matches!(
            file.write(1, &big, Durability::None),
            Err(CoreError::InvalidOperation { .. })
        ));
        file.write(1, &big[..1024], Durability::None).unwrap();
    }

    #[test]
    fn immediate_writes_sync() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut file = WritableLogFile::from_backend(
            "mem",
            Arc::clone(&backend) as Arc<dyn StorageBackend>,
            RecordNumber::FIRST,
            options(),
        )
        .unwrap();

        file.write(1, b"x", Durability::None).unwrap();
        assert_eq!(backend.sync_count(), 0);
        file.write(1, b"y", Durability::Immediate).unwrap();
        assert_eq!(backend.sync_count(), 1);
    }

    #[test]
    fn batched_writes_synced_by_close() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut file = WritableLogFile::from_backend(
            "mem",
            Arc::clone(&backend) as Arc<dyn StorageBackend>,
            RecordNumber::FIRST,
            options(),
        )
        .unwrap();

        for i in 0..20u8 {
            file.write(1, &[i], Durability::Batched).unwrap();
        }
        file.close().unwrap();
        assert!(backend.sync_count() >= 2);
    }

    /// Accepts appends but fails every sync.
    #[derive(Default)]
    struct UnsyncableBackend {
        inner: InMemoryBackend,
    }

    impl StorageBackend for UnsyncableBackend {
        fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
            self.inner.read_at(offset, len)
        }
        fn append(&self, data: &[u8]) -> StorageResult<u64> {
            self.inner.append(data)
        }
        fn flush(&self) -> StorageResult<()> {
            Ok(())
        }
        fn sync_data(&self) -> StorageResult<()> {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "device gone",
            )))
        }
        fn sync(&self) -> StorageResult<()> {
            self.sync_data()
        }
        fn size(&self) -> StorageResult<u64> {
            self.inner.size()
        }
        fn truncate(&self, new_size: u64) -> StorageResult<()> {
            self.inner.truncate(new_size)
        }
    }

    #[test]
    fn background_flush_failure_surfaces_on_later_write() {
        let backend = Arc::new(UnsyncableBackend::default());
        let mut file =
            WritableLogFile::from_backend("mem", backend, RecordNumber::FIRST, options()).unwrap();

        file.write(1, b"a", Durability::Batched).unwrap();
        let mut failure = None;
        for _ in 0..500 {
            match file.write(1, b"b", Durability::None) {
                Ok(_) => std::thread::sleep(Duration::from_millis(2)),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        assert!(matches!(failure, Some(CoreError::FlushFailed { .. })));
        assert!(matches!(
            file.write(1, b"c", Durability::None),
            Err(CoreError::Poisoned)
        ));
    }

    #[test]
    fn background_flush_failure_runs_hook_without_later_write() {
        let backend = Arc::new(UnsyncableBackend::default());
        let mut file =
            WritableLogFile::from_backend("mem", backend, RecordNumber::FIRST, options()).unwrap();
        let (sender, receiver) = std::sync::mpsc::channel();
        let sender = parking_lot::Mutex::new(sender);
        file.on_flush_failure(move |e| {
            let _ = sender.lock().send(e.to_string());
        });

        file.write(1, b"a", Durability::Batched).unwrap();
        let message = receiver
            .recv_timeout(Duration::from_secs(5))
            .expect("hook should run");
        assert!(message.contains("device gone"), "{message}");
        assert!(matches!(
            file.write(1, b"b", Durability::None),
            Err(CoreError::FlushFailed { .. })
        ));
    }

    #[test]
    fn read_only_open_of_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(ReadOnlyLogFile::open(&dir.path().join("absent.log"), options()).is_err());
    }
}
