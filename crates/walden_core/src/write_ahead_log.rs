//! The write-ahead log façade.

use crate::config::{Config, FatalErrorHandler};
use crate::error::{CoreError, CoreResult};
use crate::metadata::{Descriptor, MetadataStore};
use crate::registry::{CodecRegistrator, CodecRegistry, WalEntry};
use crate::subscription::{
    Dispatch, EventConsumer, EventDispatch, Registration, SnapshotConsumer, SnapshotDispatch,
    SnapshotProducer, SnapshotWriter, Subscribers,
};
use crate::types::{Durability, RecordNumber};
use crate::wal::{LogFileOptions, LogRecord, ReadOnlyLogFile, WritableLogFile};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use walden_codec::peek_serde_id;

/// Counts from one [`WriteAheadLog::replay`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    /// Snapshot records read.
    pub snapshot_entries: u64,
    /// Log records read.
    pub events: u64,
    /// Log files read.
    pub wal_files: usize,
    /// Number the next appended record will receive.
    pub next_record_number: RecordNumber,
    /// Wall time spent.
    pub elapsed: Duration,
}

/// Result of a successful [`WriteAheadLog::take_snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotStats {
    /// Entries the producers wrote.
    pub entries: u64,
    /// The new snapshot file.
    pub snapshot_file: PathBuf,
    /// Record number the new log file starts at.
    pub next_record_number: RecordNumber,
}

/// Poison flag shared with the background flushers of the log's files.
struct FatalState {
    directory: PathBuf,
    poisoned: AtomicBool,
    handler: FatalErrorHandler,
}

impl FatalState {
    fn poison(&self, err: &CoreError) {
        if !self.poisoned.swap(true, Ordering::SeqCst) {
            error!(path = %self.directory.display(), error = %err, "Fatal write-ahead log error");
            self.handler.call(err);
        }
    }
}

/// Opens a log file whose background sync failures poison the log.
fn open_log_file(
    path: &Path,
    default_next: RecordNumber,
    options: LogFileOptions,
    fatal: &Arc<FatalState>,
) -> CoreResult<WritableLogFile> {
    let mut file = WritableLogFile::open(path, default_next, options)?;
    watch_flushes(&mut file, fatal);
    Ok(file)
}

fn watch_flushes(file: &mut WritableLogFile, fatal: &Arc<FatalState>) {
    let fatal = Arc::clone(fatal);
    file.on_flush_failure(move |err| fatal.poison(err));
}

struct WriterState {
    metadata: MetadataStore,
    current: Option<WritableLogFile>,
    scratch: Vec<u8>,
}

/// An append-only, checksummed log of typed entries with snapshots.
///
/// The log lives in one directory: a descriptor, the latest snapshot and
/// the log files written since. [`append`](Self::append) encodes an entry
/// through the [`CodecRegistry`] and writes it to the current log file.
/// [`replay`](Self::replay) feeds the snapshot and then every later record
/// to the registered consumers. [`take_snapshot`](Self::take_snapshot)
/// asks the producers for current state and starts a new generation.
///
/// # Thread Safety
///
/// All operations serialize on one writer lock. Record numbers are
/// assigned in lock order, so they match append order exactly.
///
/// # Fatal Errors
///
/// I/O failures, corruption and failed replays leave the log in an unknown
/// state. The first such error is logged, passed to the configured
/// [`fatal_handler`](crate::Config::fatal_handler) and poisons the log:
/// every later operation returns [`CoreError::Poisoned`]. A failed
/// background sync of batched writes does this from the flusher thread as
/// soon as it happens.
///
/// # Example
///
/// ```rust,ignore
/// let wal = WriteAheadLog::open(dir, Config::default(), registry)?;
/// let _events = wal.register_event_consumer(|_: &Note| true, apply_note);
/// wal.replay()?;
/// wal.append(&Note("hello".into()), Durability::Batched)?;
/// ```
pub struct WriteAheadLog {
    directory: PathBuf,
    config: Config,
    options: LogFileOptions,
    registry: CodecRegistry,
    subscribers: Arc<Subscribers>,
    writer: Mutex<WriterState>,
    fatal: Arc<FatalState>,
}

impl WriteAheadLog {
    /// Opens or creates the log in `path`.
    ///
    /// Truncates an incomplete trailing record in the current log file.
    /// Does not replay.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is locked, the descriptor is
    /// invalid or the current log file is corrupt.
    pub fn open(
        path: impl AsRef<Path>,
        config: Config,
        registry: CodecRegistry,
    ) -> CoreResult<Arc<Self>> {
        let path = path.as_ref();
        let options = LogFileOptions::from(&config);
        let metadata = MetadataStore::open(path, &config)?;
        let fatal = Arc::new(FatalState {
            directory: path.to_path_buf(),
            poisoned: AtomicBool::new(false),
            handler: config.fatal_handler.clone(),
        });
        let current = open_log_file(
            &metadata.latest_wal_file()?,
            metadata.first_record_number_of_latest_wal_file(),
            options,
            &fatal,
        )?;

        info!(
            path = %path.display(),
            codecs = registry.len(),
            next = %current.next_record_number(),
            "Opened write-ahead log"
        );
        Ok(Arc::new(Self {
            directory: path.to_path_buf(),
            config,
            options,
            registry,
            subscribers: Arc::new(Subscribers::default()),
            writer: Mutex::new(WriterState {
                metadata,
                current: Some(current),
                scratch: Vec::new(),
            }),
            fatal,
        }))
    }

    /// Opens the log with codecs from `registrators`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateSerdeId`] or any error of [`open`](Self::open).
    pub fn open_with(
        path: impl AsRef<Path>,
        config: Config,
        registrators: &[&dyn CodecRegistrator],
    ) -> CoreResult<Arc<Self>> {
        Self::open(path, config, CodecRegistry::from_registrators(registrators)?)
    }

    /// The log directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The codecs this log was opened with.
    #[must_use]
    pub fn registry(&self) -> &CodecRegistry {
        &self.registry
    }

    /// Whether a fatal error has poisoned the log.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.fatal.poisoned.load(Ordering::SeqCst)
    }

    /// A copy of the descriptor currently on disk.
    #[must_use]
    pub fn descriptor(&self) -> Descriptor {
        self.writer.lock().metadata.descriptor().clone()
    }

    /// Number the next appended record will receive.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Closed`] after [`close`](Self::close).
    pub fn next_record_number(&self) -> CoreResult<RecordNumber> {
        self.writer
            .lock()
            .current
            .as_ref()
            .map(WritableLogFile::next_record_number)
            .ok_or(CoreError::Closed)
    }

    /// Subscribes to replayed events of type `E` that pass `filter`.
    pub fn register_event_consumer<E, P, C>(&self, filter: P, consumer: C) -> Registration
    where
        E: WalEntry,
        P: Fn(&E) -> bool + Send + Sync + 'static,
        C: EventConsumer<E> + 'static,
    {
        let dispatch: Arc<dyn Dispatch> = Arc::new(EventDispatch::new(filter, consumer));
        self.subscribers.add_event_consumer(dispatch)
    }

    /// Subscribes to replayed snapshot entries of type `S` that pass `filter`.
    pub fn register_snapshot_consumer<S, P, C>(&self, filter: P, consumer: C) -> Registration
    where
        S: WalEntry,
        P: Fn(&S) -> bool + Send + Sync + 'static,
        C: SnapshotConsumer<S> + 'static,
    {
        let dispatch: Arc<dyn Dispatch> = Arc::new(SnapshotDispatch::new(filter, consumer));
        self.subscribers.add_snapshot_consumer(dispatch)
    }

    /// Adds a contributor to future snapshots.
    pub fn register_snapshot_producer<P>(&self, producer: P) -> Registration
    where
        P: SnapshotProducer + 'static,
    {
        self.subscribers.add_snapshot_producer(Arc::new(producer))
    }

    /// Appends one entry and returns its record number.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownType`] if no codec accepts the entry,
    /// [`CoreError::Poisoned`] or [`CoreError::Closed`] if the log is
    /// unusable, or the I/O error that poisoned it.
    pub fn append<E: WalEntry>(&self, entry: &E, durability: Durability) -> CoreResult<RecordNumber> {
        self.append_then(entry, durability, |record_number| record_number)
    }

    /// Appends one entry and runs `then` before releasing the writer lock.
    ///
    /// In-memory state changed inside `then` can never be missed by a
    /// concurrent snapshot, nor captured by one before its record exists.
    /// `then` runs only if the append succeeded and must not call back into
    /// the log.
    ///
    /// # Errors
    ///
    /// Same as [`append`](Self::append).
    pub fn append_then<E, R, F>(&self, entry: &E, durability: Durability, then: F) -> CoreResult<R>
    where
        E: WalEntry,
        F: FnOnce(RecordNumber) -> R,
    {
        self.ensure_healthy()?;
        let mut guard = self.writer.lock();
        let record_number = self
            .write_locked(&mut guard, entry, durability)
            .map_err(|e| self.escalate(e))?;
        Ok(then(record_number))
    }

    fn write_locked(
        &self,
        state: &mut WriterState,
        entry: &dyn WalEntry,
        durability: Durability,
    ) -> CoreResult<RecordNumber> {
        if state.current.is_none() {
            return Err(CoreError::Closed);
        }
        state.scratch.clear();
        let serde_id = self.registry.encode(entry, &mut state.scratch)?;
        self.rotate_if_needed(state)?;
        let file = state.current.as_mut().ok_or(CoreError::Closed)?;
        file.write(serde_id.as_u32(), &state.scratch, durability)
    }

    fn rotate_if_needed(&self, state: &mut WriterState) -> CoreResult<()> {
        let limit = self.config.max_log_file_size;
        let Some(file) = state.current.as_ref() else {
            return Ok(());
        };
        if limit == 0 || file.size()? < limit {
            return Ok(());
        }
        let next = file.next_record_number();
        if let Some(full) = state.current.take() {
            full.close()?;
        }
        let path = state.metadata.start_new_wal_file(next)?;
        state.current = Some(open_log_file(&path, next, self.options, &self.fatal)?);
        Ok(())
    }

    /// Feeds the latest snapshot and every later record to the consumers.
    ///
    /// Snapshot consumers are told the snapshot replay is starting, then
    /// receive each snapshot entry. Event consumers are then told the
    /// event replay is starting and receive each log record in record
    /// number order. Meant to run once, after registering consumers and
    /// before the first append.
    ///
    /// # Errors
    ///
    /// Every failure is fatal: corruption, an unknown serde id, a record
    /// number out of sequence, or an error from a consumer.
    pub fn replay(&self) -> CoreResult<ReplayStats> {
        self.ensure_healthy()?;
        let started = Instant::now();
        let guard = self.writer.lock();
        let Some(current) = guard.current.as_ref() else {
            return Err(CoreError::Closed);
        };
        let next_record_number = current.next_record_number();

        match self.replay_locked(&guard.metadata) {
            Ok((snapshot_entries, events, wal_files)) => {
                let stats = ReplayStats {
                    snapshot_entries,
                    events,
                    wal_files,
                    next_record_number,
                    elapsed: started.elapsed(),
                };
                info!(
                    snapshot_entries,
                    events,
                    wal_files,
                    elapsed_ms = stats.elapsed.as_millis() as u64,
                    "Replayed write-ahead log"
                );
                Ok(stats)
            }
            Err(e) => {
                self.poison(&e);
                Err(e)
            }
        }
    }

    fn replay_locked(&self, metadata: &MetadataStore) -> CoreResult<(u64, u64, usize)> {
        let snapshot_consumers = self.subscribers.snapshot_consumers();
        for consumer in &snapshot_consumers {
            consumer.replay_start().map_err(CoreError::consumer)?;
        }
        let snapshot = ReadOnlyLogFile::open(&metadata.latest_snapshot_file()?, self.options)?;
        let replayed = snapshot.replay_all(|record| {
            let entry = self.decode_record(&record)?;
            for consumer in &snapshot_consumers {
                consumer.dispatch(entry.as_ref()).map_err(CoreError::consumer)?;
            }
            Ok(())
        })?;
        if replayed.torn_tail {
            return Err(CoreError::corruption(format!(
                "snapshot {} ends in an incomplete record",
                snapshot.path().display()
            )));
        }
        let snapshot_entries = replayed.records;

        let event_consumers = self.subscribers.event_consumers();
        for consumer in &event_consumers {
            consumer.replay_start().map_err(CoreError::consumer)?;
        }
        let wal_files = metadata.wal_files_since_latest_snapshot();
        let latest = wal_files.len().saturating_sub(1);
        let mut expected: Option<RecordNumber> = None;
        let mut events = 0;
        for (index, path) in wal_files.iter().enumerate() {
            let file = ReadOnlyLogFile::open(path, self.options)?;
            let replayed = file.replay_all(|record| {
                if let Some(expected) = expected {
                    if record.record_number != expected {
                        return Err(CoreError::corruption(format!(
                            "{} follows {} across log files in {}",
                            record.record_number,
                            RecordNumber(expected.as_u64() - 1),
                            path.display()
                        )));
                    }
                }
                expected = Some(record.record_number.next());
                let entry = self.decode_record(&record)?;
                for consumer in &event_consumers {
                    consumer.dispatch(entry.as_ref()).map_err(CoreError::consumer)?;
                }
                Ok(())
            })?;

            if index == 0 {
                let resume = metadata.first_record_number_after_snapshot();
                if let Some(first) = replayed.first_record_number {
                    if first != resume {
                        return Err(CoreError::corruption(format!(
                            "{} starts at {first}, but replay after the snapshot resumes at {resume}",
                            path.display()
                        )));
                    }
                }
            }
            if index != latest && replayed.records == 0 {
                return Err(CoreError::corruption(format!(
                    "{} is empty but is not the latest log file",
                    path.display()
                )));
            }
            if index == latest {
                let declared = metadata.first_record_number_of_latest_wal_file();
                if let Some(first) = replayed.first_record_number {
                    if first != declared {
                        return Err(CoreError::corruption(format!(
                            "{} starts at {first}, descriptor says {declared}",
                            path.display()
                        )));
                    }
                }
            } else if replayed.torn_tail {
                return Err(CoreError::corruption(format!(
                    "incomplete record inside {}, which is not the latest log file",
                    path.display()
                )));
            }
            events += replayed.records;
        }
        Ok((snapshot_entries, events, wal_files.len()))
    }

    fn decode_record(&self, record: &LogRecord) -> CoreResult<Box<dyn WalEntry>> {
        let serde_id = peek_serde_id(&record.payload)?;
        if serde_id.as_u32() != record.type_id {
            return Err(CoreError::corruption(format!(
                "{} has type id {} but carries a {serde_id} payload",
                record.record_number, record.type_id
            )));
        }
        self.registry.decode(&record.payload)
    }

    /// Writes a new snapshot and starts a new log file.
    ///
    /// Every producer writes its share into a temporary file. Only when
    /// all succeeded does the snapshot become the latest and the current
    /// log file get replaced by a fresh one starting at the next record
    /// number. Files of the previous generation are left in place; see
    /// [`MetadataStore::obsolete_files`].
    ///
    /// # Errors
    ///
    /// A producer failure returns [`CoreError::SnapshotProducer`] and
    /// leaves the previous snapshot current; the log stays usable. I/O
    /// failures are fatal.
    pub fn take_snapshot(&self) -> CoreResult<SnapshotStats> {
        self.ensure_healthy()?;
        let mut guard = self.writer.lock();
        self.snapshot_locked(&mut guard)
            .map_err(|e| self.escalate(e))
    }

    fn snapshot_locked(&self, state: &mut WriterState) -> CoreResult<SnapshotStats> {
        let next_record_number = state
            .current
            .as_ref()
            .map(WritableLogFile::next_record_number)
            .ok_or(CoreError::Closed)?;

        let temp = state.metadata.create_temporary_snapshot_file()?;
        info!(path = %temp.display(), "Taking snapshot");
        let mut file = open_log_file(&temp, RecordNumber::FIRST, self.options, &self.fatal)?;

        let mut writer = SnapshotWriter::new(&self.registry, &mut file, &mut state.scratch);
        for producer in self.subscribers.snapshot_producers() {
            if let Err(source) = producer.write_snapshot(&mut writer) {
                warn!(error = %source, "Snapshot producer failed, keeping previous snapshot");
                return Err(CoreError::SnapshotProducer { source });
            }
        }
        let entries = writer.entries();
        file.close()?;

        state
            .metadata
            .store_new_snapshot_file(temp, next_record_number)?;
        if let Some(previous) = state.current.take() {
            previous.close()?;
        }
        state.current = Some(open_log_file(
            &state.metadata.latest_wal_file()?,
            state.metadata.first_record_number_of_latest_wal_file(),
            self.options,
            &self.fatal,
        )?);

        let snapshot_file = state.metadata.latest_snapshot_file()?;
        info!(
            path = %snapshot_file.display(),
            entries,
            next = %next_record_number,
            "Snapshot complete"
        );
        Ok(SnapshotStats {
            entries,
            snapshot_file,
            next_record_number,
        })
    }

    /// Flushes and closes the current log file and releases the directory.
    ///
    /// Later appends fail with [`CoreError::Closed`]. Closing twice is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns the final flush or sync failure.
    pub fn close(&self) -> CoreResult<()> {
        let mut guard = self.writer.lock();
        let Some(file) = guard.current.take() else {
            return Ok(());
        };
        let result = file.close();
        guard.metadata.release_lock();
        info!(path = %self.directory.display(), "Closed write-ahead log");
        result.map_err(|e| self.escalate(e))
    }

    fn ensure_healthy(&self) -> CoreResult<()> {
        if self.is_poisoned() {
            return Err(CoreError::Poisoned);
        }
        Ok(())
    }

    fn escalate(&self, err: CoreError) -> CoreError {
        if err.is_fatal() {
            self.poison(&err);
        }
        err
    }

    fn poison(&self, err: &CoreError) {
        self.fatal.poison(err);
    }
}

impl Drop for WriteAheadLog {
    fn drop(&mut self) {
        if let Some(file) = self.writer.get_mut().current.take() {
            if let Err(e) = file.close() {
                warn!(path = %self.directory.display(), error = %e, "Failed to close write-ahead log");
            }
        }
    }
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog")
            .field("directory", &self.directory)
            .field("registry", &self.registry)
            .field("subscribers", &self.subscribers)
            .field("poisoned", &self.is_poisoned())
            .finish_non_exhaustive()
    }
}
