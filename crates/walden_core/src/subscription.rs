//! Event consumers, snapshot consumers and snapshot producers.
//!
//! Consumers see entries only during [`replay`]; live appends are applied
//! by whoever appended them. Producers are called by [`take_snapshot`].
//!
//! Consumers and producers run while the log's writer lock is held and
//! must not call back into the log.
//!
//! [`replay`]: crate::WriteAheadLog::replay
//! [`take_snapshot`]: crate::WriteAheadLog::take_snapshot

use crate::error::{BoxError, CoreResult};
use crate::registry::{downcast_entry, CodecRegistry, WalEntry};
use crate::types::{Durability, RecordNumber};
use crate::wal::WritableLogFile;
use parking_lot::RwLock;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Receives events of type `E` during replay.
pub trait EventConsumer<E>: Send + Sync {
    /// Called once before the first log record is replayed.
    ///
    /// # Errors
    ///
    /// An error aborts the replay.
    fn on_event_replay_start(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Applies one replayed event.
    ///
    /// # Errors
    ///
    /// An error aborts the replay.
    fn apply_event(&self, event: &E) -> Result<(), BoxError>;
}

impl<E, F> EventConsumer<E> for F
where
    F: Fn(&E) -> Result<(), BoxError> + Send + Sync,
{
    fn apply_event(&self, event: &E) -> Result<(), BoxError> {
        self(event)
    }
}

/// Receives snapshot entries of type `S` during replay.
pub trait SnapshotConsumer<S>: Send + Sync {
    /// Called once before the first snapshot record is replayed, even if
    /// the snapshot is empty.
    ///
    /// # Errors
    ///
    /// An error aborts the replay.
    fn on_snapshot_replay_start(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Applies one snapshot entry.
    ///
    /// # Errors
    ///
    /// An error aborts the replay.
    fn apply_snapshot(&self, snapshot: &S) -> Result<(), BoxError>;
}

impl<S, F> SnapshotConsumer<S> for F
where
    F: Fn(&S) -> Result<(), BoxError> + Send + Sync,
{
    fn apply_snapshot(&self, snapshot: &S) -> Result<(), BoxError> {
        self(snapshot)
    }
}

/// Writes entries describing current state into a new snapshot.
pub trait SnapshotProducer: Send + Sync {
    /// Writes this producer's share of the snapshot.
    ///
    /// # Errors
    ///
    /// An error abandons the snapshot; the previous one stays current.
    fn write_snapshot(&self, writer: &mut SnapshotWriter<'_>) -> Result<(), BoxError>;
}

impl<F> SnapshotProducer for F
where
    F: Fn(&mut SnapshotWriter<'_>) -> Result<(), BoxError> + Send + Sync,
{
    fn write_snapshot(&self, writer: &mut SnapshotWriter<'_>) -> Result<(), BoxError> {
        self(writer)
    }
}

/// Sink handed to snapshot producers.
pub struct SnapshotWriter<'a> {
    registry: &'a CodecRegistry,
    file: &'a mut WritableLogFile,
    scratch: &'a mut Vec<u8>,
    entries: u64,
}

impl<'a> SnapshotWriter<'a> {
    pub(crate) fn new(
        registry: &'a CodecRegistry,
        file: &'a mut WritableLogFile,
        scratch: &'a mut Vec<u8>,
    ) -> Self {
        Self {
            registry,
            file,
            scratch,
            entries: 0,
        }
    }

    /// Writes one snapshot entry.
    ///
    /// # Errors
    ///
    /// Returns an error if no codec accepts the entry or the write fails.
    pub fn write<S: WalEntry>(&mut self, snapshot: &S) -> CoreResult<RecordNumber> {
        self.write_entry(snapshot)
    }

    /// Writes one type-erased snapshot entry.
    ///
    /// # Errors
    ///
    /// Returns an error if no codec accepts the entry or the write fails.
    pub fn write_entry(&mut self, entry: &dyn WalEntry) -> CoreResult<RecordNumber> {
        self.scratch.clear();
        let serde_id = self.registry.encode(entry, &mut *self.scratch)?;
        let record_number =
            self.file
                .write(serde_id.as_u32(), self.scratch.as_slice(), Durability::None)?;
        self.entries += 1;
        Ok(record_number)
    }

    /// Entries written so far.
    #[must_use]
    pub fn entries(&self) -> u64 {
        self.entries
    }
}

/// A consumer with its type and filter erased.
pub(crate) trait Dispatch: Send + Sync {
    fn replay_start(&self) -> Result<(), BoxError>;

    /// Applies `entry` if it has the consumer's type and passes the filter.
    fn dispatch(&self, entry: &dyn WalEntry) -> Result<bool, BoxError>;
}

pub(crate) struct EventDispatch<E, P, C> {
    filter: P,
    consumer: C,
    _marker: PhantomData<fn(&E)>,
}

impl<E, P, C> EventDispatch<E, P, C> {
    pub(crate) fn new(filter: P, consumer: C) -> Self {
        Self {
            filter,
            consumer,
            _marker: PhantomData,
        }
    }
}

impl<E, P, C> Dispatch for EventDispatch<E, P, C>
where
    E: WalEntry,
    P: Fn(&E) -> bool + Send + Sync,
    C: EventConsumer<E>,
{
    fn replay_start(&self) -> Result<(), BoxError> {
        self.consumer.on_event_replay_start()
    }

    fn dispatch(&self, entry: &dyn WalEntry) -> Result<bool, BoxError> {
        match downcast_entry::<E>(entry) {
            Some(event) if (self.filter)(event) => {
                self.consumer.apply_event(event)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

pub(crate) struct SnapshotDispatch<S, P, C> {
    filter: P,
    consumer: C,
    _marker: PhantomData<fn(&S)>,
}

impl<S, P, C> SnapshotDispatch<S, P, C> {
    pub(crate) fn new(filter: P, consumer: C) -> Self {
        Self {
            filter,
            consumer,
            _marker: PhantomData,
        }
    }
}

impl<S, P, C> Dispatch for SnapshotDispatch<S, P, C>
where
    S: WalEntry,
    P: Fn(&S) -> bool + Send + Sync,
    C: SnapshotConsumer<S>,
{
    fn replay_start(&self) -> Result<(), BoxError> {
        self.consumer.on_snapshot_replay_start()
    }

    fn dispatch(&self, entry: &dyn WalEntry) -> Result<bool, BoxError> {
        match downcast_entry::<S>(entry) {
            Some(snapshot) if (self.filter)(snapshot) => {
                self.consumer.apply_snapshot(snapshot)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    EventConsumer,
    SnapshotConsumer,
    SnapshotProducer,
}

/// Subscriber lists of one log.
#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: AtomicU64,
    event_consumers: RwLock<Vec<(u64, Arc<dyn Dispatch>)>>,
    snapshot_consumers: RwLock<Vec<(u64, Arc<dyn Dispatch>)>>,
    snapshot_producers: RwLock<Vec<(u64, Arc<dyn SnapshotProducer>)>>,
}

impl Subscribers {
    fn registration(self: &Arc<Self>, kind: Kind, id: u64) -> Registration {
        Registration {
            subscribers: Arc::downgrade(self),
            kind,
            id,
            active: true,
        }
    }

    pub(crate) fn add_event_consumer(self: &Arc<Self>, d: Arc<dyn Dispatch>) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.event_consumers.write().push((id, d));
        self.registration(Kind::EventConsumer, id)
    }

    pub(crate) fn add_snapshot_consumer(self: &Arc<Self>, d: Arc<dyn Dispatch>) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.snapshot_consumers.write().push((id, d));
        self.registration(Kind::SnapshotConsumer, id)
    }

    pub(crate) fn add_snapshot_producer(
        self: &Arc<Self>,
        p: Arc<dyn SnapshotProducer>,
    ) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.snapshot_producers.write().push((id, p));
        self.registration(Kind::SnapshotProducer, id)
    }

    /// Copies taken so consumers can (de)register while others run.
    pub(crate) fn event_consumers(&self) -> Vec<Arc<dyn Dispatch>> {
        self.event_consumers
            .read()
            .iter()
            .map(|(_, d)| Arc::clone(d))
            .collect()
    }

    pub(crate) fn snapshot_consumers(&self) -> Vec<Arc<dyn Dispatch>> {
        self.snapshot_consumers
            .read()
            .iter()
            .map(|(_, d)| Arc::clone(d))
            .collect()
    }

    pub(crate) fn snapshot_producers(&self) -> Vec<Arc<dyn SnapshotProducer>> {
        self.snapshot_producers
            .read()
            .iter()
            .map(|(_, p)| Arc::clone(p))
            .collect()
    }

    pub(crate) fn counts(&self) -> (usize, usize, usize) {
        (
            self.event_consumers.read().len(),
            self.snapshot_consumers.read().len(),
            self.snapshot_producers.read().len(),
        )
    }

    fn remove(&self, kind: Kind, id: u64) -> bool {
        fn retain<T>(list: &RwLock<Vec<(u64, T)>>, id: u64) -> bool {
            let mut list = list.write();
            let before = list.len();
            list.retain(|(entry, _)| *entry != id);
            list.len() != before
        }
        match kind {
            Kind::EventConsumer => retain(&self.event_consumers, id),
            Kind::SnapshotConsumer => retain(&self.snapshot_consumers, id),
            Kind::SnapshotProducer => retain(&self.snapshot_producers, id),
        }
    }
}

/// Handle to one subscription; dropping it unsubscribes.
#[must_use = "dropping a Registration removes the subscription"]
#[derive(Debug)]
pub struct Registration {
    subscribers: Weak<Subscribers>,
    kind: Kind,
    id: u64,
    active: bool,
}

impl Registration {
    /// Removes the subscription now.
    pub fn remove(self) {}

    /// Keeps the subscription for the lifetime of the log.
    pub fn keep(mut self) {
        self.active = false;
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.remove(self.kind, self.id);
        }
    }
}

impl std::fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (events, snapshots, producers) = self.counts();
        f.debug_struct("Subscribers")
            .field("event_consumers", &events)
            .field("snapshot_consumers", &snapshots)
            .field("snapshot_producers", &producers)
            .finish()
    }
}
