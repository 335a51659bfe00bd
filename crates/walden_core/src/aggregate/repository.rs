//! In-memory, log-backed collections of aggregates.

use super::{Aggregate, AggregateEvents, AggregateKind, RepositoryEvent, RepositorySnapshot};
use crate::error::{BoxError, CoreError, CoreResult};
use crate::subscription::{
    EventConsumer, Registration, SnapshotConsumer, SnapshotProducer, SnapshotWriter,
};
use crate::types::Durability;
use crate::write_ahead_log::WriteAheadLog;
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Aggregates per snapshot record.
const SNAPSHOT_BATCH: usize = 1024;

/// Extension points called when membership changes.
///
/// Called after live inserts and removals and while replaying `Inserted`
/// and `Removed` events, but not for aggregates restored from a snapshot.
/// Hooks run while the repository's membership lock is held and, during
/// replay, inside the log's replay; they must not insert into or remove
/// from this repository, nor append to the log during replay.
pub trait RepositoryHooks<K: AggregateKind>: Send + Sync {
    /// An aggregate joined the repository.
    fn after_insert(&self, _aggregate: &Arc<Aggregate<K>>) {}

    /// An aggregate left the repository.
    fn after_remove(&self, _aggregate: &Arc<Aggregate<K>>) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl<K: AggregateKind> RepositoryHooks<K> for NoHooks {}

/// Every live aggregate of one kind, kept in memory.
///
/// Opening a repository subscribes it to the log: replay rebuilds its
/// aggregates and snapshots include their states. Open it before
/// [`WriteAheadLog::replay`], and open at most one per kind and log.
///
/// Reads (`get`, `find`, ...) never wait for inserts or removals to reach
/// the disk; inserts and removals are serialized per repository.
///
/// # Example
///
/// ```rust,ignore
/// let stations = Repository::<StationKind>::open(&wal, 10_000);
/// wal.replay()?;
///
/// let station = Aggregate::new(&wal, StationId::random(), initial_state);
/// stations.insert(&station, Durability::Immediate)?;
/// let named: Vec<_> = stations.find(|s| s.read(|state| !state.name.is_empty()));
/// ```
pub struct Repository<K: AggregateKind> {
    wal: Arc<WriteAheadLog>,
    aggregates: RwLock<HashMap<K::Id, Arc<Aggregate<K>>>>,
    membership: Mutex<()>,
    capacity: AtomicUsize,
    hooks: Box<dyn RepositoryHooks<K>>,
    registrations: Mutex<Vec<Registration>>,
}

impl<K: AggregateKind> Repository<K> {
    /// Opens an empty repository holding at most `capacity` aggregates.
    #[must_use]
    pub fn open(wal: &Arc<WriteAheadLog>, capacity: usize) -> Arc<Self> {
        Self::with_hooks(wal, capacity, NoHooks)
    }

    /// Opens an empty repository with membership hooks.
    #[must_use]
    pub fn with_hooks<H>(wal: &Arc<WriteAheadLog>, capacity: usize, hooks: H) -> Arc<Self>
    where
        H: RepositoryHooks<K> + 'static,
    {
        let repository = Arc::new(Self {
            wal: Arc::clone(wal),
            aggregates: RwLock::new(HashMap::new()),
            membership: Mutex::new(()),
            capacity: AtomicUsize::new(capacity),
            hooks: Box::new(hooks),
            registrations: Mutex::new(Vec::new()),
        });

        let link = || Link {
            repository: Arc::downgrade(&repository),
        };
        let registrations = vec![
            wal.register_snapshot_consumer(|_: &RepositorySnapshot<K>| true, link()),
            wal.register_event_consumer(|_: &RepositoryEvent<K>| true, link()),
            wal.register_event_consumer(|_: &AggregateEvents<K>| true, link()),
            wal.register_snapshot_producer(link()),
        ];
        *repository.registrations.lock() = registrations;
        repository
    }

    /// The log this repository writes to.
    #[must_use]
    pub fn wal(&self) -> &Arc<WriteAheadLog> {
        &self.wal
    }

    /// Adds a fresh aggregate.
    ///
    /// Logs an `Inserted` event with the aggregate's current state, then
    /// makes it reachable and live.
    ///
    /// # Errors
    ///
    /// - [`CoreError::DuplicateIdentifier`] if the id is taken
    /// - [`CoreError::RepositoryAtCapacity`] if the repository is full
    /// - [`CoreError::InvalidOperation`] if the aggregate was inserted
    ///   before or belongs to another log
    /// - the log's error
    pub fn insert(&self, aggregate: &Arc<Aggregate<K>>, durability: Durability) -> CoreResult<()> {
        let _membership = self.membership.lock();
        let appending = aggregate.lock_appends();

        if self.aggregates.read().contains_key(aggregate.id()) {
            return Err(CoreError::DuplicateIdentifier {
                aggregate_type: K::TYPE_NAME,
                id: aggregate.id().to_string(),
            });
        }
        let capacity = self.capacity();
        if self.len() >= capacity {
            return Err(CoreError::RepositoryAtCapacity {
                aggregate_type: K::TYPE_NAME,
                capacity,
            });
        }
        if !aggregate.is_fresh() {
            return Err(CoreError::invalid_operation(format!(
                "{} {} was already inserted into a repository",
                K::TYPE_NAME,
                aggregate.id()
            )));
        }
        if !aggregate.belongs_to(&self.wal) {
            return Err(CoreError::invalid_operation(format!(
                "{} {} was created for another write-ahead log",
                K::TYPE_NAME,
                aggregate.id()
            )));
        }

        let event = RepositoryEvent::<K>::Inserted {
            id: aggregate.id().clone(),
            state: aggregate.to_state(),
        };
        self.wal.append_then(&event, durability, |_| {
            self.aggregates
                .write()
                .insert(aggregate.id().clone(), Arc::clone(aggregate));
            aggregate.mark_live();
        })?;
        drop(appending);

        debug!(aggregate = K::TYPE_NAME, id = %aggregate.id(), "Inserted aggregate");
        self.hooks.after_insert(aggregate);
        Ok(())
    }

    /// Removes the aggregate with `id` and returns it.
    ///
    /// Does nothing and returns `None` if there is none. Otherwise waits
    /// for the aggregate's pending append, logs a `Removed` event, and
    /// marks the aggregate removed so it refuses further appends.
    ///
    /// # Errors
    ///
    /// Returns the log's error; the aggregate then stays in place.
    pub fn remove(
        &self,
        id: &K::Id,
        durability: Durability,
    ) -> CoreResult<Option<Arc<Aggregate<K>>>> {
        let _membership = self.membership.lock();
        let Some(aggregate) = self.get(id) else {
            return Ok(None);
        };
        let appending = aggregate.lock_appends();

        let event = RepositoryEvent::<K>::Removed { id: id.clone() };
        self.wal.append_then(&event, durability, |_| {
            self.aggregates.write().remove(id);
            aggregate.mark_removed();
        })?;
        drop(appending);

        debug!(aggregate = K::TYPE_NAME, %id, "Removed aggregate");
        self.hooks.after_remove(&aggregate);
        Ok(Some(aggregate))
    }

    /// The aggregate with `id`, if present.
    #[must_use]
    pub fn get(&self, id: &K::Id) -> Option<Arc<Aggregate<K>>> {
        self.aggregates.read().get(id).cloned()
    }

    /// Whether an aggregate with `id` is present.
    #[must_use]
    pub fn contains(&self, id: &K::Id) -> bool {
        self.aggregates.read().contains_key(id)
    }

    /// Number of aggregates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.aggregates.read().len()
    }

    /// Whether the repository is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aggregates.read().is_empty()
    }

    /// Identifiers of all aggregates, in no particular order.
    #[must_use]
    pub fn ids(&self) -> Vec<K::Id> {
        self.aggregates.read().keys().cloned().collect()
    }

    /// All aggregates, in no particular order.
    #[must_use]
    pub fn aggregates(&self) -> Vec<Arc<Aggregate<K>>> {
        self.aggregates.read().values().cloned().collect()
    }

    /// Aggregates matching `predicate`, in no particular order.
    ///
    /// A linear scan over a copy of the membership; the predicate may read
    /// aggregate state freely.
    pub fn find<P>(&self, predicate: P) -> Vec<Arc<Aggregate<K>>>
    where
        P: Fn(&Aggregate<K>) -> bool,
    {
        self.aggregates()
            .into_iter()
            .filter(|aggregate| predicate(&**aggregate))
            .collect()
    }

    /// Aggregates matching `predicate`, ordered by `compare`.
    pub fn find_sorted<P, C>(&self, predicate: P, mut compare: C) -> Vec<Arc<Aggregate<K>>>
    where
        P: Fn(&Aggregate<K>) -> bool,
        C: FnMut(&Aggregate<K>, &Aggregate<K>) -> CmpOrdering,
    {
        let mut found = self.find(predicate);
        found.sort_by(|a, b| compare(&**a, &**b));
        found
    }

    /// Current capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    /// Changes the capacity.
    ///
    /// Lowering it below the current size keeps every aggregate but
    /// refuses inserts until enough are removed.
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::SeqCst);
    }

    /// Unsubscribes from the log.
    ///
    /// Later replays ignore this repository's entries and later snapshots
    /// omit its aggregates. The in-memory aggregates stay readable.
    pub fn close(&self) {
        self.registrations.lock().clear();
    }

    fn restore(&self, id: K::Id, state: K::State) -> CoreResult<Arc<Aggregate<K>>> {
        let mut aggregates = self.aggregates.write();
        if aggregates.contains_key(&id) {
            return Err(CoreError::DuplicateIdentifier {
                aggregate_type: K::TYPE_NAME,
                id: id.to_string(),
            });
        }
        let aggregate = Aggregate::restored(&self.wal, id.clone(), state);
        aggregates.insert(id, Arc::clone(&aggregate));
        Ok(aggregate)
    }

    fn missing(id: &K::Id) -> CoreError {
        CoreError::NonExistentAggregate {
            aggregate_type: K::TYPE_NAME,
            id: id.to_string(),
        }
    }
}

impl<K: AggregateKind> fmt::Debug for Repository<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("type", &K::TYPE_NAME)
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

/// Connects a repository to its log without keeping it alive.
struct Link<K: AggregateKind> {
    repository: Weak<Repository<K>>,
}

impl<K: AggregateKind> SnapshotConsumer<RepositorySnapshot<K>> for Link<K> {
    fn on_snapshot_replay_start(&self) -> Result<(), BoxError> {
        if let Some(repository) = self.repository.upgrade() {
            repository.aggregates.write().clear();
        }
        Ok(())
    }

    fn apply_snapshot(&self, snapshot: &RepositorySnapshot<K>) -> Result<(), BoxError> {
        let Some(repository) = self.repository.upgrade() else {
            return Ok(());
        };
        for (id, state) in &snapshot.entries {
            repository.restore(id.clone(), state.clone())?;
        }
        Ok(())
    }
}

impl<K: AggregateKind> EventConsumer<RepositoryEvent<K>> for Link<K> {
    fn apply_event(&self, event: &RepositoryEvent<K>) -> Result<(), BoxError> {
        let Some(repository) = self.repository.upgrade() else {
            return Ok(());
        };
        match event {
            RepositoryEvent::Inserted { id, state } => {
                let aggregate = repository.restore(id.clone(), state.clone())?;
                repository.hooks.after_insert(&aggregate);
            }
            RepositoryEvent::Removed { id } => {
                let aggregate = repository
                    .aggregates
                    .write()
                    .remove(id)
                    .ok_or_else(|| Repository::<K>::missing(id))?;
                aggregate.mark_removed();
                repository.hooks.after_remove(&aggregate);
            }
        }
        Ok(())
    }
}

impl<K: AggregateKind> EventConsumer<AggregateEvents<K>> for Link<K> {
    fn apply_event(&self, events: &AggregateEvents<K>) -> Result<(), BoxError> {
        let Some(repository) = self.repository.upgrade() else {
            return Ok(());
        };
        let aggregate = repository
            .get(&events.id)
            .ok_or_else(|| Repository::<K>::missing(&events.id))?;
        aggregate.apply_replayed(&events.events);
        Ok(())
    }
}

impl<K: AggregateKind> SnapshotProducer for Link<K> {
    fn write_snapshot(&self, writer: &mut SnapshotWriter<'_>) -> Result<(), BoxError> {
        let Some(repository) = self.repository.upgrade() else {
            return Ok(());
        };
        let aggregates = repository.aggregates();
        for batch in aggregates.chunks(SNAPSHOT_BATCH) {
            let snapshot = RepositorySnapshot::<K> {
                entries: batch
                    .iter()
                    .map(|aggregate| (aggregate.id().clone(), aggregate.to_state()))
                    .collect(),
            };
            writer.write(&snapshot)?;
        }
        debug!(aggregate = K::TYPE_NAME, count = aggregates.len(), "Wrote repository snapshot");
        Ok(())
    }
}
