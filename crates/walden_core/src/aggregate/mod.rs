//! Event-sourced aggregates and the repositories that hold them.
//!
//! An [`Aggregate`] is an in-memory domain object whose state only ever
//! changes by applying events that were first appended to the log. A
//! [`Repository`] keeps every live aggregate of one kind in memory,
//! records insertions and removals in the log, contributes its aggregates'
//! states to snapshots and rebuilds itself from them on replay.
//!
//! The behaviour of a domain type is described by an [`AggregateKind`]:
//! its identifier, state and event types and how an event changes the
//! state.
//!
//! ```text
//!   Fresh ──insert──▶ Live ──remove──▶ Removed
//!                      ▲
//!   snapshot / Inserted replay
//! ```

mod delta;
mod envelope;
mod id;
mod repository;

pub use delta::AggregateDeltaBuilder;
pub use envelope::{AggregateCodecs, AggregateEvents, RepositoryEvent, RepositorySnapshot};
pub use id::{InvalidNanoId, NanoId, NanoIdCodec, NANO_ID_ALPHABET, NANO_ID_LENGTH};
pub use repository::{NoHooks, Repository, RepositoryHooks};

use crate::error::{CoreError, CoreResult};
use crate::types::{Durability, RecordNumber};
use crate::write_ahead_log::WriteAheadLog;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// What an aggregate identifier must support.
///
/// Implemented for every type with these capabilities; ids declared with
/// [`nano_identifier!`](crate::nano_identifier) qualify.
pub trait Identifier:
    Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
}

impl<T> Identifier for T where
    T: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
}

/// Describes one kind of aggregate.
///
/// Usually implemented on an empty marker type:
///
/// ```rust,ignore
/// struct StationKind;
///
/// impl AggregateKind for StationKind {
///     type Id = StationId;
///     type State = StationState;
///     type Event = StationEvent;
///     const TYPE_NAME: &'static str = "station";
///
///     fn apply(state: &mut StationState, event: &StationEvent) {
///         match event {
///             StationEvent::SetName(name) => state.name = name.clone(),
///             StationEvent::SetNote(note) => state.note = note.clone(),
///         }
///     }
/// }
/// ```
pub trait AggregateKind: Send + Sync + 'static {
    /// Identifier type.
    type Id: Identifier;

    /// Everything needed to rebuild an aggregate without its history.
    type State: Clone + fmt::Debug + Send + Sync + 'static;

    /// One change to the state.
    type Event: Clone + fmt::Debug + Send + Sync + 'static;

    /// Name used in errors and logs.
    const TYPE_NAME: &'static str;

    /// Applies one event. Must be deterministic and infallible.
    fn apply(state: &mut Self::State, event: &Self::Event);
}

const FRESH: u8 = 0;
const LIVE: u8 = 1;
const REMOVED: u8 = 2;

/// A domain object persisted as a stream of events.
///
/// Created [`new`](Self::new) it is *fresh*: it exists only in memory and
/// refuses appends until a [`Repository`] inserts it. Once removed from
/// its repository it refuses appends for good.
///
/// # Thread Safety
///
/// Appends to one aggregate are serialized; appends to different
/// aggregates run concurrently up to the log's writer lock. The state is
/// changed only after its events are in the log, and while the log's
/// writer lock is still held, so a concurrent snapshot never sees a state
/// ahead of or behind the log.
pub struct Aggregate<K: AggregateKind> {
    id: K::Id,
    wal: Arc<WriteAheadLog>,
    state: RwLock<K::State>,
    append_lock: Mutex<()>,
    lifecycle: AtomicU8,
}

impl<K: AggregateKind> Aggregate<K> {
    /// Creates a fresh aggregate with an initial state.
    #[must_use]
    pub fn new(wal: &Arc<WriteAheadLog>, id: K::Id, state: K::State) -> Arc<Self> {
        Self::with_lifecycle(wal, id, state, FRESH)
    }

    /// Rebuilds a live aggregate from persisted state.
    pub(crate) fn restored(wal: &Arc<WriteAheadLog>, id: K::Id, state: K::State) -> Arc<Self> {
        Self::with_lifecycle(wal, id, state, LIVE)
    }

    fn with_lifecycle(wal: &Arc<WriteAheadLog>, id: K::Id, state: K::State, lifecycle: u8) -> Arc<Self> {
        Arc::new(Self {
            id,
            wal: Arc::clone(wal),
            state: RwLock::new(state),
            append_lock: Mutex::new(()),
            lifecycle: AtomicU8::new(lifecycle),
        })
    }

    /// The aggregate's identifier.
    #[must_use]
    pub fn id(&self) -> &K::Id {
        &self.id
    }

    /// A copy of the current state.
    #[must_use]
    pub fn to_state(&self) -> K::State {
        self.state.read().clone()
    }

    /// Runs `f` against the current state without copying it.
    pub fn read<R>(&self, f: impl FnOnce(&K::State) -> R) -> R {
        f(&self.state.read())
    }

    /// Whether the aggregate was removed from its repository.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.lifecycle.load(Ordering::SeqCst) == REMOVED
    }

    /// Whether a repository holds the aggregate.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.lifecycle.load(Ordering::SeqCst) == LIVE
    }

    /// Logs one event, then applies it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AggregateNotLive`] unless the aggregate is in a
    /// repository, or the log's error. The state is unchanged on error.
    pub fn append_to_wal(&self, event: K::Event, durability: Durability) -> CoreResult<RecordNumber> {
        let _appending = self.append_lock.lock();
        self.append_locked(vec![event], durability)
    }

    /// Logs several events as one record, then applies them in order.
    ///
    /// Returns `None` without touching the log when `events` is empty.
    ///
    /// # Errors
    ///
    /// Same as [`append_to_wal`](Self::append_to_wal).
    pub fn append_all_to_wal(
        &self,
        events: Vec<K::Event>,
        durability: Durability,
    ) -> CoreResult<Option<RecordNumber>> {
        if events.is_empty() {
            return Ok(None);
        }
        let _appending = self.append_lock.lock();
        self.append_locked(events, durability).map(Some)
    }

    /// Computes events from the current state and logs them.
    ///
    /// `f` sees the state and records changes into an
    /// [`AggregateDeltaBuilder`]. No other append to this aggregate can
    /// happen between reading the state and applying the result. Returns
    /// whether anything changed.
    ///
    /// # Errors
    ///
    /// Same as [`append_to_wal`](Self::append_to_wal).
    pub fn update<F>(&self, durability: Durability, f: F) -> CoreResult<bool>
    where
        F: FnOnce(&K::State, &mut AggregateDeltaBuilder<K::Event>),
    {
        let _appending = self.append_lock.lock();
        self.ensure_live()?;
        let mut delta = AggregateDeltaBuilder::new();
        f(&self.state.read(), &mut delta);
        if delta.is_empty() {
            return Ok(false);
        }
        self.append_locked(delta.build(), durability)?;
        Ok(true)
    }

    fn append_locked(&self, events: Vec<K::Event>, durability: Durability) -> CoreResult<RecordNumber> {
        self.ensure_live()?;
        let envelope = AggregateEvents::<K> {
            id: self.id.clone(),
            events,
        };
        self.wal.append_then(&envelope, durability, |record_number| {
            let mut state = self.state.write();
            for event in &envelope.events {
                K::apply(&mut state, event);
            }
            record_number
        })
    }

    fn ensure_live(&self) -> CoreResult<()> {
        match self.lifecycle.load(Ordering::SeqCst) {
            LIVE => Ok(()),
            state => Err(CoreError::AggregateNotLive {
                aggregate_type: K::TYPE_NAME,
                id: self.id.to_string(),
                state: if state == REMOVED { "removed" } else { "detached" },
            }),
        }
    }

    /// Applies replayed events without logging them.
    pub(crate) fn apply_replayed(&self, events: &[K::Event]) {
        let mut state = self.state.write();
        for event in events {
            K::apply(&mut state, event);
        }
    }

    /// Blocks appends until the guard drops.
    pub(crate) fn lock_appends(&self) -> MutexGuard<'_, ()> {
        self.append_lock.lock()
    }

    pub(crate) fn is_fresh(&self) -> bool {
        self.lifecycle.load(Ordering::SeqCst) == FRESH
    }

    pub(crate) fn belongs_to(&self, wal: &Arc<WriteAheadLog>) -> bool {
        Arc::ptr_eq(&self.wal, wal)
    }

    pub(crate) fn mark_live(&self) {
        self.lifecycle.store(LIVE, Ordering::SeqCst);
    }

    pub(crate) fn mark_removed(&self) {
        self.lifecycle.store(REMOVED, Ordering::SeqCst);
    }
}

impl<K: AggregateKind> fmt::Debug for Aggregate<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifecycle = match self.lifecycle.load(Ordering::SeqCst) {
            FRESH => "fresh",
            LIVE => "live",
            _ => "removed",
        };
        f.debug_struct("Aggregate")
            .field("type", &K::TYPE_NAME)
            .field("id", &self.id)
            .field("state", &*self.state.read())
            .field("lifecycle", &lifecycle)
            .finish()
    }
}
