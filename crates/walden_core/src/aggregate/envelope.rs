//! Log entries written on behalf of aggregates and repositories.
//!
//! Each aggregate kind owns three consecutive serde ids above a group id
//! chosen by the application:
//!
//! | serde id    | entry                     | sub-types                   |
//! |-------------|---------------------------|-----------------------------|
//! | `group + 1` | [`AggregateEvents`]       | none                        |
//! | `group + 2` | [`RepositoryEvent`]       | 1 = inserted, 2 = removed   |
//! | `group + 3` | [`RepositorySnapshot`]    | none                        |

use super::AggregateKind;
use crate::error::{CoreError, CoreResult};
use crate::registry::{CodecRegistrator, CodecRegistryBuilder, WalCodec};
use std::fmt;
use std::sync::Arc;
use walden_codec::{
    verify_header, verify_plain_header, write_header, Codec, CodecError, CodecResult, Reader,
    SerdeId, Writer,
};

/// Events appended by one aggregate in one call.
pub struct AggregateEvents<K: AggregateKind> {
    /// The aggregate the events belong to.
    pub id: K::Id,
    /// The events, in application order.
    pub events: Vec<K::Event>,
}

/// A change to a repository's membership.
pub enum RepositoryEvent<K: AggregateKind> {
    /// An aggregate was added with this initial state.
    Inserted {
        /// The new aggregate.
        id: K::Id,
        /// Its state at insertion.
        state: K::State,
    },
    /// An aggregate was removed.
    Removed {
        /// The removed aggregate.
        id: K::Id,
    },
}

const INSERTED: u16 = 1;
const REMOVED: u16 = 2;

impl<K: AggregateKind> RepositoryEvent<K> {
    /// The aggregate this event is about.
    #[must_use]
    pub fn id(&self) -> &K::Id {
        match self {
            Self::Inserted { id, .. } | Self::Removed { id } => id,
        }
    }
}

/// A batch of aggregate states written into a snapshot.
pub struct RepositorySnapshot<K: AggregateKind> {
    /// Identifier and state of each aggregate in the batch.
    pub entries: Vec<(K::Id, K::State)>,
}

impl<K: AggregateKind> Clone for AggregateEvents<K> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            events: self.events.clone(),
        }
    }
}

impl<K: AggregateKind> fmt::Debug for AggregateEvents<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateEvents")
            .field("type", &K::TYPE_NAME)
            .field("id", &self.id)
            .field("events", &self.events)
            .finish()
    }
}

impl<K: AggregateKind> Clone for RepositoryEvent<K> {
    fn clone(&self) -> Self {
        match self {
            Self::Inserted { id, state } => Self::Inserted {
                id: id.clone(),
                state: state.clone(),
            },
            Self::Removed { id } => Self::Removed { id: id.clone() },
        }
    }
}

impl<K: AggregateKind> fmt::Debug for RepositoryEvent<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inserted { id, state } => f
                .debug_struct("Inserted")
                .field("type", &K::TYPE_NAME)
                .field("id", id)
                .field("state", state)
                .finish(),
            Self::Removed { id } => f
                .debug_struct("Removed")
                .field("type", &K::TYPE_NAME)
                .field("id", id)
                .finish(),
        }
    }
}

impl<K: AggregateKind> Clone for RepositorySnapshot<K> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<K: AggregateKind> fmt::Debug for RepositorySnapshot<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositorySnapshot")
            .field("type", &K::TYPE_NAME)
            .field("entries", &self.entries.len())
            .finish()
    }
}

struct Parts<K: AggregateKind> {
    id: Arc<dyn Codec<K::Id>>,
    state: Arc<dyn Codec<K::State>>,
    event: Arc<dyn Codec<K::Event>>,
}

/// Registers the log codecs of one aggregate kind.
///
/// Built from codecs for the kind's id, state and event types. Pass it to
/// [`CodecRegistry::from_registrators`](crate::CodecRegistry::from_registrators)
/// before opening the log.
pub struct AggregateCodecs<K: AggregateKind> {
    group: u32,
    parts: Arc<Parts<K>>,
}

impl<K: AggregateKind> AggregateCodecs<K> {
    /// Bundles the codecs; entries use serde ids `group + 1` to `group + 3`.
    pub fn new<I, S, E>(group: u32, id: I, state: S, event: E) -> Self
    where
        I: Codec<K::Id> + 'static,
        S: Codec<K::State> + 'static,
        E: Codec<K::Event> + 'static,
    {
        Self {
            group,
            parts: Arc::new(Parts {
                id: Arc::new(id),
                state: Arc::new(state),
                event: Arc::new(event),
            }),
        }
    }

    /// Group id the serde ids are counted from.
    #[must_use]
    pub fn group(&self) -> u32 {
        self.group
    }

    fn serde_id(&self, offset: u32) -> CoreResult<SerdeId> {
        self.group.checked_add(offset).map(SerdeId).ok_or_else(|| {
            CoreError::invalid_operation(format!(
                "group id {} leaves no room for {} codecs",
                self.group,
                K::TYPE_NAME
            ))
        })
    }
}

impl<K: AggregateKind> CodecRegistrator for AggregateCodecs<K> {
    fn register_codecs(&self, registry: &mut CodecRegistryBuilder) -> CoreResult<()> {
        registry
            .register(EventsCodec {
                serde_id: self.serde_id(1)?,
                parts: Arc::clone(&self.parts),
            })?
            .register(MembershipCodec {
                serde_id: self.serde_id(2)?,
                parts: Arc::clone(&self.parts),
            })?
            .register(SnapshotCodec {
                serde_id: self.serde_id(3)?,
                parts: Arc::clone(&self.parts),
            })?;
        Ok(())
    }
}

impl<K: AggregateKind> fmt::Debug for AggregateCodecs<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateCodecs")
            .field("type", &K::TYPE_NAME)
            .field("group", &self.group)
            .finish()
    }
}

/// Caps preallocation for counts read from the log.
fn capacity_hint(len: usize) -> usize {
    len.min(1024)
}

struct EventsCodec<K: AggregateKind> {
    serde_id: SerdeId,
    parts: Arc<Parts<K>>,
}

impl<K: AggregateKind> WalCodec for EventsCodec<K> {
    type Entry = AggregateEvents<K>;

    fn serde_id(&self) -> SerdeId {
        self.serde_id
    }

    fn encode(&self, entry: &AggregateEvents<K>, out: &mut Writer<'_>) -> CodecResult<()> {
        write_header(out, self.serde_id, 0);
        self.parts.id.encode(&entry.id, out)?;
        out.put_len(entry.events.len())?;
        for event in &entry.events {
            self.parts.event.encode(event, out)?;
        }
        Ok(())
    }

    fn decode(&self, input: &mut Reader<'_>) -> CodecResult<AggregateEvents<K>> {
        verify_plain_header(input, self.serde_id)?;
        let id = self.parts.id.decode(input)?;
        let count = input.get_len()?;
        let mut events = Vec::with_capacity(capacity_hint(count));
        for _ in 0..count {
            events.push(self.parts.event.decode(input)?);
        }
        Ok(AggregateEvents { id, events })
    }
}

struct MembershipCodec<K: AggregateKind> {
    serde_id: SerdeId,
    parts: Arc<Parts<K>>,
}

impl<K: AggregateKind> WalCodec for MembershipCodec<K> {
    type Entry = RepositoryEvent<K>;

    fn serde_id(&self) -> SerdeId {
        self.serde_id
    }

    fn encode(&self, entry: &RepositoryEvent<K>, out: &mut Writer<'_>) -> CodecResult<()> {
        match entry {
            RepositoryEvent::Inserted { id, state } => {
                write_header(out, self.serde_id, INSERTED);
                self.parts.id.encode(id, out)?;
                self.parts.state.encode(state, out)
            }
            RepositoryEvent::Removed { id } => {
                write_header(out, self.serde_id, REMOVED);
                self.parts.id.encode(id, out)
            }
        }
    }

    fn decode(&self, input: &mut Reader<'_>) -> CodecResult<RepositoryEvent<K>> {
        match verify_header(input, self.serde_id)? {
            INSERTED => Ok(RepositoryEvent::Inserted {
                id: self.parts.id.decode(input)?,
                state: self.parts.state.decode(input)?,
            }),
            REMOVED => Ok(RepositoryEvent::Removed {
                id: self.parts.id.decode(input)?,
            }),
            sub_type => Err(CodecError::UnknownSubType {
                serde_id: self.serde_id,
                sub_type,
            }),
        }
    }
}

struct SnapshotCodec<K: AggregateKind> {
    serde_id: SerdeId,
    parts: Arc<Parts<K>>,
}

impl<K: AggregateKind> WalCodec for SnapshotCodec<K> {
    type Entry = RepositorySnapshot<K>;

    fn serde_id(&self) -> SerdeId {
        self.serde_id
    }

    fn encode(&self, entry: &RepositorySnapshot<K>, out: &mut Writer<'_>) -> CodecResult<()> {
        write_header(out, self.serde_id, 0);
        out.put_len(entry.entries.len())?;
        for (id, state) in &entry.entries {
            self.parts.id.encode(id, out)?;
            self.parts.state.encode(state, out)?;
        }
        Ok(())
    }

    fn decode(&self, input: &mut Reader<'_>) -> CodecResult<RepositorySnapshot<K>> {
        verify_plain_header(input, self.serde_id)?;
        let count = input.get_len()?;
        let mut entries = Vec::with_capacity(capacity_hint(count));
        for _ in 0..count {
            let id = self.parts.id.decode(input)?;
            entries.push((id, self.parts.state.decode(input)?));
        }
        Ok(RepositorySnapshot { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::{counter_codecs, Counter, CounterEvent, CounterKind};
    use crate::registry::{downcast_entry, CodecRegistry};
    use walden_codec::peek_serde_id;

    fn registry() -> CodecRegistry {
        CodecRegistry::from_registrators(&[&counter_codecs()]).unwrap()
    }

    fn round_trip<E: crate::registry::WalEntry + Clone>(registry: &CodecRegistry, entry: &E) -> (SerdeId, E) {
        let mut buf = Vec::new();
        let serde_id = registry.encode(entry, &mut buf).unwrap();
        assert_eq!(peek_serde_id(&buf).unwrap(), serde_id);
        let decoded = registry.decode(&buf).unwrap();
        (serde_id, downcast_entry::<E>(decoded.as_ref()).unwrap().clone())
    }

    #[test]
    fn serde_ids_follow_the_group() {
        let registry = registry();
        assert_eq!(registry.serde_ids(), vec![SerdeId(101), SerdeId(102), SerdeId(103)]);
    }

    #[test]
    fn aggregate_events_round_trip() {
        let registry = registry();
        let entry = AggregateEvents::<CounterKind> {
            id: "c-1".into(),
            events: vec![CounterEvent::Add(4), CounterEvent::Relabel(String::new())],
        };
        let (serde_id, decoded) = round_trip(&registry, &entry);
        assert_eq!(serde_id, SerdeId(101));
        assert_eq!(decoded.id, "c-1");
        assert_eq!(decoded.events, entry.events);
    }

    #[test]
    fn membership_events_use_sub_types() {
        let registry = registry();
        let inserted = RepositoryEvent::<CounterKind>::Inserted {
            id: "c-1".into(),
            state: Counter {
                label: "first".into(),
                total: 9,
            },
        };
        let (serde_id, decoded) = round_trip(&registry, &inserted);
        assert_eq!(serde_id, SerdeId(102));
        match decoded {
            RepositoryEvent::Inserted { id, state } => {
                assert_eq!(id, "c-1");
                assert_eq!(state.total, 9);
            }
            other => panic!("unexpected {other:?}"),
        }

        let (_, decoded) = round_trip(&registry, &RepositoryEvent::<CounterKind>::Removed { id: "c-2".into() });
        assert!(matches!(decoded, RepositoryEvent::Removed { ref id } if id == "c-2"));
        assert_eq!(decoded.id(), "c-2");
    }

    #[test]
    fn unknown_membership_sub_type_is_rejected() {
        let registry = registry();
        let mut buf = Vec::new();
        let mut out = Writer::new(&mut buf);
        write_header(&mut out, SerdeId(102), 7);
        out.put_str("c-1").unwrap();
        assert!(matches!(
            registry.decode(&buf),
            Err(CoreError::Codec(CodecError::UnknownSubType { sub_type: 7, .. }))
        ));
    }

    #[test]
    fn snapshot_round_trip() {
        let registry = registry();
        let entry = RepositorySnapshot::<CounterKind> {
            entries: (0..5)
                .map(|i| {
                    (
                        format!("c-{i}"),
                        Counter {
                            label: format!("label {i}"),
                            total: i,
                        },
                    )
                })
                .collect(),
        };
        let (serde_id, decoded) = round_trip(&registry, &entry);
        assert_eq!(serde_id, SerdeId(103));
        assert_eq!(decoded.entries, entry.entries);
    }

    #[test]
    fn group_overflow_is_rejected() {
        let codecs = AggregateCodecs::<CounterKind>::new(
            u32::MAX - 1,
            walden_codec::StringCodec,
            crate::aggregate::tests::CounterCodec,
            crate::aggregate::tests::CounterEventCodec,
        );
        assert!(matches!(
            CodecRegistry::from_registrators(&[&codecs]),
            Err(CoreError::InvalidOperation { .. })
        ));
    }
}
