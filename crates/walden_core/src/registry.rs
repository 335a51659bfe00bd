//! Codec registry: maps entry types to payload codecs and serde ids back
//! to decoders.
//!
//! Every payload starts with the serde id of the codec that wrote it (see
//! [`walden_codec::header`]). Decoding reads that id and dispatches
//! directly. Encoding finds a codec by the entry's runtime type; the first
//! lookup for a type scans the codecs in registration order and asks each
//! one whether it [`supports`](WalCodec::supports) the entry, later
//! lookups hit a memo.

use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use walden_codec::{peek_serde_id, CodecResult, Reader, SerdeId, Writer};

/// Anything that can be written to the log.
///
/// Implemented for every `'static` type that is `Send + Sync + Debug`.
pub trait WalEntry: Any + Send + Sync + fmt::Debug {
    /// Upcasts for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Rust type name, for diagnostics.
    fn entry_type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync + fmt::Debug> WalEntry for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn entry_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Downcasts an entry to its concrete type.
#[must_use]
pub fn downcast_entry<E: Any>(entry: &dyn WalEntry) -> Option<&E> {
    entry.as_any().downcast_ref::<E>()
}

/// A payload codec registered under one serde id.
///
/// `encode` must start the payload with a header carrying
/// [`serde_id`](Self::serde_id), and `decode` must accept exactly what
/// `encode` produced.
pub trait WalCodec: Send + Sync + 'static {
    /// The type this codec writes.
    type Entry: WalEntry;

    /// The id written into every payload.
    fn serde_id(&self) -> SerdeId;

    /// Whether this codec handles `entry`.
    ///
    /// Lets several codecs share one entry type, each taking a subset.
    /// The answer must depend on the type alone for the memo to stay valid.
    fn supports(&self, _entry: &Self::Entry) -> bool {
        true
    }

    /// Writes `entry`, header first.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be represented.
    fn encode(&self, entry: &Self::Entry, out: &mut Writer<'_>) -> CodecResult<()>;

    /// Reads one entry, header first.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed.
    fn decode(&self, input: &mut Reader<'_>) -> CodecResult<Self::Entry>;
}

trait ErasedCodec: Send + Sync {
    fn serde_id(&self) -> SerdeId;
    fn entry_type(&self) -> TypeId;
    fn entry_type_name(&self) -> &'static str;
    fn supports(&self, entry: &dyn WalEntry) -> bool;
    fn encode(&self, entry: &dyn WalEntry, out: &mut Writer<'_>) -> CoreResult<()>;
    fn decode(&self, input: &mut Reader<'_>) -> CodecResult<Box<dyn WalEntry>>;
}

struct Erased<C>(C);

impl<C: WalCodec> ErasedCodec for Erased<C> {
    fn serde_id(&self) -> SerdeId {
        self.0.serde_id()
    }

    fn entry_type(&self) -> TypeId {
        TypeId::of::<C::Entry>()
    }

    fn entry_type_name(&self) -> &'static str {
        std::any::type_name::<C::Entry>()
    }

    fn supports(&self, entry: &dyn WalEntry) -> bool {
        downcast_entry::<C::Entry>(entry).is_some_and(|e| self.0.supports(e))
    }

    fn encode(&self, entry: &dyn WalEntry, out: &mut Writer<'_>) -> CoreResult<()> {
        let entry = downcast_entry::<C::Entry>(entry).ok_or(CoreError::UnknownType {
            type_name: entry.entry_type_name(),
        })?;
        Ok(self.0.encode(entry, out)?)
    }

    fn decode(&self, input: &mut Reader<'_>) -> CodecResult<Box<dyn WalEntry>> {
        Ok(Box::new(self.0.decode(input)?))
    }
}

/// Something that contributes codecs to a registry.
///
/// Implemented by codec bundles such as
/// [`AggregateCodecs`](crate::aggregate::AggregateCodecs), and by closures
/// over [`CodecRegistryBuilder`].
pub trait CodecRegistrator {
    /// Registers this bundle's codecs.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateSerdeId`] if an id is already taken.
    fn register_codecs(&self, registry: &mut CodecRegistryBuilder) -> CoreResult<()>;
}

impl<F> CodecRegistrator for F
where
    F: Fn(&mut CodecRegistryBuilder) -> CoreResult<()>,
{
    fn register_codecs(&self, registry: &mut CodecRegistryBuilder) -> CoreResult<()> {
        self(registry)
    }
}

/// Collects codecs before the log is opened.
#[derive(Default)]
pub struct CodecRegistryBuilder {
    by_id: HashMap<SerdeId, Arc<dyn ErasedCodec>>,
    ordered: Vec<Arc<dyn ErasedCodec>>,
}

impl CodecRegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one codec.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateSerdeId`] if the id is already taken.
    pub fn register<C: WalCodec>(&mut self, codec: C) -> CoreResult<&mut Self> {
        let serde_id = codec.serde_id();
        if self.by_id.contains_key(&serde_id) {
            return Err(CoreError::DuplicateSerdeId(serde_id));
        }
        let codec: Arc<dyn ErasedCodec> = Arc::new(Erased(codec));
        self.by_id.insert(serde_id, Arc::clone(&codec));
        self.ordered.push(codec);
        Ok(self)
    }

    /// Runs a registrator against this builder.
    ///
    /// # Errors
    ///
    /// Propagates the registrator's error.
    pub fn with(&mut self, registrator: &dyn CodecRegistrator) -> CoreResult<&mut Self> {
        registrator.register_codecs(self)?;
        Ok(self)
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> CodecRegistry {
        CodecRegistry {
            by_id: self.by_id,
            ordered: self.ordered,
            by_type: RwLock::new(HashMap::new()),
        }
    }
}

/// A frozen set of codecs.
pub struct CodecRegistry {
    by_id: HashMap<SerdeId, Arc<dyn ErasedCodec>>,
    ordered: Vec<Arc<dyn ErasedCodec>>,
    by_type: RwLock<HashMap<TypeId, Arc<dyn ErasedCodec>>>,
}

impl CodecRegistry {
    /// Starts an empty registry.
    #[must_use]
    pub fn builder() -> CodecRegistryBuilder {
        CodecRegistryBuilder::new()
    }

    /// Builds a registry from a list of registrators.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateSerdeId`] if two codecs share an id.
    pub fn from_registrators(registrators: &[&dyn CodecRegistrator]) -> CoreResult<Self> {
        let mut builder = CodecRegistryBuilder::new();
        for registrator in registrators {
            builder.with(*registrator)?;
        }
        Ok(builder.build())
    }

    /// Number of registered codecs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Whether no codecs are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Whether a codec is registered under `serde_id`.
    #[must_use]
    pub fn contains(&self, serde_id: SerdeId) -> bool {
        self.by_id.contains_key(&serde_id)
    }

    /// Serde ids in registration order.
    #[must_use]
    pub fn serde_ids(&self) -> Vec<SerdeId> {
        self.ordered.iter().map(|c| c.serde_id()).collect()
    }

    /// Rust type name of the entries written under `serde_id`.
    #[must_use]
    pub fn entry_type_name(&self, serde_id: SerdeId) -> Option<&'static str> {
        self.by_id.get(&serde_id).map(|c| c.entry_type_name())
    }

    fn codec_for(&self, entry: &dyn WalEntry) -> CoreResult<Arc<dyn ErasedCodec>> {
        let type_id = entry.as_any().type_id();
        if let Some(codec) = self.by_type.read().get(&type_id) {
            return Ok(Arc::clone(codec));
        }
        let codec = self
            .ordered
            .iter()
            .find(|c| c.entry_type() == type_id && c.supports(entry))
            .ok_or(CoreError::UnknownType {
                type_name: entry.entry_type_name(),
            })?;
        self.by_type.write().insert(type_id, Arc::clone(codec));
        Ok(Arc::clone(codec))
    }

    /// Appends the payload for `entry` to `buf` and returns its serde id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownType`] if no codec accepts the entry,
    /// or the codec's error.
    pub fn encode(&self, entry: &dyn WalEntry, buf: &mut Vec<u8>) -> CoreResult<SerdeId> {
        let codec = self.codec_for(entry)?;
        let serde_id = codec.serde_id();
        let start = buf.len();
        codec.encode(entry, &mut Writer::new(buf))?;
        let written = peek_serde_id(&buf[start..])?;
        if written != serde_id {
            return Err(CoreError::Codec(walden_codec::CodecError::SerdeIdMismatch {
                expected: serde_id,
                found: written,
            }));
        }
        Ok(serde_id)
    }

    /// Decodes a payload that must consist of exactly one entry.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownSerdeId`] for an unregistered id, or the
    /// codec's error.
    pub fn decode(&self, payload: &[u8]) -> CoreResult<Box<dyn WalEntry>> {
        let serde_id = peek_serde_id(payload)?;
        let codec = self
            .by_id
            .get(&serde_id)
            .ok_or(CoreError::UnknownSerdeId(serde_id))?;
        let mut input = Reader::new(payload);
        let entry = codec.decode(&mut input)?;
        input.finish()?;
        Ok(entry)
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("serde_ids", &self.serde_ids())
            .finish()
    }
}
