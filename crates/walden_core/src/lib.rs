//! # Walden Core
//!
//! Write-ahead log, snapshots and event-sourced aggregates for Walden.
//!
//! This crate provides:
//! - Checksummed, record-numbered log files that survive torn writes
//! - A metadata descriptor that rotates snapshot and log files atomically
//! - A codec registry mapping entry types to serde ids
//! - The [`WriteAheadLog`] façade: append, replay, snapshot, subscriptions
//! - [`Aggregate`](aggregate::Aggregate) and
//!   [`Repository`](aggregate::Repository): in-memory domain objects whose
//!   every change is logged first
//!
//! ## Example
//!
//! ```rust,ignore
//! use walden_core::{Config, CodecRegistry, Durability, WriteAheadLog};
//! use walden_core::aggregate::{Aggregate, Repository};
//!
//! let registry = CodecRegistry::from_registrators(&[&station_codecs])?;
//! let wal = WriteAheadLog::open("data/wal", Config::default(), registry)?;
//! let stations = Repository::<StationKind>::open(&wal, 10_000);
//! wal.replay()?;
//!
//! let station = Aggregate::new(&wal, StationId::random(), StationState::default());
//! stations.insert(&station, Durability::Immediate)?;
//! station.append_to_wal(StationEvent::SetName("Harbour".into()), Durability::Batched)?;
//!
//! wal.take_snapshot()?;
//! wal.close()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregate;
mod config;
pub mod dir;
mod error;
pub mod metadata;
pub mod registry;
pub mod subscription;
mod types;
pub mod wal;
mod write_ahead_log;

pub use config::{Config, FatalErrorHandler};
pub use dir::WalDir;
pub use error::{BoxError, CoreError, CoreResult};
pub use metadata::{Descriptor, MetadataStore, METADATA_VERSION};
pub use registry::{
    downcast_entry, CodecRegistrator, CodecRegistry, CodecRegistryBuilder, WalCodec, WalEntry,
};
pub use subscription::{
    EventConsumer, Registration, SnapshotConsumer, SnapshotProducer, SnapshotWriter,
};
pub use types::{Durability, RecordNumber};
pub use wal::{LogRecord, ReadOnlyLogFile, RecordIterator, WritableLogFile};
pub use write_ahead_log::{ReplayStats, SnapshotStats, WriteAheadLog};

// Used by `nano_identifier!` expansions.
#[doc(hidden)]
pub use serde;
#[doc(hidden)]
pub use walden_codec;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
