//! Error types for Walden core.

use crate::types::RecordNumber;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use walden_codec::SerdeId;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Error type returned by consumers and snapshot producers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in Walden core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] walden_storage::StorageError),

    /// Payload codec error.
    #[error("codec error: {0}")]
    Codec(#[from] walden_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A log or snapshot file is corrupted.
    #[error("log corruption: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch in {record_number} at offset {offset}: expected {expected:016x}, got {actual:016x}")]
    ChecksumMismatch {
        /// Record number stored in the damaged record.
        record_number: RecordNumber,
        /// Byte offset of the record within its file.
        offset: u64,
        /// Checksum stored in the record.
        expected: u64,
        /// Checksum computed over the record contents.
        actual: u64,
    },

    /// The background flusher failed to sync a log file.
    #[error("background flush failed: {message}")]
    FlushFailed {
        /// Description of the failure.
        message: String,
    },

    /// The metadata descriptor is unreadable or inconsistent.
    #[error("invalid metadata: {message}")]
    Metadata {
        /// Description of the problem.
        message: String,
    },

    /// A file name does not follow the `<prefix>-<number>.<ext>` scheme.
    #[error("invalid log file name: {name}")]
    InvalidFileName {
        /// The offending name.
        name: String,
    },

    /// Another process holds the directory lock.
    #[error("WAL directory locked by another process: {}", path.display())]
    DirectoryLocked {
        /// The locked directory.
        path: PathBuf,
    },

    /// Two codecs were registered under one serde id.
    #[error("duplicate codec registration for {0}")]
    DuplicateSerdeId(SerdeId),

    /// A payload names a serde id with no registered codec.
    #[error("no codec registered for {0}")]
    UnknownSerdeId(SerdeId),

    /// No registered codec accepts an entry of this type.
    #[error("no codec registered for entry type {type_name}")]
    UnknownType {
        /// Rust type name of the entry.
        type_name: &'static str,
    },

    /// An event or snapshot consumer failed during replay.
    #[error("consumer failed: {source}")]
    Consumer {
        /// The consumer's error.
        #[source]
        source: BoxError,
    },

    /// A snapshot producer failed; the previous snapshot is still current.
    #[error("snapshot producer failed: {source}")]
    SnapshotProducer {
        /// The producer's error.
        #[source]
        source: BoxError,
    },

    /// An earlier fatal error left the log in an unknown state.
    #[error("write-ahead log is unusable after a fatal error")]
    Poisoned,

    /// The log has been closed.
    #[error("write-ahead log is closed")]
    Closed,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// A repository already holds an aggregate with this identifier.
    #[error("{aggregate_type} with id {id} already exists")]
    DuplicateIdentifier {
        /// Aggregate type name.
        aggregate_type: &'static str,
        /// The duplicate identifier.
        id: String,
    },

    /// A repository is full.
    #[error("{aggregate_type} repository is at capacity ({capacity})")]
    RepositoryAtCapacity {
        /// Aggregate type name.
        aggregate_type: &'static str,
        /// Capacity at the time of the insert.
        capacity: usize,
    },

    /// Events were replayed for an aggregate the repository does not hold.
    #[error("{aggregate_type} with id {id} does not exist")]
    NonExistentAggregate {
        /// Aggregate type name.
        aggregate_type: &'static str,
        /// The missing identifier.
        id: String,
    },

    /// The aggregate cannot accept events in its current lifecycle state.
    #[error("{aggregate_type} with id {id} is {state}")]
    AggregateNotLive {
        /// Aggregate type name.
        aggregate_type: &'static str,
        /// The aggregate's identifier.
        id: String,
        /// Either "detached" or "removed".
        state: &'static str,
    },
}

impl CoreError {
    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates a metadata error.
    pub fn metadata(message: impl Into<String>) -> Self {
        Self::Metadata {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Wraps a consumer error.
    pub fn consumer(source: impl Into<BoxError>) -> Self {
        Self::Consumer {
            source: source.into(),
        }
    }

    /// Returns true if the error leaves the log in an unknown state.
    ///
    /// Fatal errors poison the log: every later operation fails with
    /// [`CoreError::Poisoned`]. Failures during replay are always fatal,
    /// whatever their kind.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Storage(_)
                | Self::Io(_)
                | Self::Corruption { .. }
                | Self::ChecksumMismatch { .. }
                | Self::FlushFailed { .. }
                | Self::Metadata { .. }
                | Self::UnknownSerdeId(_)
                | Self::UnknownType { .. }
                | Self::Poisoned
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(CoreError::corruption("bad magic").is_fatal());
        assert!(CoreError::Io(io::Error::new(io::ErrorKind::Other, "disk")).is_fatal());
        assert!(CoreError::UnknownType { type_name: "u8" }.is_fatal());

        assert!(!CoreError::Closed.is_fatal());
        assert!(!CoreError::SnapshotProducer {
            source: "busy".into()
        }
        .is_fatal());
        assert!(!CoreError::DuplicateIdentifier {
            aggregate_type: "Station",
            id: "a".into()
        }
        .is_fatal());
    }

    #[test]
    fn consumer_error_keeps_source() {
        let inner = CoreError::NonExistentAggregate {
            aggregate_type: "Station",
            id: "x".into(),
        };
        let err = CoreError::consumer(inner);
        let CoreError::Consumer { source } = err else {
            panic!("expected consumer error");
        };
        assert!(matches!(
            source.downcast_ref::<CoreError>(),
            Some(CoreError::NonExistentAggregate { .. })
        ));
    }

    #[test]
    fn display() {
        let err = CoreError::RepositoryAtCapacity {
            aggregate_type: "Station",
            capacity: 2,
        };
        assert_eq!(err.to_string(), "Station repository is at capacity (2)");
    }
}
