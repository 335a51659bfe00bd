//! # Walden Storage
//!
//! Byte-store backends underneath Walden log and snapshot files.
//!
//! Backends are **opaque byte stores**. They know nothing about record
//! framing, checksums or record numbers; `walden_core` owns all of that.
//!
//! ## Design Principles
//!
//! - Append-only writes, positional reads, explicit durability calls
//! - Every method takes `&self`: backends lock internally so a background
//!   flusher can force data to disk while the writer keeps appending
//! - Must be `Send + Sync`
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - a single OS file, read-write or read-only
//! - [`InMemoryBackend`] - a growable buffer for tests
//!
//! ## Example
//!
//! ```rust
//! use walden_storage::{StorageBackend, InMemoryBackend};
//!
//! let backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
