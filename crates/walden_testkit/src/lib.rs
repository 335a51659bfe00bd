//! # Walden Testkit
//!
//! Test utilities for Walden.
//!
//! This crate provides:
//! - Temporary log directories and fixtures
//! - Crash simulation: torn writes, truncation, flipped bytes
//! - Property-based test generators using proptest
//! - A sample `Station` aggregate exercising the whole stack
//!
//! ## Usage
//!
//! ```rust,ignore
//! use walden_testkit::prelude::*;
//!
//! #[test]
//! fn stations_survive_reopen() {
//!     let log = TestLog::new();
//!     let (wal, stations) = log.open_stations();
//!     let station = create_station(&stations, "Harbour", Wgs84Point::new(60.1, 24.9), Durability::Immediate)?;
//!     // ...
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod station;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::station::*;
    pub use walden_core::{Config, CoreError, Durability, RecordNumber, WriteAheadLog};
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use station::*;
