//! Core type definitions for Walden.

use std::fmt;

/// Position of a record in the log.
///
/// Record numbers start at 1 and increase by exactly one per record,
/// across file boundaries, for the lifetime of the log. A snapshot file
/// numbers its own records from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordNumber(pub u64);

impl RecordNumber {
    /// The first record number of a fresh log.
    pub const FIRST: Self = Self(1);

    /// Creates a record number.
    #[must_use]
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the following record number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RecordNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rec:{}", self.0)
    }
}

/// How hard a write works to reach stable storage before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Durability {
    /// Handed to the OS; may be lost on power failure.
    None,
    /// Synced by the background flusher within one flush interval.
    #[default]
    Batched,
    /// Synced before the write returns.
    Immediate,
}

impl fmt::Display for Durability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Batched => "batched",
            Self::Immediate => "immediate",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_number_ordering() {
        let first = RecordNumber::FIRST;
        assert_eq!(first.next(), RecordNumber::new(2));
        assert!(first < first.next());
        assert_eq!(first.next().to_string(), "rec:2");
    }

    #[test]
    fn batched_is_default() {
        assert_eq!(Durability::default(), Durability::Batched);
        assert_eq!(Durability::Immediate.to_string(), "immediate");
    }
}
