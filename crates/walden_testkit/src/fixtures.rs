//! Test fixtures and log directory helpers.
//!
//! Provides temporary log directories that clean up after themselves and
//! shortcuts for opening a log with the sample station aggregate.

use crate::station::{station_codecs, StationRepository};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use walden_core::aggregate::Repository;
use walden_core::{CodecRegistrator, Config, Descriptor, WriteAheadLog};

/// Capacity used by [`TestLog::open_stations`].
pub const TEST_CAPACITY: usize = 1_000;

/// A temporary log directory, deleted on drop.
pub struct TestLog {
    dir: TempDir,
}

impl TestLog {
    /// Creates an empty temporary directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Path of the directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of a file inside the directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Opens the log with the given codecs and default configuration.
    pub fn open(&self, registrators: &[&dyn CodecRegistrator]) -> Arc<WriteAheadLog> {
        self.open_with_config(Config::default(), registrators)
    }

    /// Opens the log with the given codecs and configuration.
    pub fn open_with_config(
        &self,
        config: Config,
        registrators: &[&dyn CodecRegistrator],
    ) -> Arc<WriteAheadLog> {
        WriteAheadLog::open_with(self.path(), config, registrators).expect("Failed to open log")
    }

    /// Opens the log with a station repository and replays it.
    pub fn open_stations(&self) -> (Arc<WriteAheadLog>, Arc<StationRepository>) {
        self.open_stations_with_config(Config::default())
    }

    /// Like [`open_stations`](Self::open_stations) with a custom configuration.
    pub fn open_stations_with_config(
        &self,
        config: Config,
    ) -> (Arc<WriteAheadLog>, Arc<StationRepository>) {
        let wal = self.open_with_config(config, &[&station_codecs()]);
        let stations = Repository::open(&wal, TEST_CAPACITY);
        wal.replay().expect("Failed to replay log");
        (wal, stations)
    }

    /// The descriptor currently on disk.
    pub fn descriptor(&self) -> Descriptor {
        let bytes = std::fs::read(self.file(walden_core::dir::METADATA_FILE))
            .expect("Failed to read descriptor");
        Descriptor::from_json(&bytes).expect("Failed to parse descriptor")
    }

    /// Names of the files in the directory, sorted.
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.path())
            .expect("Failed to list directory")
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }
}

impl Default for TestLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test with a temporary log directory.
///
/// # Example
///
/// ```rust,ignore
/// use walden_testkit::with_temp_log;
///
/// #[test]
/// fn my_test() {
///     with_temp_log(|log| {
///         let (wal, stations) = log.open_stations();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_temp_log<F, R>(f: F) -> R
where
    F: FnOnce(&TestLog) -> R,
{
    let log = TestLog::new();
    f(&log)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_log_has_initial_descriptor() {
        with_temp_log(|log| {
            let (wal, stations) = log.open_stations();
            assert!(stations.is_empty());
            assert_eq!(log.descriptor(), Descriptor::default());
            wal.close().unwrap();
            assert!(log.file_names().contains(&"metadata.json".to_string()));
        });
    }
}
