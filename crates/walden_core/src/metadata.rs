//! The descriptor naming the live snapshot and log files.
//!
//! `metadata.json` is the only file ever rewritten in place, and only by
//! rename: a new descriptor is written to a synced temporary file and
//! moved over the old one. A crash leaves either the old or the new
//! descriptor, never a mixture.

use crate::config::Config;
use crate::dir::{
    file_name, next_file_name, WalDir, SNAPSHOT_EXTENSION, SNAPSHOT_PREFIX, TEMP_SUFFIX,
    WAL_EXTENSION, WAL_PREFIX,
};
use crate::error::{CoreError, CoreResult};
use crate::types::RecordNumber;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, info};

/// Current descriptor format version.
pub const METADATA_VERSION: u32 = 1;

/// Contents of `metadata.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Format version, always [`METADATA_VERSION`].
    pub version: u32,
    /// File name of the latest snapshot.
    pub latest_snapshot: String,
    /// Record number the latest log file starts at.
    pub first_record_number: u64,
    /// Log files written since the latest snapshot, oldest first.
    pub wal_files: Vec<String>,
    /// Record number replay resumes at after the latest snapshot.
    ///
    /// Only written once the log has rotated past its first file; until
    /// then it equals `first_record_number`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_record_number: Option<u64>,
}

impl Default for Descriptor {
    fn default() -> Self {
        Self {
            version: METADATA_VERSION,
            latest_snapshot: file_name(SNAPSHOT_PREFIX, 1, SNAPSHOT_EXTENSION),
            first_record_number: RecordNumber::FIRST.as_u64(),
            wal_files: vec![file_name(WAL_PREFIX, 1, WAL_EXTENSION)],
            snapshot_record_number: None,
        }
    }
}

impl Descriptor {
    /// Parses and validates a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Metadata`] for malformed JSON, an unknown
    /// version, an empty log file list or unparsable file names.
    pub fn from_json(bytes: &[u8]) -> CoreResult<Self> {
        let descriptor: Self = serde_json::from_slice(bytes)
            .map_err(|e| CoreError::metadata(format!("malformed descriptor: {e}")))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Serializes the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Metadata`] if serialization fails.
    pub fn to_json(&self) -> CoreResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| CoreError::metadata(format!("cannot serialize descriptor: {e}")))
    }

    fn validate(&self) -> CoreResult<()> {
        if self.version != METADATA_VERSION {
            return Err(CoreError::metadata(format!(
                "unsupported descriptor version {}",
                self.version
            )));
        }
        if self.first_record_number == 0 {
            return Err(CoreError::metadata("first record number must be positive"));
        }
        if self.wal_files.is_empty() {
            return Err(CoreError::metadata("descriptor lists no log files"));
        }
        match self.snapshot_record_number {
            None if self.wal_files.len() > 1 => {
                return Err(CoreError::metadata(
                    "descriptor lists several log files but no snapshot record number",
                ));
            }
            Some(n) if n == 0 || n > self.first_record_number => {
                return Err(CoreError::metadata(format!(
                    "snapshot record number {n} is outside 1..={}",
                    self.first_record_number
                )));
            }
            _ => {}
        }
        crate::dir::extract_number_from_file_name(&self.latest_snapshot)?;
        for name in &self.wal_files {
            crate::dir::extract_number_from_file_name(name)?;
        }
        Ok(())
    }

    /// Record number the oldest live log file starts at.
    #[must_use]
    pub fn resume_record_number(&self) -> u64 {
        self.snapshot_record_number
            .unwrap_or(self.first_record_number)
    }

    /// Name of the file new records are appended to.
    #[must_use]
    pub fn latest_wal_file(&self) -> &str {
        self.wal_files.last().map_or("", String::as_str)
    }

    /// Whether `name` is one of the live files.
    #[must_use]
    pub fn references(&self, name: &str) -> bool {
        self.latest_snapshot == name || self.wal_files.iter().any(|f| f == name)
    }
}

/// Owns the log directory and its descriptor.
///
/// All mutation goes through this type, which always holds the descriptor
/// that is on disk.
#[derive(Debug)]
pub struct MetadataStore {
    dir: WalDir,
    descriptor: Descriptor,
}

impl MetadataStore {
    /// Opens the directory and loads its descriptor, writing the initial
    /// descriptor into a new directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is locked or missing, or if the
    /// descriptor is unreadable.
    pub fn open(path: &Path, config: &Config) -> CoreResult<Self> {
        let dir = WalDir::open(path, config.create_if_missing, config.lock_directory)?;
        let metadata_path = dir.metadata_path();

        let descriptor = if metadata_path.exists() {
            Descriptor::from_json(&fs::read(&metadata_path)?)?
        } else if config.create_if_missing {
            let descriptor = Descriptor::default();
            let temp = dir.write_temp("metadata", ".json.tmp", &descriptor.to_json()?)?;
            dir.persist(temp, crate::dir::METADATA_FILE)?;
            dir.sync_directory()?;
            info!(path = %path.display(), "Initialized log directory");
            descriptor
        } else {
            return Err(CoreError::metadata(format!(
                "no descriptor in {}",
                path.display()
            )));
        };

        debug!(
            path = %path.display(),
            snapshot = %descriptor.latest_snapshot,
            wal_files = descriptor.wal_files.len(),
            "Loaded descriptor"
        );
        Ok(Self { dir, descriptor })
    }

    /// The log directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        self.dir.path()
    }

    /// The descriptor currently on disk.
    #[must_use]
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Path of the latest snapshot, created empty if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn latest_snapshot_file(&self) -> CoreResult<PathBuf> {
        self.dir.ensure_file(&self.descriptor.latest_snapshot)
    }

    /// Path of the latest log file, created empty if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn latest_wal_file(&self) -> CoreResult<PathBuf> {
        self.dir.ensure_file(self.descriptor.latest_wal_file())
    }

    /// Record number the latest log file starts at.
    #[must_use]
    pub fn first_record_number_of_latest_wal_file(&self) -> RecordNumber {
        RecordNumber(self.descriptor.first_record_number)
    }

    /// Record number the oldest live log file starts at, where replay
    /// resumes after the latest snapshot.
    #[must_use]
    pub fn first_record_number_after_snapshot(&self) -> RecordNumber {
        RecordNumber(self.descriptor.resume_record_number())
    }

    /// Paths of the log files written since the latest snapshot, oldest first.
    #[must_use]
    pub fn wal_files_since_latest_snapshot(&self) -> Vec<PathBuf> {
        self.descriptor
            .wal_files
            .iter()
            .map(|name| self.dir.file_path(name))
            .collect()
    }

    /// Calls `f` with each log file written since the latest snapshot,
    /// oldest first.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first error from `f`.
    pub fn for_each_wal_file_since_latest_snapshot<F>(&self, mut f: F) -> CoreResult<()>
    where
        F: FnMut(&Path) -> CoreResult<()>,
    {
        for path in self.wal_files_since_latest_snapshot() {
            f(&path)?;
        }
        Ok(())
    }

    /// Creates an empty temporary file to write a snapshot into.
    ///
    /// The file deletes itself when dropped, unless it is handed to
    /// [`store_new_snapshot_file`](Self::store_new_snapshot_file).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create_temporary_snapshot_file(&self) -> CoreResult<TempPath> {
        self.dir.create_temp(SNAPSHOT_PREFIX, ".bin.tmp")
    }

    /// Makes a finished snapshot the latest one.
    ///
    /// Allocates the next snapshot and log file names, writes the new
    /// descriptor to a synced temporary file, renames the snapshot into
    /// place, then renames the descriptor into place. Until that last
    /// rename the previous generation stays current. `next_record_number`
    /// is where the new log file will start.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be written, synced or renamed.
    pub fn store_new_snapshot_file(
        &mut self,
        snapshot: TempPath,
        next_record_number: RecordNumber,
    ) -> CoreResult<()> {
        let descriptor = Descriptor {
            version: METADATA_VERSION,
            latest_snapshot: next_file_name(
                &self.descriptor.latest_snapshot,
                SNAPSHOT_PREFIX,
                SNAPSHOT_EXTENSION,
            )?,
            first_record_number: next_record_number.as_u64(),
            wal_files: vec![next_file_name(
                self.descriptor.latest_wal_file(),
                WAL_PREFIX,
                WAL_EXTENSION,
            )?],
            snapshot_record_number: None,
        };

        let pending = self
            .dir
            .write_temp("metadata", ".json.tmp", &descriptor.to_json()?)?;
        self.dir.persist(snapshot, &descriptor.latest_snapshot)?;
        self.dir.persist(pending, crate::dir::METADATA_FILE)?;
        self.dir.sync_directory()?;

        info!(
            snapshot = %descriptor.latest_snapshot,
            wal = %descriptor.latest_wal_file(),
            next = %next_record_number,
            "Stored new snapshot"
        );
        self.descriptor = descriptor;
        Ok(())
    }

    /// Appends a new log file to the live set and returns its path.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor cannot be written.
    pub fn start_new_wal_file(&mut self, first_record_number: RecordNumber) -> CoreResult<PathBuf> {
        let name = next_file_name(self.descriptor.latest_wal_file(), WAL_PREFIX, WAL_EXTENSION)?;
        let mut descriptor = self.descriptor.clone();
        descriptor.wal_files.push(name);
        descriptor.snapshot_record_number = Some(self.descriptor.resume_record_number());
        descriptor.first_record_number = first_record_number.as_u64();

        let pending = self
            .dir
            .write_temp("metadata", ".json.tmp", &descriptor.to_json()?)?;
        self.dir.persist(pending, crate::dir::METADATA_FILE)?;
        self.dir.sync_directory()?;

        info!(wal = %descriptor.latest_wal_file(), first = %first_record_number, "Started new log file");
        self.descriptor = descriptor;
        self.latest_wal_file()
    }

    /// Files in the directory that no longer belong to the live set.
    ///
    /// Covers log and snapshot files of earlier generations and temporary
    /// files left behind by a crash.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn obsolete_files(&self) -> CoreResult<Vec<PathBuf>> {
        let mut obsolete = Vec::new();
        for entry in fs::read_dir(self.dir.path())? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let generational = (name.starts_with(WAL_PREFIX) && name.ends_with(WAL_EXTENSION))
                || (name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(SNAPSHOT_EXTENSION));
            if name.ends_with(TEMP_SUFFIX) || (generational && !self.descriptor.references(name))
            {
                obsolete.push(entry.path());
            }
        }
        obsolete.sort();
        Ok(obsolete)
    }

    /// Deletes [`obsolete_files`](Self::obsolete_files) and returns their paths.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be removed.
    pub fn prune_obsolete_files(&self) -> CoreResult<Vec<PathBuf>> {
        let obsolete = self.obsolete_files()?;
        for path in &obsolete {
            fs::remove_file(path)?;
            debug!(path = %path.display(), "Removed obsolete file");
        }
        if !obsolete.is_empty() {
            self.dir.sync_directory()?;
        }
        Ok(obsolete)
    }

    /// Releases the directory lock.
    pub fn release_lock(&mut self) {
        self.dir.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn store(path: &Path) -> MetadataStore {
        MetadataStore::open(path, &Config::default()).unwrap()
    }

    #[test]
    fn initial_descriptor() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());

        assert_eq!(store.descriptor(), &Descriptor::default());
        assert_eq!(
            store.latest_snapshot_file().unwrap(),
            temp.path().join("snapshot-000001.bin")
        );
        assert_eq!(
            store.latest_wal_file().unwrap(),
            temp.path().join("wal-000001.log")
        );
        assert_eq!(store.first_record_number_of_latest_wal_file(), RecordNumber(1));
        assert!(temp.path().join("metadata.json").exists());
    }

    #[test]
    fn json_shape() {
        let json = String::from_utf8(Descriptor::default().to_json().unwrap()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["latestSnapshot"], "snapshot-000001.bin");
        assert_eq!(value["firstRecordNumber"], 1);
        assert_eq!(value["walFiles"][0], "wal-000001.log");
        assert!(value.get("snapshotRecordNumber").is_none());
    }

    #[test]
    fn malformed_descriptor_is_an_error() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("metadata.json"), b"{ not json").unwrap();
        assert!(matches!(
            MetadataStore::open(temp.path(), &Config::default()),
            Err(CoreError::Metadata { .. })
        ));

        fs::write(
            temp.path().join("metadata.json"),
            br#"{"version":2,"latestSnapshot":"snapshot-000001.bin","firstRecordNumber":1,"walFiles":["wal-000001.log"]}"#,
        )
        .unwrap();
        assert!(matches!(
            MetadataStore::open(temp.path(), &Config::default()),
            Err(CoreError::Metadata { .. })
        ));
    }

    #[test]
    fn snapshot_rotation() {
        let temp = tempdir().unwrap();
        let mut store = store(temp.path());

        let snapshot = store.create_temporary_snapshot_file().unwrap();
        fs::OpenOptions::new()
            .append(true)
            .open(&snapshot)
            .unwrap()
            .write_all(b"snapshot bytes")
            .unwrap();
        store
            .store_new_snapshot_file(snapshot, RecordNumber(17))
            .unwrap();

        let expected = Descriptor {
            version: 1,
            latest_snapshot: "snapshot-000002.bin".into(),
            first_record_number: 17,
            wal_files: vec!["wal-000002.log".into()],
            snapshot_record_number: None,
        };
        assert_eq!(store.descriptor(), &expected);
        assert_eq!(
            fs::read(temp.path().join("snapshot-000002.bin")).unwrap(),
            b"snapshot bytes"
        );

        drop(store);
        let reopened = MetadataStore::open(temp.path(), &Config::default()).unwrap();
        assert_eq!(reopened.descriptor(), &expected);
    }

    #[test]
    fn dropped_snapshot_leaves_nothing_behind() {
        let temp = tempdir().unwrap();
        let store = store(temp.path());

        let snapshot = store.create_temporary_snapshot_file().unwrap();
        let path = snapshot.to_path_buf();
        assert!(path.exists());
        drop(snapshot);
        assert!(!path.exists());
        assert_eq!(store.descriptor(), &Descriptor::default());
    }

    #[test]
    fn wal_rotation_keeps_older_files_live() {
        let temp = tempdir().unwrap();
        let mut store = store(temp.path());

        let path = store.start_new_wal_file(RecordNumber(5)).unwrap();
        assert_eq!(path, temp.path().join("wal-000002.log"));
        assert_eq!(store.first_record_number_of_latest_wal_file(), RecordNumber(5));
        assert_eq!(
            store.wal_files_since_latest_snapshot(),
            vec![
                temp.path().join("wal-000001.log"),
                temp.path().join("wal-000002.log")
            ]
        );

        let mut visited = Vec::new();
        store
            .for_each_wal_file_since_latest_snapshot(|p| {
                visited.push(p.to_path_buf());
                Ok(())
            })
            .unwrap();
        assert_eq!(visited.len(), 2);
    }

    #[test]
    fn rotation_remembers_snapshot_record_number() {
        let temp = tempdir().unwrap();
        let mut store = store(temp.path());
        let snapshot = store.create_temporary_snapshot_file().unwrap();
        store.store_new_snapshot_file(snapshot, RecordNumber(10)).unwrap();
        assert_eq!(store.first_record_number_after_snapshot(), RecordNumber(10));

        store.start_new_wal_file(RecordNumber(14)).unwrap();
        store.start_new_wal_file(RecordNumber(20)).unwrap();
        assert_eq!(store.first_record_number_of_latest_wal_file(), RecordNumber(20));
        assert_eq!(store.first_record_number_after_snapshot(), RecordNumber(10));

        drop(store);
        let mut store = MetadataStore::open(temp.path(), &Config::default()).unwrap();
        assert_eq!(store.descriptor().snapshot_record_number, Some(10));

        let snapshot = store.create_temporary_snapshot_file().unwrap();
        store.store_new_snapshot_file(snapshot, RecordNumber(25)).unwrap();
        assert_eq!(store.descriptor().snapshot_record_number, None);
        assert_eq!(store.first_record_number_after_snapshot(), RecordNumber(25));
    }

    #[test]
    fn several_log_files_need_snapshot_record_number() {
        let missing = br#"{"version":1,"latestSnapshot":"snapshot-000001.bin","firstRecordNumber":5,"walFiles":["wal-000001.log","wal-000002.log"]}"#;
        assert!(matches!(
            Descriptor::from_json(missing),
            Err(CoreError::Metadata { .. })
        ));
        let ahead = br#"{"version":1,"latestSnapshot":"snapshot-000001.bin","firstRecordNumber":5,"walFiles":["wal-000001.log","wal-000002.log"],"snapshotRecordNumber":6}"#;
        assert!(matches!(
            Descriptor::from_json(ahead),
            Err(CoreError::Metadata { .. })
        ));
        let valid = br#"{"version":1,"latestSnapshot":"snapshot-000001.bin","firstRecordNumber":5,"walFiles":["wal-000001.log","wal-000002.log"],"snapshotRecordNumber":1}"#;
        assert_eq!(Descriptor::from_json(valid).unwrap().resume_record_number(), 1);
    }

    #[test]
    fn obsolete_files_after_snapshot() {
        let temp = tempdir().unwrap();
        let mut store = store(temp.path());
        store.latest_snapshot_file().unwrap();
        store.latest_wal_file().unwrap();
        fs::write(temp.path().join("snapshotXYZ.bin.tmp"), b"").unwrap();
        fs::write(temp.path().join("notes.txt"), b"").unwrap();

        let snapshot = store.create_temporary_snapshot_file().unwrap();
        store.store_new_snapshot_file(snapshot, RecordNumber(1)).unwrap();
        store.latest_wal_file().unwrap();

        let obsolete: Vec<String> = store
            .obsolete_files()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            obsolete,
            vec!["snapshot-000001.bin", "snapshotXYZ.bin.tmp", "wal-000001.log"]
        );

        store.prune_obsolete_files().unwrap();
        assert!(store.obsolete_files().unwrap().is_empty());
        assert!(temp.path().join("snapshot-000002.bin").exists());
        assert!(temp.path().join("wal-000002.log").exists());
        assert!(temp.path().join("notes.txt").exists());
    }
}
