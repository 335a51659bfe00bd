//! CLI command implementations.

pub mod dump;
pub mod inspect;
pub mod prune;
pub mod verify;

use std::path::{Path, PathBuf};
use walden_core::{Config, MetadataStore};

/// Opens a log directory without locking or creating anything.
///
/// Safe to run next to a process that has the log open.
pub(crate) fn open_store(path: &Path) -> Result<MetadataStore, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No log directory at {}", path.display()).into());
    }
    let config = Config::new().create_if_missing(false).lock_directory(false);
    Ok(MetadataStore::open(path, &config)?)
}

/// The snapshot followed by the log files, as `(name, path)` pairs.
///
/// Files named by the descriptor but not yet created are included; callers
/// treat them as empty.
pub(crate) fn live_files(store: &MetadataStore) -> Vec<(String, PathBuf)> {
    let descriptor = store.descriptor();
    std::iter::once(&descriptor.latest_snapshot)
        .chain(descriptor.wal_files.iter())
        .map(|name| (name.clone(), store.directory().join(name)))
        .collect()
}

/// Formats a byte count for humans.
pub(crate) fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} bytes")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;
    use walden_codec::{verify_plain_header, write_header, CodecResult, Reader, SerdeId, Writer};
    use walden_core::{CodecRegistry, Durability, WalCodec, WriteAheadLog};

    pub(crate) const LINE_SERDE_ID: SerdeId = SerdeId(7);

    struct LineCodec;

    impl WalCodec for LineCodec {
        type Entry = String;

        fn serde_id(&self) -> SerdeId {
            LINE_SERDE_ID
        }

        fn encode(&self, entry: &String, out: &mut Writer<'_>) -> CodecResult<()> {
            write_header(out, self.serde_id(), 0);
            out.put_str(entry)
        }

        fn decode(&self, input: &mut Reader<'_>) -> CodecResult<String> {
            verify_plain_header(input, self.serde_id())?;
            input.get_str()
        }
    }

    /// A closed log with `count` string entries and, optionally, a snapshot
    /// taken halfway.
    pub(crate) fn written_log(dir: &Path, count: usize, snapshot: bool) {
        written_log_with(dir, count, snapshot, Config::default());
    }

    pub(crate) fn written_log_with(dir: &Path, count: usize, snapshot: bool, config: Config) {
        let mut builder = CodecRegistry::builder();
        builder.register(LineCodec).unwrap();
        let wal: Arc<WriteAheadLog> = WriteAheadLog::open(dir, config, builder.build()).unwrap();
        wal.replay().unwrap();
        for i in 0..count {
            if snapshot && i == count / 2 {
                wal.take_snapshot().unwrap();
            }
            wal.append(&format!("entry {i}"), Durability::Batched).unwrap();
        }
        wal.close().unwrap();
    }

    #[test]
    fn formats_sizes() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_store(&dir.path().join("absent")).unwrap_err();
        assert!(err.to_string().contains("No log directory"));
    }

    #[test]
    fn open_store_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open_store(dir.path()).is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn live_files_start_with_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        written_log(dir.path(), 4, true);
        let store = open_store(dir.path()).unwrap();
        let names: Vec<String> = live_files(&store).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["snapshot-000002.bin", "wal-000002.log"]);
    }
}
