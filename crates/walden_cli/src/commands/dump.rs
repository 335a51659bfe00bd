//! Dump command implementation.

use super::{live_files, open_store};
use serde::Serialize;
use std::path::Path;
use walden_codec::{read_header, Reader};
use walden_core::wal::LogFileOptions;
use walden_core::{LogRecord, ReadOnlyLogFile};

/// A dumped record header.
#[derive(Debug, Serialize)]
pub struct DumpedRecord {
    /// File the record was read from.
    pub file: String,
    /// Byte offset within the file.
    pub offset: u64,
    /// Record number.
    pub record_number: u64,
    /// Type id from the record header.
    pub type_id: u32,
    /// Sub-type from the payload header, if it parses.
    pub sub_type: Option<u16>,
    /// Payload length in bytes.
    pub payload_len: usize,
}

impl DumpedRecord {
    fn new(file: &str, offset: u64, record: &LogRecord) -> Self {
        let sub_type = read_header(&mut Reader::new(&record.payload))
            .ok()
            .map(|h| h.sub_type);
        Self {
            file: file.to_string(),
            offset,
            record_number: record.record_number.as_u64(),
            type_id: record.type_id,
            sub_type,
            payload_len: record.payload.len(),
        }
    }
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    file: Option<&str>,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let records = dump(path, file, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            println!(
                "{:<20} {:>10} {:>10} {:>8} {:>6} {:>10}",
                "FILE", "OFFSET", "RECORD", "TYPE", "SUB", "LENGTH"
            );
            for r in &records {
                let sub = r.sub_type.map_or_else(|| "-".to_string(), |s| s.to_string());
                println!(
                    "{:<20} {:>10} {:>10} {:>8} {:>6} {:>10}",
                    r.file, r.offset, r.record_number, r.type_id, sub, r.payload_len
                );
            }
            println!();
            println!("Total: {} records", records.len());
        }
    }

    Ok(())
}

pub(crate) fn dump(
    path: &Path,
    only: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<DumpedRecord>, Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let mut files = live_files(&store);
    if let Some(only) = only {
        files.retain(|(name, _)| name == only);
        if files.is_empty() {
            // Earlier generations can still be dumped until pruned.
            let candidate = store.directory().join(only);
            if !candidate.is_file() {
                return Err(format!("No file named {only} in {}", path.display()).into());
            }
            files.push((only.to_string(), candidate));
        }
    }

    let limit = limit.unwrap_or(usize::MAX);
    let mut dumped = Vec::new();
    for (name, file_path) in files {
        if !file_path.exists() {
            continue;
        }
        let file = ReadOnlyLogFile::open(&file_path, LogFileOptions::default())?;
        for item in file.records()? {
            if dumped.len() >= limit {
                return Ok(dumped);
            }
            let (offset, record) = item?;
            dumped.push(DumpedRecord::new(&name, offset, &record));
        }
    }
    Ok(dumped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{written_log, LINE_SERDE_ID};

    #[test]
    fn dumps_headers_in_order() {
        let dir = tempfile::tempdir().unwrap();
        written_log(dir.path(), 4, false);

        let records = dump(dir.path(), None, None).unwrap();
        let numbers: Vec<u64> = records.iter().map(|r| r.record_number).collect();
        assert_eq!(numbers, [1, 2, 3, 4]);
        assert_eq!(records[0].offset, 0);
        assert!(records
            .iter()
            .all(|r| r.type_id == LINE_SERDE_ID.as_u32() && r.sub_type == Some(0)));
    }

    #[test]
    fn limit_and_file_filter() {
        let dir = tempfile::tempdir().unwrap();
        written_log(dir.path(), 6, true);

        assert_eq!(dump(dir.path(), None, Some(2)).unwrap().len(), 2);
        let old = dump(dir.path(), Some("wal-000001.log"), None).unwrap();
        assert_eq!(old.len(), 3);
        assert!(dump(dir.path(), Some("wal-000009.log"), None).is_err());
    }
}
