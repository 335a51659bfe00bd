//! Verify command implementation.

use super::{live_files, open_store};
use std::path::Path;
use walden_codec::peek_serde_id;
use walden_core::wal::LogFileOptions;
use walden_core::ReadOnlyLogFile;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of files checked.
    pub files_checked: usize,
    /// Number of records checked.
    pub records_checked: u64,
    /// Files ending in an incomplete record that replay will tolerate.
    pub torn_tails: Vec<String>,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying log directory at {}", path.display());
    println!();

    let result = verify(path)?;

    println!("  Files checked:   {}", result.files_checked);
    println!("  Records checked: {}", result.records_checked);
    for name in &result.torn_tails {
        println!("  Incomplete trailing record in {name} (will be truncated on open)");
    }
    for error in &result.errors {
        println!("  ERROR: {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Log verification passed");
        Ok(())
    } else {
        println!("✗ Log verification failed");
        Err("Verification failed".into())
    }
}

pub(crate) fn verify(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let descriptor = store.descriptor();
    let files = live_files(&store);
    let latest = files.len() - 1;

    let mut result = VerifyResult::default();
    // Last record number seen in the log files, for the cross-file check.
    let mut previous: Option<u64> = None;

    for (index, (name, file_path)) in files.iter().enumerate() {
        let is_snapshot = index == 0;
        if !file_path.exists() {
            if index != latest {
                result.errors.push(format!("{name}: missing"));
            }
            continue;
        }

        let file = ReadOnlyLogFile::open(file_path, LogFileOptions::default())?;
        let mut records = file.records()?;
        let mut first: Option<u64> = None;
        for item in records.by_ref() {
            let (offset, record) = match item {
                Ok(item) => item,
                Err(e) => {
                    result.errors.push(format!("{name}: {e}"));
                    break;
                }
            };
            result.records_checked += 1;
            let number = record.record_number.as_u64();
            first.get_or_insert(number);

            match peek_serde_id(&record.payload) {
                Ok(id) if id.as_u32() == record.type_id => {}
                Ok(id) => result.errors.push(format!(
                    "{name}: record {number} at offset {offset} has type id {} but payload serde id {id}",
                    record.type_id
                )),
                Err(e) => result.errors.push(format!(
                    "{name}: record {number} at offset {offset}: {e}"
                )),
            }
        }
        result.files_checked += 1;

        if records.has_torn_tail() {
            if index == latest && !is_snapshot {
                result.torn_tails.push(name.clone());
            } else {
                result
                    .errors
                    .push(format!("{name}: incomplete trailing record"));
            }
        }

        let Some(first) = first else {
            if !is_snapshot && index != latest {
                result
                    .errors
                    .push(format!("{name}: empty but not the latest log file"));
            }
            continue;
        };
        if is_snapshot {
            if first != 1 {
                result
                    .errors
                    .push(format!("{name}: snapshot starts at record {first}, expected 1"));
            }
            continue;
        }
        if let Some(previous) = previous {
            if first != previous + 1 {
                result.errors.push(format!(
                    "{name}: starts at record {first}, previous file ended at {previous}"
                ));
            }
        }
        if index == 1 && first != descriptor.resume_record_number() {
            result.errors.push(format!(
                "{name}: starts at record {first}, but the snapshot ends before {}",
                descriptor.resume_record_number()
            ));
        }
        if index == latest && first != descriptor.first_record_number {
            result.errors.push(format!(
                "{name}: starts at record {first}, descriptor says {}",
                descriptor.first_record_number
            ));
        }
        previous = records.last_record_number().map(|n| n.as_u64());
    }

    Ok(result)
}
