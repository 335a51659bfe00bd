//! Inspect command implementation.

use super::{format_size, live_files, open_store};
use serde::Serialize;
use std::path::Path;

/// Log directory inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Log directory path.
    pub path: String,
    /// Descriptor format version.
    pub version: u32,
    /// Record number the latest log file starts at.
    pub first_record_number: u64,
    /// Snapshot followed by log files, oldest first.
    pub files: Vec<FileInfo>,
    /// Total size of the live files in bytes.
    pub total_size: u64,
    /// Files no longer named by the descriptor.
    pub obsolete_files: Vec<String>,
}

/// One live file.
#[derive(Debug, Serialize)]
pub struct FileInfo {
    /// File name.
    pub name: String,
    /// Size in bytes, zero if the file was never created.
    pub size: u64,
    /// Whether the file exists yet.
    pub exists: bool,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

pub(crate) fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let descriptor = store.descriptor();

    let mut files = Vec::new();
    for (name, file_path) in live_files(&store) {
        let metadata = std::fs::metadata(&file_path).ok();
        files.push(FileInfo {
            name,
            size: metadata.as_ref().map_or(0, std::fs::Metadata::len),
            exists: metadata.is_some(),
        });
    }

    let obsolete_files = store
        .obsolete_files()?
        .iter()
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
        .collect();

    Ok(InspectResult {
        path: path.display().to_string(),
        version: descriptor.version,
        first_record_number: descriptor.first_record_number,
        total_size: files.iter().map(|f| f.size).sum(),
        files,
        obsolete_files,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Walden Log Inspection");
    println!("=====================");
    println!();
    println!("Path: {}", result.path);
    println!("Descriptor version: {}", result.version);
    println!(
        "Latest log file starts at record: {}",
        result.first_record_number
    );
    println!();
    println!("Live Files:");
    for file in &result.files {
        if file.exists {
            println!("  {:<24} {}", file.name, format_size(file.size));
        } else {
            println!("  {:<24} (not created)", file.name);
        }
    }
    println!("  Total: {}", format_size(result.total_size));

    if !result.obsolete_files.is_empty() {
        println!();
        println!("Obsolete Files ({}):", result.obsolete_files.len());
        for name in &result.obsolete_files {
            println!("  {name}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::written_log;

    #[test]
    fn reports_live_and_obsolete_files() {
        let dir = tempfile::tempdir().unwrap();
        written_log(dir.path(), 6, true);

        let result = inspect(dir.path()).unwrap();
        assert_eq!(result.version, 1);
        assert_eq!(result.first_record_number, 4);
        let names: Vec<&str> = result.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["snapshot-000002.bin", "wal-000002.log"]);
        assert!(result.files.iter().all(|f| f.exists));
        assert!(result.obsolete_files.contains(&"wal-000001.log".to_string()));
        assert!(result.obsolete_files.contains(&"snapshot-000001.bin".to_string()));
    }
}
