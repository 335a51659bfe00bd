//! Prune command implementation.

use super::format_size;
use std::path::{Path, PathBuf};
use walden_core::{Config, MetadataStore};

/// Runs the prune command.
///
/// Takes the directory lock, so it fails while a process has the log open.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    if dry_run {
        println!("DRY RUN - no files will be deleted");
        println!();
    }

    let files = prune(path, dry_run)?;
    if files.is_empty() {
        println!("Nothing to prune");
        return Ok(());
    }

    let mut reclaimed = 0;
    for (file, size) in &files {
        reclaimed += size;
        println!("  {} ({})", file.display(), format_size(*size));
    }
    println!();
    let verb = if dry_run { "Would remove" } else { "Removed" };
    println!(
        "{verb} {} files, {} reclaimed",
        files.len(),
        format_size(reclaimed)
    );

    Ok(())
}

pub(crate) fn prune(
    path: &Path,
    dry_run: bool,
) -> Result<Vec<(PathBuf, u64)>, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No log directory at {}", path.display()).into());
    }
    let mut store = MetadataStore::open(path, &Config::new().create_if_missing(false))?;

    let sized = |paths: Vec<PathBuf>| {
        paths
            .into_iter()
            .map(|p| {
                let size = std::fs::metadata(&p).map_or(0, |m| m.len());
                (p, size)
            })
            .collect::<Vec<_>>()
    };

    let files = if dry_run {
        sized(store.obsolete_files()?)
    } else {
        // Sizes must be read before the files go away.
        let sizes = sized(store.obsolete_files()?);
        let removed = store.prune_obsolete_files()?;
        sizes
            .into_iter()
            .filter(|(p, _)| removed.contains(p))
            .collect()
    };
    store.release_lock();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::written_log;
    use crate::commands::verify::verify;

    #[test]
    fn dry_run_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        written_log(dir.path(), 6, true);

        let listed = prune(dir.path(), true).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|(p, _)| p.exists()));
    }

    #[test]
    fn prune_removes_earlier_generation() {
        let dir = tempfile::tempdir().unwrap();
        written_log(dir.path(), 6, true);
        std::fs::write(dir.path().join("snapshot-000003.bin.tmp"), b"partial").unwrap();

        let removed = prune(dir.path(), false).unwrap();
        assert_eq!(removed.len(), 3);
        assert!(!dir.path().join("wal-000001.log").exists());
        assert!(dir.path().join("wal-000002.log").exists());
        assert!(prune(dir.path(), false).unwrap().is_empty());
        assert!(verify(dir.path()).unwrap().errors.is_empty());
    }
}
