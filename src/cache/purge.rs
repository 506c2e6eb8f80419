//! Recursive Purge Module
//!
//! Deletes a directory tree best-effort: files first, then directories
//! ordered deepest first so each one is empty when it is removed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

// == Purge Report ==
/// Counts of what a purge removed and what it failed to remove.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub files_removed: usize,
    pub dirs_removed: usize,
    pub failures: usize,
}

impl PurgeReport {
    pub fn merge(&mut self, other: PurgeReport) {
        self.files_removed += other.files_removed;
        self.dirs_removed += other.dirs_removed;
        self.failures += other.failures;
    }
}

// == Recursive Directory Purger ==
#[derive(Debug, Clone, Copy, Default)]
pub struct RecursiveDirectoryPurger;

impl RecursiveDirectoryPurger {
    /// Removes everything under `root`, and `root` itself unless `keep_root`.
    ///
    /// Individual failures are counted and skipped. A missing root is a no-op;
    /// a root that is a plain file is removed as a file.
    pub fn purge(root: &Path, keep_root: bool) -> PurgeReport {
        let mut report = PurgeReport::default();

        let metadata = match fs::symlink_metadata(root) {
            Ok(metadata) => metadata,
            Err(_) => return report,
        };
        if !metadata.is_dir() {
            if keep_root {
                return report;
            }
            record(&mut report, fs::remove_file(root), root, false);
            return report;
        }

        let mut dirs: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(root).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!("Skipping unreadable entry during purge: {}", err);
                    report.failures += 1;
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                dirs.push(entry.into_path());
            } else {
                record(&mut report, fs::remove_file(entry.path()), entry.path(), false);
            }
        }

        if !keep_root {
            dirs.push(root.to_path_buf());
        }

        // Deeper paths are always longer, so this removes children before parents
        dirs.sort_by_key(|dir| std::cmp::Reverse(dir.as_os_str().len()));
        for dir in &dirs {
            record(&mut report, fs::remove_dir(dir), dir, true);
        }

        report
    }
}

fn record(report: &mut PurgeReport, result: io::Result<()>, path: &Path, is_dir: bool) {
    match result {
        Ok(()) if is_dir => report.dirs_removed += 1,
        Ok(()) => report.files_removed += 1,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            debug!("Failed to remove {}: {}", path.display(), err);
            report.failures += 1;
        }
    }
}
