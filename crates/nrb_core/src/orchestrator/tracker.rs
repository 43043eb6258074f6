//! Tracking of outputs created during the current batch.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

/// Outcome of a sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    /// Files removed from disk.
    pub deleted: Vec<PathBuf>,
    /// Paths that were already gone.
    pub missing: Vec<PathBuf>,
    /// Paths that could not be removed, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

/// Concurrent set of output paths written in the current batch.
#[derive(Debug, Default)]
pub struct OutputTracker {
    paths: Mutex<BTreeSet<PathBuf>>,
}

impl OutputTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a file that exists on disk.
    pub fn record(&self, path: impl Into<PathBuf>) {
        self.paths.lock().insert(path.into());
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.lock().is_empty()
    }

    /// Tracked paths in sorted order.
    pub fn snapshot(&self) -> Vec<PathBuf> {
        self.paths.lock().iter().cloned().collect()
    }

    /// Best-effort delete of every tracked file, then clear.
    ///
    /// A failure on one path does not stop the rest.
    pub fn delete_all(&self) -> DeleteReport {
        let paths = std::mem::take(&mut *self.paths.lock());
        let mut report = DeleteReport::default();

        for path in paths {
            match remove_file_if_exists(&path) {
                Ok(true) => {
                    tracing::debug!("Deleted output {}", path.display());
                    report.deleted.push(path);
                }
                Ok(false) => report.missing.push(path),
                Err(e) => {
                    tracing::warn!("Failed to delete output {}: {}", path.display(), e);
                    report.failed.push((path, e.to_string()));
                }
            }
        }
        report
    }

    /// Drop tracking without deleting (outputs are kept).
    pub fn clear(&self) {
        self.paths.lock().clear();
    }
}

/// Remove a file, treating "not found" as success. Returns true if removed.
pub(crate) fn remove_file_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
