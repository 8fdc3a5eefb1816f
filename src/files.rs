//! Two-phase handling of uploaded files
//!
//! The upload layer saves media before a workflow starts. The workflow
//! owns those paths as [`StagedFiles`]: committing hands them over to the
//! database row, anything else (an error, an early return, a panic
//! unwinding through the workflow) deletes them. Files a committed change
//! made obsolete are removed afterwards with [`remove_files`].
//!
//! Filesystem failures are logged and skipped; they never replace the
//! error that triggered the cleanup.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::ProcurementError;

/// Files saved for a workflow that has not committed yet
#[derive(Debug, Default)]
pub struct StagedFiles {
    paths: Vec<PathBuf>,
    committed: bool,
}

impl StagedFiles {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            committed: false,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Stored form of the staged paths
    pub fn stored_paths(&self) -> Vec<String> {
        self.paths.iter().map(|p| p.to_string_lossy().into_owned()).collect()
    }

    /// Fail unless at least `min` files were staged
    pub fn require(&self, field: &str, min: usize) -> Result<(), ProcurementError> {
        if self.paths.len() < min {
            return Err(ProcurementError::validation(
                field,
                format!("at least {} file(s) required", min),
            ));
        }
        Ok(())
    }

    /// Hand the files over to committed state
    pub fn commit(mut self) -> Vec<String> {
        self.committed = true;
        self.stored_paths()
    }

    /// Delete every staged file; returns how many were removed
    pub fn discard(&mut self) -> usize {
        let paths = std::mem::take(&mut self.paths);
        if paths.is_empty() {
            return 0;
        }
        debug!(count = paths.len(), "Discarding staged files");
        paths.iter().filter(|p| remove_one(p)).count()
    }
}

impl Drop for StagedFiles {
    fn drop(&mut self) {
        if !self.committed {
            self.discard();
        }
    }
}

fn remove_one(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove file, continuing");
            false
        }
    }
}

/// Remove files a committed change no longer references
pub fn remove_files(paths: &[String]) -> usize {
    paths.iter().filter(|p| remove_one(Path::new(p))).count()
}
