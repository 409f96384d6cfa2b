//! Private scratch directory of a sync cycle.

use std::{
    fs,
    path::{Path, PathBuf},
};

use armi_utils::fs::{ensure_dir_exists, safe_remove, PART_SUFFIX};
use tracing::{debug, warn};

use crate::error::{ErrorContext, Result};

pub const STAGING_DIR_NAME: &str = ".armi-staging";

/// Downloads land here before they are published.
///
/// The directory lives inside the target directory so that publishing is a
/// same-filesystem `rename(2)`. Complete files are named exactly like the
/// package; in-progress downloads carry a `.part` suffix.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    /// Opens the staging directory of `target_dir`, creating it if needed.
    ///
    /// Leftover `.part` files from an interrupted run are removed; complete
    /// files are kept so they can be reused after re-verification.
    pub fn open(target_dir: &Path) -> Result<Self> {
        let dir = target_dir.join(STAGING_DIR_NAME);
        ensure_dir_exists(&dir)?;

        let entries = fs::read_dir(&dir).with_context(|| format!("reading {}", dir.display()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().ends_with(PART_SUFFIX))
            {
                debug!(file = %path.display(), "removing leftover partial download");
                safe_remove(&path)?;
            }
        }

        Ok(Self {
            dir,
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Where the verified download of `filename` is kept.
    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// Where the download of `filename` is written while in progress.
    pub fn part_path(&self, filename: &str) -> PathBuf {
        self.dir.join(format!("{filename}{PART_SUFFIX}"))
    }

    /// Returns the staged file for `filename` if there is one.
    pub fn staged(&self, filename: &str) -> Option<PathBuf> {
        let path = self.file_path(filename);
        fs::symlink_metadata(&path)
            .ok()
            .filter(|m| m.is_file())
            .map(|_| path)
    }

    /// Removes whatever is staged or in progress for `filename`.
    pub fn remove(&self, filename: &str) {
        for path in [self.file_path(filename), self.part_path(filename)] {
            if let Err(err) = safe_remove(&path) {
                warn!(file = %path.display(), "cannot remove staged file: {err}");
            }
        }
    }

    /// Deletes the staging directory and everything in it.
    pub fn discard(self) -> Result<()> {
        debug!(dir = %self.dir.display(), "discarding staging area");
        safe_remove(&self.dir)?;
        Ok(())
    }
}
