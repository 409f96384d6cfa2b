//! Persisted record of verified files.
//!
//! Each target directory carries a `.armi-manifest.json` listing the files
//! the last successful publish verified, with their size and modification
//! time. A later run can trust an entry whose size and mtime still match
//! instead of hashing the file again.

use std::{
    collections::BTreeMap,
    fs,
    path::Path,
    time::UNIX_EPOCH,
};

use armi_registry::PackageRecord;
use armi_utils::{fs::atomic_write, hash::Checksum};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PublishError;

pub const MANIFEST_FILE_NAME: &str = ".armi-manifest.json";

const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(flatten)]
    pub checksum: Checksum,
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub modified: i64,
    /// Unix timestamp of the verification.
    pub verified_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub last_synced: Option<i64>,
    pub files: BTreeMap<String, ManifestEntry>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            last_synced: None,
            files: BTreeMap::new(),
        }
    }
}

/// Modification time of `meta` in nanoseconds since the Unix epoch.
pub fn mtime_nanos(meta: &fs::Metadata) -> Option<i64> {
    let modified = meta.modified().ok()?;
    match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).ok(),
        Err(e) => i64::try_from(e.duration().as_nanos()).ok().map(|n| -n),
    }
}

impl Manifest {
    /// Loads the manifest of `dir`.
    ///
    /// A missing manifest yields an empty one. An unreadable or corrupt
    /// manifest is ignored with a warning; it only costs extra hashing.
    pub fn load<P: AsRef<Path>>(dir: P) -> Self {
        let path = dir.as_ref().join(MANIFEST_FILE_NAME);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                warn!(path = %path.display(), "ignoring unreadable manifest: {err}");
                return Self::default();
            }
        };

        match serde_json::from_slice::<Manifest>(&content) {
            Ok(manifest) if manifest.version == MANIFEST_VERSION => manifest,
            Ok(manifest) => {
                warn!(
                    path = %path.display(),
                    version = manifest.version,
                    "ignoring manifest with unsupported version"
                );
                Self::default()
            }
            Err(err) => {
                warn!(path = %path.display(), "ignoring corrupt manifest: {err}");
                Self::default()
            }
        }
    }

    /// Returns the entry for `filename` if the file on disk still has the
    /// recorded size and modification time.
    pub fn trusted(&self, filename: &str, size: u64, modified: Option<i64>) -> Option<&ManifestEntry> {
        let entry = self.files.get(filename)?;
        (entry.size == size && Some(entry.modified) == modified).then_some(entry)
    }

    /// Builds the manifest for the files of `records` as they exist in `dir`.
    ///
    /// Every record passed in must already be verified. Records whose file
    /// cannot be stat'ed are left out.
    pub fn from_published<'a, I>(dir: &Path, records: I) -> Self
    where
        I: IntoIterator<Item = &'a PackageRecord>,
    {
        let now = Utc::now().timestamp();
        let mut files = BTreeMap::new();

        for record in records {
            let path = dir.join(&record.filename);
            let meta = match fs::metadata(&path) {
                Ok(meta) => meta,
                Err(err) => {
                    debug!(file = %path.display(), "not adding to manifest: {err}");
                    continue;
                }
            };
            let Some(modified) = mtime_nanos(&meta) else {
                continue;
            };
            files.insert(
                record.filename.clone(),
                ManifestEntry {
                    checksum: record.checksum.clone(),
                    size: meta.len(),
                    modified,
                    verified_at: now,
                },
            );
        }

        Self {
            version: MANIFEST_VERSION,
            last_synced: Some(now),
            files,
        }
    }

    /// Atomically writes the manifest into `dir`.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<(), PublishError> {
        let content = serde_json::to_vec_pretty(self)?;
        atomic_write(dir.as_ref().join(MANIFEST_FILE_NAME), &content)?;
        Ok(())
    }
}
