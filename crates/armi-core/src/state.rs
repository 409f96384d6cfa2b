//! What the live target directory already holds.

use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::{Path, PathBuf},
};

use armi_config::config::VerifyMode;
use armi_registry::RepositoryIndex;
use armi_utils::hash::{calculate_checksum, Checksum};
use rayon::prelude::*;
use tracing::{debug, trace, warn};

use crate::{
    error::{ErrorContext, Result},
    manifest::{mtime_nanos, Manifest},
};

/// Names reserved for armi's own bookkeeping inside a mirror tree.
pub fn is_internal_name(name: &str) -> bool {
    name.starts_with(".armi") || (name.starts_with('.') && name.contains(".tmp-"))
}

/// A regular file found in the target directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub size: u64,
    pub modified: Option<i64>,
    /// Checksum known to match the file, from the manifest or from hashing.
    pub checksum: Option<Checksum>,
    /// The file could not be read while verifying it.
    pub unreadable: bool,
}

/// Snapshot of a target directory.
#[derive(Debug, Clone, Default)]
pub struct LocalState {
    dir: PathBuf,
    files: BTreeMap<String, LocalFile>,
}

/// Lists the regular files in `dir`.
///
/// `reserved` names (the index archives and their links) and armi's own
/// files are left out. A missing directory is an empty state. Checksums are
/// taken from `manifest` entries whose size and mtime still match; nothing
/// is hashed here.
pub fn inspect(dir: &Path, manifest: &Manifest, reserved: &[String]) -> Result<LocalState> {
    let mut files = BTreeMap::new();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "target directory does not exist yet");
            return Ok(LocalState {
                dir: dir.to_path_buf(),
                files,
            });
        }
        Err(err) => return Err(err).with_context(|| format!("reading {}", dir.display())),
    };

    for entry in entries {
        let entry = entry.with_context(|| format!("reading {}", dir.display()))?;
        let Ok(name) = entry.file_name().into_string() else {
            warn!(dir = %dir.display(), "skipping file with non UTF-8 name");
            continue;
        };
        if is_internal_name(&name) || reserved.contains(&name) {
            continue;
        }

        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(err) => {
                warn!(file = name, "cannot stat file: {err}");
                continue;
            }
        };
        if !meta.is_file() {
            trace!(file = name, "skipping non-regular file");
            continue;
        }

        let size = meta.len();
        let modified = mtime_nanos(&meta);
        let checksum = manifest
            .trusted(&name, size, modified)
            .map(|entry| entry.checksum.clone());

        files.insert(
            name,
            LocalFile {
                size,
                modified,
                checksum,
                unreadable: false,
            },
        );
    }

    debug!(dir = %dir.display(), files = files.len(), "inspected target directory");
    Ok(LocalState {
        dir: dir.to_path_buf(),
        files,
    })
}

impl LocalState {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, filename: &str) -> Option<&LocalFile> {
        self.files.get(filename)
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &LocalFile)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Establishes checksums for every local file `index` names.
    ///
    /// Files with a wrong size are never hashed. In [`VerifyMode::Manifest`]
    /// a trusted manifest checksum with the right algorithm is kept; in
    /// [`VerifyMode::Full`] every candidate is hashed again. Hashing runs in
    /// parallel. Returns the number of files hashed.
    pub fn verify(&mut self, index: &RepositoryIndex, mode: VerifyMode) -> usize {
        let mut pending = Vec::new();

        for (name, file) in self.files.iter_mut() {
            let Some(record) = index.get(name) else {
                continue;
            };
            if record.csize.is_some_and(|csize| csize != file.size) {
                trace!(file = name, "size differs from index");
                file.checksum = None;
                continue;
            }

            let trusted = file
                .checksum
                .as_ref()
                .is_some_and(|c| c.algorithm == record.checksum.algorithm);
            if mode == VerifyMode::Manifest && trusted {
                continue;
            }
            file.checksum = None;
            pending.push((name.clone(), record.checksum.algorithm));
        }

        let hashed: Vec<_> = pending
            .par_iter()
            .map(|(name, algorithm)| {
                let path = self.dir.join(name);
                let result = calculate_checksum(&path, *algorithm).and_then(|digest| {
                    Checksum::new(*algorithm, &digest)
                });
                (name.clone(), result)
            })
            .collect();

        let count = hashed.len();
        for (name, result) in hashed {
            let Some(file) = self.files.get_mut(&name) else {
                continue;
            };
            match result {
                Ok(checksum) => file.checksum = Some(checksum),
                Err(err) => {
                    warn!(file = name, "cannot verify local file: {err}");
                    file.unreadable = true;
                }
            }
        }

        debug!(dir = %self.dir.display(), hashed = count, "verified local files");
        count
    }

    /// Whether `filename` is present with content matching `expected`.
    pub fn satisfies(&self, filename: &str, expected: &Checksum) -> bool {
        self.files.get(filename).is_some_and(|file| {
            !file.unreadable
                && file
                    .checksum
                    .as_ref()
                    .is_some_and(|c| c.algorithm == expected.algorithm && c.digest == expected.digest)
        })
    }

    /// Local files that `index` does not name.
    pub fn unreferenced<'a>(&'a self, index: &'a RepositoryIndex) -> impl Iterator<Item = &'a str> {
        self.files
            .keys()
            .map(String::as_str)
            .filter(|name| !index.contains(name))
    }

    /// Names of all local files.
    pub fn names(&self) -> HashSet<&str> {
        self.files.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use tempfile::tempdir;

    use super::*;
    use crate::{
        manifest::MANIFEST_FILE_NAME,
        test_utils::{filename, IndexBuilder},
    };

    fn reserved() -> Vec<String> {
        crate::test_utils::target().service_files().to_vec()
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        let state = inspect(&dir.path().join("nope"), &Manifest::default(), &[]).unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn test_inspect_skips_service_and_internal_files() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("core.db.tar.gz"), b"db").unwrap();
        symlink("core.db.tar.gz", root.join("core.db")).unwrap();
        fs::write(root.join(MANIFEST_FILE_NAME), b"{}").unwrap();
        fs::create_dir(root.join(".armi-staging")).unwrap();
        fs::write(root.join(".core.db.tar.gz.tmp-42"), b"tmp").unwrap();
        fs::write(root.join("foo.pkg.tar.zst"), b"foo").unwrap();

        let state = inspect(root, &Manifest::default(), &reserved()).unwrap();
        assert_eq!(state.names(), HashSet::from(["foo.pkg.tar.zst"]));
        assert_eq!(state.get("foo.pkg.tar.zst").unwrap().size, 3);
    }

    #[test]
    fn test_verify_hashes_indexed_files() {
        let dir = tempdir().unwrap();
        let builder = IndexBuilder::new()
            .package("foo", "1.0-1", b"foo payload")
            .package("bar", "1.0-1", b"bar payload");
        let index = RepositoryIndex::parse(builder.build()).unwrap();

        fs::write(dir.path().join(filename("foo", "1.0-1")), b"foo payload").unwrap();
        fs::write(dir.path().join(filename("bar", "1.0-1")), b"bar PAYLOAD").unwrap();
        fs::write(dir.path().join("stray.pkg"), b"stray").unwrap();

        let mut state = inspect(dir.path(), &Manifest::default(), &reserved()).unwrap();
        assert_eq!(state.verify(&index, VerifyMode::Manifest), 2);

        let foo = index.get(&filename("foo", "1.0-1")).unwrap();
        let bar = index.get(&filename("bar", "1.0-1")).unwrap();
        assert!(state.satisfies(&foo.filename, &foo.checksum));
        assert!(!state.satisfies(&bar.filename, &bar.checksum));
        assert_eq!(state.unreferenced(&index).collect::<Vec<_>>(), vec!["stray.pkg"]);
    }

    #[test]
    fn test_verify_skips_wrong_size() {
        let dir = tempdir().unwrap();
        let builder = IndexBuilder::new().package("foo", "1.0-1", b"foo payload");
        let index = RepositoryIndex::parse(builder.build()).unwrap();
        fs::write(dir.path().join(filename("foo", "1.0-1")), b"short").unwrap();

        let mut state = inspect(dir.path(), &Manifest::default(), &reserved()).unwrap();
        assert_eq!(state.verify(&index, VerifyMode::Full), 0);
        assert!(state.get(&filename("foo", "1.0-1")).unwrap().checksum.is_none());
    }

    #[test]
    fn test_manifest_trust_and_full_mode() {
        let dir = tempdir().unwrap();
        let builder = IndexBuilder::new().package("foo", "1.0-1", b"foo payload");
        let index = RepositoryIndex::parse(builder.build()).unwrap();
        let name = filename("foo", "1.0-1");
        fs::write(dir.path().join(&name), b"foo payload").unwrap();

        let manifest = Manifest::from_published(dir.path(), index.records());

        let mut state = inspect(dir.path(), &manifest, &reserved()).unwrap();
        assert!(state.get(&name).unwrap().checksum.is_some());
        assert_eq!(state.verify(&index, VerifyMode::Manifest), 0);
        assert!(state.satisfies(&name, &index.get(&name).unwrap().checksum));

        let mut state = inspect(dir.path(), &manifest, &reserved()).unwrap();
        assert_eq!(state.verify(&index, VerifyMode::Full), 1);
        assert!(state.satisfies(&name, &index.get(&name).unwrap().checksum));
    }

    #[test]
    fn test_is_internal_name() {
        assert!(is_internal_name(".armi-manifest.json"));
        assert!(is_internal_name(".armi-staging"));
        assert!(is_internal_name(".core.db.tmp-123"));
        assert!(!is_internal_name("foo.pkg.tar.zst"));
    }
}
