//! Committing a cycle to the live target directory.
//!
//! The order of operations is what keeps the published index honest:
//!
//! 1. staged packages are renamed into the target directory, new names
//!    first and overwrites last, then the directory is fsynced;
//! 2. the files database and then the package database are replaced
//!    atomically, and their `.db`/`.files` links are repointed;
//! 3. stale packages are removed, if pruning is enabled;
//! 4. the manifest is rewritten.
//!
//! A reader therefore never sees an index naming a file that is not fully
//! in place.

use std::{
    fs,
    path::{Path, PathBuf},
};

use armi_events::{EventSink, PublishStage, SyncEvent};
use armi_registry::PackageRecord;
use armi_utils::fs::{atomic_write, ensure_dir_exists, rename, replace_symlink, safe_remove, sync_dir};
use tracing::{debug, info, warn};

use crate::{error::PublishError, manifest::Manifest, staging::StagingArea};

/// An index archive to be written under `name` and linked from `link`.
#[derive(Debug, Clone)]
pub struct IndexArchive {
    pub name: String,
    pub link: String,
    pub content: Vec<u8>,
}

pub struct PublishRequest<'a> {
    /// Label used in events, e.g. `x86_64/core`.
    pub target: &'a str,
    pub dir: &'a Path,
    pub staging: &'a StagingArea,
    /// Records downloaded this cycle; each must have a staged file.
    pub staged: Vec<&'a PackageRecord>,
    /// Every record the new index names.
    pub published: Vec<&'a PackageRecord>,
    pub db: IndexArchive,
    pub files: Option<IndexArchive>,
    /// Local files the new index does not name.
    pub stale: &'a [String],
    pub prune: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Staged files moved under a name that did not exist yet.
    pub moved: usize,
    /// Staged files that replaced an existing file of the same name.
    pub replaced: usize,
    pub index_changed: bool,
    pub pruned: usize,
}

/// Publishes a cycle. See the module docs for the ordering.
///
/// Nothing in the live directory is touched unless every staged record is
/// present in staging with its expected size.
pub fn publish(req: PublishRequest<'_>, events: &dyn EventSink) -> Result<PublishReport, PublishError> {
    let mut report = PublishReport::default();
    let stage = |stage| {
        events.emit(SyncEvent::Publishing {
            target: req.target.to_string(),
            stage,
        })
    };

    let mut fresh: Vec<(PathBuf, PathBuf)> = Vec::new();
    let mut overwrites: Vec<(PathBuf, PathBuf)> = Vec::new();
    for record in &req.staged {
        let from = req
            .staging
            .staged(&record.filename)
            .ok_or_else(|| PublishError::MissingStagedFile {
                filename: record.filename.clone(),
            })?;
        if let Some(expected) = record.csize {
            let actual = fs::metadata(&from).map(|m| m.len()).unwrap_or(0);
            if actual != expected {
                return Err(PublishError::StagedSizeMismatch {
                    filename: record.filename.clone(),
                    expected,
                    actual,
                });
            }
        }

        let to = req.dir.join(&record.filename);
        if fs::symlink_metadata(&to).is_ok() {
            overwrites.push((from, to));
        } else {
            fresh.push((from, to));
        }
    }

    ensure_dir_exists(req.dir)?;

    stage(PublishStage::MovingFiles {
        count: fresh.len() + overwrites.len(),
    });
    for (from, to) in &fresh {
        rename(from, to)?;
    }
    for (from, to) in &overwrites {
        debug!(file = %to.display(), "replacing file with new content");
        rename(from, to)?;
    }
    report.moved = fresh.len();
    report.replaced = overwrites.len();
    sync_dir(req.dir)?;

    stage(PublishStage::WritingIndex);
    for archive in req.files.iter().chain(std::iter::once(&req.db)) {
        report.index_changed |= write_index(req.dir, archive)?;
    }

    if req.prune && !req.stale.is_empty() {
        stage(PublishStage::Pruning {
            count: req.stale.len(),
        });
        report.pruned = prune(req.dir, req.stale, &req.published);
    }

    Manifest::from_published(req.dir, req.published.iter().copied()).save(req.dir)?;

    stage(PublishStage::Done);
    info!(
        repo = req.target,
        moved = report.moved,
        replaced = report.replaced,
        pruned = report.pruned,
        "published"
    );
    Ok(report)
}

/// Writes `archive` unless the live copy is already identical, then makes
/// sure its link points at it. Returns whether the archive was rewritten.
fn write_index(dir: &Path, archive: &IndexArchive) -> Result<bool, PublishError> {
    let path = dir.join(&archive.name);
    let unchanged = fs::read(&path).is_ok_and(|current| current == archive.content);
    if !unchanged {
        atomic_write(&path, &archive.content)?;
        debug!(file = %path.display(), bytes = archive.content.len(), "index written");
    }

    let link = dir.join(&archive.link);
    let linked = fs::read_link(&link).is_ok_and(|target| target == Path::new(&archive.name));
    if !linked {
        replace_symlink(&archive.name, &link)?;
    }
    Ok(!unchanged)
}

fn prune(dir: &Path, stale: &[String], published: &[&PackageRecord]) -> usize {
    let mut pruned = 0;
    for name in stale {
        if published.iter().any(|r| &r.filename == name) {
            warn!(file = name, "refusing to prune a published file");
            continue;
        }
        match safe_remove(dir.join(name)) {
            Ok(()) => {
                debug!(file = name, "pruned stale file");
                pruned += 1;
            }
            Err(err) => warn!(file = name, "cannot prune stale file: {err}"),
        }
    }
    pruned
}

#[cfg(test)]
mod tests {
    use armi_events::CollectorSink;
    use tempfile::tempdir;

    use super::*;
    use crate::{manifest::MANIFEST_FILE_NAME, test_utils::record_for};

    fn db(content: &[u8]) -> IndexArchive {
        IndexArchive {
            name: "core.db.tar.gz".to_string(),
            link: "core.db".to_string(),
            content: content.to_vec(),
        }
    }

    fn request<'a>(
        dir: &'a Path,
        staging: &'a StagingArea,
        staged: Vec<&'a PackageRecord>,
        published: Vec<&'a PackageRecord>,
        stale: &'a [String],
        prune: bool,
    ) -> PublishRequest<'a> {
        PublishRequest {
            target: "x86_64/core",
            dir,
            staging,
            staged,
            published,
            db: db(b"new index"),
            files: None,
            stale,
            prune,
        }
    }

    #[test]
    fn test_publish_moves_files_and_writes_index() {
        let dir = tempdir().unwrap();
        let staging = StagingArea::open(dir.path()).unwrap();
        let foo = record_for("foo", b"foo payload");
        fs::write(staging.file_path(&foo.filename), b"foo payload").unwrap();

        let events = CollectorSink::default();
        let report = publish(
            request(dir.path(), &staging, vec![&foo], vec![&foo], &[], false),
            &events,
        )
        .unwrap();

        assert_eq!(report.moved, 1);
        assert!(report.index_changed);
        assert_eq!(fs::read(dir.path().join(&foo.filename)).unwrap(), b"foo payload");
        assert_eq!(fs::read(dir.path().join("core.db.tar.gz")).unwrap(), b"new index");
        assert_eq!(
            fs::read_link(dir.path().join("core.db")).unwrap(),
            PathBuf::from("core.db.tar.gz")
        );
        assert!(dir.path().join(MANIFEST_FILE_NAME).exists());
        assert!(staging.staged(&foo.filename).is_none());
        assert!(events.events().contains(&SyncEvent::Publishing {
            target: "x86_64/core".to_string(),
            stage: PublishStage::Done,
        }));
    }

    #[test]
    fn test_publish_refuses_missing_staged_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("core.db.tar.gz"), b"old index").unwrap();
        let staging = StagingArea::open(dir.path()).unwrap();
        let foo = record_for("foo", b"foo payload");
        let bar = record_for("bar", b"bar payload");
        fs::write(staging.file_path(&foo.filename), b"foo payload").unwrap();

        let result = publish(
            request(dir.path(), &staging, vec![&foo, &bar], vec![&foo, &bar], &[], false),
            &CollectorSink::default(),
        );

        assert!(matches!(
            result,
            Err(PublishError::MissingStagedFile { .. })
        ));
        assert_eq!(fs::read(dir.path().join("core.db.tar.gz")).unwrap(), b"old index");
        assert!(!dir.path().join(&foo.filename).exists());
    }

    #[test]
    fn test_publish_refuses_short_staged_file() {
        let dir = tempdir().unwrap();
        let staging = StagingArea::open(dir.path()).unwrap();
        let foo = record_for("foo", b"foo payload");
        fs::write(staging.file_path(&foo.filename), b"foo").unwrap();

        let result = publish(
            request(dir.path(), &staging, vec![&foo], vec![&foo], &[], false),
            &CollectorSink::default(),
        );
        assert!(matches!(
            result,
            Err(PublishError::StagedSizeMismatch { .. })
        ));
        assert!(!dir.path().join("core.db.tar.gz").exists());
    }

    #[test]
    fn test_publish_overwrites_same_name() {
        let dir = tempdir().unwrap();
        let staging = StagingArea::open(dir.path()).unwrap();
        let foo = record_for("foo", b"new content");
        fs::write(dir.path().join(&foo.filename), b"old content").unwrap();
        fs::write(staging.file_path(&foo.filename), b"new content").unwrap();

        let report = publish(
            request(dir.path(), &staging, vec![&foo], vec![&foo], &[], false),
            &CollectorSink::default(),
        )
        .unwrap();

        assert_eq!(report.replaced, 1);
        assert_eq!(fs::read(dir.path().join(&foo.filename)).unwrap(), b"new content");
    }

    #[test]
    fn test_prune_only_when_enabled() {
        let dir = tempdir().unwrap();
        let staging = StagingArea::open(dir.path()).unwrap();
        let stale = vec!["old-1.0-1-x86_64.pkg.tar.zst".to_string()];
        fs::write(dir.path().join(&stale[0]), b"old").unwrap();

        let report = publish(
            request(dir.path(), &staging, vec![], vec![], &stale, false),
            &CollectorSink::default(),
        )
        .unwrap();
        assert_eq!(report.pruned, 0);
        assert!(dir.path().join(&stale[0]).exists());

        let report = publish(
            request(dir.path(), &staging, vec![], vec![], &stale, true),
            &CollectorSink::default(),
        )
        .unwrap();
        assert_eq!(report.pruned, 1);
        assert!(!dir.path().join(&stale[0]).exists());
    }

    #[test]
    fn test_identical_index_is_not_rewritten() {
        let dir = tempdir().unwrap();
        let staging = StagingArea::open(dir.path()).unwrap();

        let first = publish(
            request(dir.path(), &staging, vec![], vec![], &[], false),
            &CollectorSink::default(),
        )
        .unwrap();
        let second = publish(
            request(dir.path(), &staging, vec![], vec![], &[], false),
            &CollectorSink::default(),
        )
        .unwrap();

        assert!(first.index_changed);
        assert!(!second.index_changed);
    }

    #[test]
    fn test_files_database_is_written_and_linked() {
        let dir = tempdir().unwrap();
        let staging = StagingArea::open(dir.path()).unwrap();
        let mut req = request(dir.path(), &staging, vec![], vec![], &[], false);
        req.files = Some(IndexArchive {
            name: "core.files.tar.gz".to_string(),
            link: "core.files".to_string(),
            content: b"files".to_vec(),
        });

        publish(req, &CollectorSink::default()).unwrap();
        assert_eq!(fs::read(dir.path().join("core.files")).unwrap(), b"files");
    }
}
