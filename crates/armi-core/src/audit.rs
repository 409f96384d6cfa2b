//! Full verification of a published target against its own index.

use std::{fs, path::Path};

use armi_config::target::Target;
use armi_registry::{PackageRecord, RepositoryIndex};
use armi_utils::hash::verify_checksum;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{ErrorContext, Result};

/// Problems found in one target directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub target: String,
    /// Number of records the published index names.
    pub checked: usize,
    /// Files the index names that do not exist.
    pub missing: Vec<String>,
    /// Files present with a wrong size or checksum.
    pub corrupt: Vec<String>,
    /// The target has no published index yet.
    pub unpublished: bool,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.corrupt.is_empty()
    }
}

enum FileStatus {
    Ok,
    Missing,
    Corrupt,
}

fn check(dir: &Path, record: &PackageRecord) -> FileStatus {
    let path = dir.join(&record.filename);
    let Ok(meta) = fs::metadata(&path) else {
        return FileStatus::Missing;
    };
    if record.csize.is_some_and(|csize| csize != meta.len()) {
        return FileStatus::Corrupt;
    }
    match verify_checksum(&path, &record.checksum) {
        Ok(true) => FileStatus::Ok,
        _ => FileStatus::Corrupt,
    }
}

/// Hashes every file the published index of `target` names.
pub fn audit(destination: &Path, target: &Target) -> Result<AuditReport> {
    let dir = target.dir(destination);
    let db_path = dir.join(target.db_archive());

    let raw = match fs::read(&db_path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(AuditReport {
                target: target.to_string(),
                unpublished: true,
                ..Default::default()
            });
        }
        Err(err) => return Err(err).with_context(|| format!("reading {}", db_path.display())),
    };
    let index = RepositoryIndex::parse(raw)?;

    let statuses: Vec<_> = index
        .records()
        .collect::<Vec<_>>()
        .par_iter()
        .map(|record| (record.filename.clone(), check(&dir, record)))
        .collect();

    let mut report = AuditReport {
        target: target.to_string(),
        checked: statuses.len(),
        ..Default::default()
    };
    for (filename, status) in statuses {
        match status {
            FileStatus::Ok => {}
            FileStatus::Missing => report.missing.push(filename),
            FileStatus::Corrupt => report.corrupt.push(filename),
        }
    }

    debug!(
        repo = %target,
        checked = report.checked,
        missing = report.missing.len(),
        corrupt = report.corrupt.len(),
        "audited target"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::test_utils::{filename, target, IndexBuilder};

    #[test]
    fn test_unpublished_target() {
        let dest = tempdir().unwrap();
        let report = audit(dest.path(), &target()).unwrap();
        assert!(report.unpublished);
        assert!(report.is_clean());
    }

    #[test]
    fn test_reports_missing_and_corrupt() {
        let dest = tempdir().unwrap();
        let target = target();
        let dir = target.dir(dest.path());
        fs::create_dir_all(&dir).unwrap();

        let builder = IndexBuilder::new()
            .package("good", "1", b"good payload")
            .package("bad", "1", b"bad payload")
            .package("gone", "1", b"gone payload");
        fs::write(dir.join(target.db_archive()), builder.build()).unwrap();
        fs::write(dir.join(filename("good", "1")), b"good payload").unwrap();
        fs::write(dir.join(filename("bad", "1")), b"BAD payload").unwrap();

        let report = audit(dest.path(), &target).unwrap();
        assert_eq!(report.checked, 3);
        assert_eq!(report.missing, vec![filename("gone", "1")]);
        assert_eq!(report.corrupt, vec![filename("bad", "1")]);
        assert!(!report.is_clean());
    }
}
