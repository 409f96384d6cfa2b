//! Diffing a fresh index against the live directory.

use std::cmp::Reverse;

use armi_registry::{PackageRecord, RepositoryIndex};

use crate::state::LocalState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Fetch,
    AlreadySatisfied,
}

/// What one cycle has to do for a target.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    /// Records to download, largest first.
    pub fetch: Vec<PackageRecord>,
    /// File names already present with the right content.
    pub satisfied: Vec<String>,
    /// Local files the index no longer names.
    pub stale: Vec<String>,
}

impl SyncPlan {
    pub fn action(&self, filename: &str) -> Option<Action> {
        if self.fetch.iter().any(|r| r.filename == filename) {
            Some(Action::Fetch)
        } else if self.satisfied.iter().any(|f| f == filename) {
            Some(Action::AlreadySatisfied)
        } else {
            None
        }
    }

    /// Bytes to download, counting only records with a known size.
    pub fn fetch_bytes(&self) -> u64 {
        self.fetch.iter().filter_map(|r| r.csize).sum()
    }

    pub fn is_noop(&self) -> bool {
        self.fetch.is_empty() && self.stale.is_empty()
    }
}

/// Computes the plan for `desired` given what `local` holds.
///
/// A record is satisfied only by a local file with the same name and a
/// verified matching checksum. A same-named file with other content is
/// fetched again and overwritten on publish.
pub fn plan(desired: &RepositoryIndex, local: &LocalState) -> SyncPlan {
    let mut fetch = Vec::new();
    let mut satisfied = Vec::new();

    for record in desired.records() {
        if local.satisfies(&record.filename, &record.checksum) {
            satisfied.push(record.filename.clone());
        } else {
            fetch.push(record.clone());
        }
    }

    fetch.sort_by(|a, b| {
        Reverse(a.csize.unwrap_or(0))
            .cmp(&Reverse(b.csize.unwrap_or(0)))
            .then_with(|| a.filename.cmp(&b.filename))
    });

    let stale = local.unreferenced(desired).map(String::from).collect();

    SyncPlan {
        fetch,
        satisfied,
        stale,
    }
}
