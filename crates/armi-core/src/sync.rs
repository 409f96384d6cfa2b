//! Sequencing of sync cycles over every configured target.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use armi_config::{
    config::{Config, PublishPolicy, VerifyMode},
    target::Target,
};
use armi_dl::fetcher::Fetcher;
use armi_events::{EventSinkHandle, SyncEvent, TargetStatus};
use armi_registry::{filter_archive, Compression, PackageRecord, RepositoryIndex};
use armi_utils::{
    fs::{atomic_write, ensure_dir_exists},
    lock::FileLock,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{ArmiError, Result},
    fetch::{FetchCoordinator, FetchJob, FetchOutcome, RetryPolicy},
    manifest::Manifest,
    publish::{publish, IndexArchive, PublishRequest},
    reconcile::{plan, SyncPlan},
    staging::StagingArea,
    state::inspect,
};

/// Exit status when every target is in sync.
pub const EXIT_OK: i32 = 0;
/// Exit status when nothing could be synced at all.
pub const EXIT_FATAL: i32 = 1;
/// Exit status when the mirror is consistent but not fully up to date.
pub const EXIT_PARTIAL: i32 = 3;
/// Exit status of a cancelled run.
pub const EXIT_CANCELLED: i32 = 130;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub destination: PathBuf,
    pub targets: Vec<Target>,
    pub policy: PublishPolicy,
    pub verify: VerifyMode,
    pub prune: bool,
    /// Also mirror the `<branch>.files` database.
    pub files_db: bool,
    pub parallel_limit: usize,
    pub retry: RetryPolicy,
    /// Cancels the whole run once elapsed.
    pub cycle_timeout: Option<Duration>,
}

impl SyncOptions {
    pub fn from_config(config: &Config, targets: Vec<Target>) -> Result<Self> {
        Ok(Self {
            destination: config.destination()?,
            targets,
            policy: config.publish_policy(),
            verify: config.verify_mode(),
            prune: config.prune(),
            files_db: config.files_db(),
            parallel_limit: config.parallel_limit(),
            retry: RetryPolicy {
                retries: config.retries(),
                backoff: config.retry_backoff(),
                ..RetryPolicy::default()
            },
            cycle_timeout: config.cycle_timeout(),
        })
    }
}

/// Outcome of one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub target: String,
    pub arch: String,
    pub status: TargetStatus,
    /// Packages downloaded in this cycle.
    pub fetched: usize,
    /// Packages taken from a previous run's staging area.
    pub reused: usize,
    /// Packages that were already in place.
    pub satisfied: usize,
    /// File name and reason of every package that could not be fetched.
    pub failed: Vec<(String, String)>,
    pub pruned: usize,
    /// Why the target failed as a whole.
    pub error: Option<String>,
}

impl TargetReport {
    fn new(target: &Target, status: TargetStatus) -> Self {
        Self {
            target: target.to_string(),
            arch: target.arch.clone(),
            status,
            fetched: 0,
            reused: 0,
            satisfied: 0,
            failed: Vec::new(),
            pruned: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub targets: Vec<TargetReport>,
    pub cancelled: bool,
}

impl SyncReport {
    pub fn exit_code(&self) -> i32 {
        if self.cancelled {
            return EXIT_CANCELLED;
        }
        let status = |s| self.targets.iter().all(|t| t.status == s);
        if status(TargetStatus::Synced) {
            EXIT_OK
        } else if status(TargetStatus::Failed) {
            EXIT_FATAL
        } else {
            EXIT_PARTIAL
        }
    }
}

/// A plan computed without downloading or publishing anything.
#[derive(Debug, Clone)]
pub struct TargetPlan {
    pub target: String,
    pub packages: usize,
    pub plan: SyncPlan,
}

struct Prepared {
    dir: PathBuf,
    index: RepositoryIndex,
    files: Option<Vec<u8>>,
    plan: SyncPlan,
}

/// Runs sync cycles for the configured targets.
pub struct Syncer {
    options: SyncOptions,
    fetcher: Arc<dyn Fetcher>,
    events: EventSinkHandle,
    cancel: CancellationToken,
}

impl Syncer {
    pub fn new(options: SyncOptions, fetcher: Arc<dyn Fetcher>, events: EventSinkHandle) -> Self {
        Self {
            options,
            fetcher,
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// Handle that stops the run when cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Syncs every target in order while holding the destination lock.
    ///
    /// A failing target does not stop the ones after it; cancellation does.
    pub async fn run(&self) -> Result<SyncReport> {
        let destination = &self.options.destination;
        ensure_dir_exists(destination)?;
        let _lock = FileLock::try_acquire(destination)?;

        let timer = self.options.cycle_timeout.map(|timeout| {
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!("cycle timeout of {}s reached, cancelling", timeout.as_secs());
                cancel.cancel();
            })
        });

        let mut report = SyncReport::default();
        for target in &self.options.targets {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            self.events.emit(SyncEvent::TargetStarting {
                target: target.to_string(),
            });
            let target_report = match self.sync_target(target).await {
                Ok(target_report) => target_report,
                Err(ArmiError::Cancelled) => {
                    warn!(repo = %target, "sync cancelled");
                    report.cancelled = true;
                    TargetReport::new(target, TargetStatus::Cancelled)
                }
                Err(err) => {
                    error!(repo = %target, "sync failed: {err}");
                    let mut failed = TargetReport::new(target, TargetStatus::Failed);
                    failed.error = Some(err.to_string());
                    failed
                }
            };

            self.events.emit(SyncEvent::TargetComplete {
                target: target.to_string(),
                status: target_report.status,
            });
            report.targets.push(target_report);
            if report.cancelled {
                break;
            }
        }

        if let Some(timer) = timer {
            timer.abort();
        }

        if !report.cancelled {
            self.write_last_update(&report);
        }
        Ok(report)
    }

    /// Fetches the index of `target` and computes its plan. Nothing is
    /// downloaded or written.
    pub async fn plan_target(&self, target: &Target) -> Result<TargetPlan> {
        let prepared = self.prepare(target, false).await?;
        Ok(TargetPlan {
            target: target.to_string(),
            packages: prepared.index.len(),
            plan: prepared.plan,
        })
    }

    async fn prepare(&self, target: &Target, with_files: bool) -> Result<Prepared> {
        let raw = self.fetch_index(target.url_for(&target.db_archive())).await?;
        let index = tokio::task::spawn_blocking(move || RepositoryIndex::parse(raw)).await??;
        info!(repo = %target, packages = index.len(), "index loaded");
        self.events.emit(SyncEvent::IndexLoaded {
            target: target.to_string(),
            packages: index.len(),
        });

        let files = if with_files {
            let raw = self
                .fetch_index(target.url_for(&target.files_archive()))
                .await?;
            Compression::detect(&raw)?;
            Some(raw)
        } else {
            None
        };

        let dir = target.dir(&self.options.destination);
        let reserved = target.service_files().to_vec();
        let mode = self.options.verify;
        let state_dir = dir.clone();
        let (index, state) = tokio::task::spawn_blocking(move || -> Result<_> {
            let manifest = Manifest::load(&state_dir);
            let mut state = inspect(&state_dir, &manifest, &reserved)?;
            state.verify(&index, mode);
            Ok((index, state))
        })
        .await??;

        let plan = plan(&index, &state);
        debug!(
            repo = %target,
            fetch = plan.fetch.len(),
            satisfied = plan.satisfied.len(),
            stale = plan.stale.len(),
            "plan ready"
        );
        self.events.emit(SyncEvent::PlanReady {
            target: target.to_string(),
            fetch: plan.fetch.len(),
            satisfied: plan.satisfied.len(),
            stale: plan.stale.len(),
            bytes: plan.fetch_bytes(),
        });

        Ok(Prepared {
            dir,
            index,
            files,
            plan,
        })
    }

    /// Downloads an index archive, retrying transient failures.
    async fn fetch_index(&self, url: String) -> Result<Vec<u8>> {
        let policy = self.options.retry;
        let mut attempt = 1;
        loop {
            if self.cancel.is_cancelled() {
                return Err(ArmiError::Cancelled);
            }

            let fetcher = self.fetcher.clone();
            let request = url.clone();
            let result = tokio::task::spawn_blocking(move || fetcher.fetch_bytes(&request)).await?;
            match result {
                Ok(raw) => return Ok(raw),
                Err(err) if err.is_transient() && attempt <= policy.retries => {
                    warn!(url, attempt, "index download failed, retrying: {err}");
                    tokio::select! {
                        _ = tokio::time::sleep(policy.delay(attempt)) => {}
                        _ = self.cancel.cancelled() => return Err(ArmiError::Cancelled),
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn sync_target(&self, target: &Target) -> Result<TargetReport> {
        let Prepared {
            dir,
            index,
            files,
            plan,
        } = self.prepare(target, self.options.files_db).await?;

        let mut report = TargetReport::new(target, TargetStatus::Synced);
        report.satisfied = plan.satisfied.len();

        let staging = StagingArea::open(&dir)?;
        let jobs = plan
            .fetch
            .iter()
            .map(|record| {
                FetchJob {
                    record: record.clone(),
                    url: target.url_for(&record.filename),
                }
            })
            .collect();
        let coordinator = FetchCoordinator::new(
            self.fetcher.clone(),
            staging.clone(),
            self.events.clone(),
            self.cancel.clone(),
            self.options.retry,
            self.options.parallel_limit,
        );
        let results = coordinator.run(jobs).await;

        if self.cancel.is_cancelled() {
            return Err(ArmiError::Cancelled);
        }

        let mut staged = Vec::new();
        for result in &results {
            match &result.outcome {
                FetchOutcome::Success { reused, .. } => {
                    if *reused {
                        report.reused += 1;
                    } else {
                        report.fetched += 1;
                    }
                    staged.push(&result.record);
                }
                outcome => {
                    report.failed.push((
                        result.record.filename.clone(),
                        outcome.reason().unwrap_or_default().to_string(),
                    ));
                }
            }
        }

        if !report.failed.is_empty() && self.options.policy == PublishPolicy::Strict {
            warn!(
                repo = %target,
                failed = report.failed.len(),
                "not publishing, some packages could not be fetched"
            );
            staging.discard()?;
            report.status = TargetStatus::Unchanged;
            return Ok(report);
        }

        let failed: HashSet<&str> = report.failed.iter().map(|(f, _)| f.as_str()).collect();
        let published: Vec<&PackageRecord> = index
            .records()
            .filter(|r| !failed.contains(r.filename.as_str()))
            .collect();
        let excluded: HashSet<String> = index
            .records()
            .filter(|r| failed.contains(r.filename.as_str()))
            .map(|r| r.entry_dir.clone())
            .collect();

        let filtered = |raw: &[u8]| -> Result<Vec<u8>> {
            if excluded.is_empty() {
                Ok(raw.to_vec())
            } else {
                Ok(filter_archive(raw, &excluded)?)
            }
        };
        let db = IndexArchive {
            name: target.db_archive(),
            link: format!("{}.db", target.branch),
            content: filtered(index.raw())?,
        };
        let files = match files {
            Some(raw) => {
                Some(IndexArchive {
                    name: target.files_archive(),
                    link: format!("{}.files", target.branch),
                    content: filtered(&raw)?,
                })
            }
            None => None,
        };

        if !excluded.is_empty() {
            info!(
                repo = %target,
                omitted = excluded.len(),
                "publishing partial index"
            );
        }

        let label = target.to_string();
        let published_report = publish(
            PublishRequest {
                target: &label,
                dir: &dir,
                staging: &staging,
                staged,
                published,
                db,
                files,
                stale: &plan.stale,
                prune: self.options.prune,
            },
            self.events.as_ref(),
        )?;
        staging.discard()?;

        report.pruned = published_report.pruned;
        if !report.failed.is_empty() {
            report.status = TargetStatus::Partial;
        }
        Ok(report)
    }

    /// Stamps `last_update.<arch>` for every architecture whose targets all
    /// synced fully.
    fn write_last_update(&self, report: &SyncReport) {
        let mut arches: Vec<&str> = Vec::new();
        for target in &self.options.targets {
            if !arches.contains(&target.arch.as_str()) {
                arches.push(&target.arch);
            }
        }

        let stamp = chrono::Utc::now().format("%a %b %e %H:%M:%S %Y").to_string();
        for arch in arches {
            let expected = self
                .options
                .targets
                .iter()
                .filter(|t| t.arch == arch)
                .count();
            let synced = report
                .targets
                .iter()
                .filter(|t| t.arch == arch && t.status == TargetStatus::Synced)
                .count();
            if synced != expected {
                continue;
            }

            let path = last_update_path(&self.options.destination, arch);
            match atomic_write(&path, format!("{stamp}\n").as_bytes()) {
                Ok(()) => debug!(arch, "updated {}", path.display()),
                Err(err) => warn!(arch, "cannot write {}: {err}", path.display()),
            }
        }
    }
}

pub fn last_update_path(destination: &Path, arch: &str) -> PathBuf {
    destination.join(format!("last_update.{arch}"))
}
