//! Concurrent package downloads into the staging area.
//!
//! Each record is driven through an explicit state machine:
//!
//! ```text
//! Pending -> InFlight(n) -> Succeeded
//!                        -> Retrying(n) -> InFlight(n + 1)
//!                        -> Failed
//! ```
//!
//! Transfers run on blocking worker threads (the transport is blocking
//! ureq); at most `parallel_limit` run at once.

use std::{
    fs::{self, File},
    io::{ErrorKind, Read, Write},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use armi_dl::fetcher::Fetcher;
use armi_events::{EventSinkHandle, OperationId, SyncEvent};
use armi_registry::PackageRecord;
use armi_utils::{
    fs::rename,
    hash::{calculate_checksum, Hasher},
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::staging::StagingArea;

const CHUNK_SIZE: usize = 64 * 1024;
const PROGRESS_INTERVAL: u64 = 256 * 1024;

pub fn next_op_id() -> OperationId {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// How failed attempts are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Final result for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A verified file is staged. `reused` is set when it was already staged.
    Success { bytes: u64, reused: bool },
    /// The last attempt produced content that does not match the index.
    ChecksumMismatch { reason: String },
    /// Retries exhausted on transient errors, or a non-retryable error.
    FatalError { reason: String },
    Cancelled,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            FetchOutcome::ChecksumMismatch { reason } | FetchOutcome::FatalError { reason } => {
                Some(reason)
            }
            FetchOutcome::Cancelled => Some("cancelled"),
            FetchOutcome::Success { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub record: PackageRecord,
    pub outcome: FetchOutcome,
    pub attempts: u32,
}

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AttemptError {
    Transient(String),
    Fatal(String),
    Mismatch(String),
    Cancelled,
}

impl AttemptError {
    fn retryable(&self) -> bool {
        matches!(self, AttemptError::Transient(_) | AttemptError::Mismatch(_))
    }

    fn into_outcome(self) -> FetchOutcome {
        match self {
            AttemptError::Mismatch(reason) => {
                FetchOutcome::ChecksumMismatch {
                    reason,
                }
            }
            AttemptError::Transient(reason) | AttemptError::Fatal(reason) => {
                FetchOutcome::FatalError {
                    reason,
                }
            }
            AttemptError::Cancelled => FetchOutcome::Cancelled,
        }
    }

    fn message(&self) -> &str {
        match self {
            AttemptError::Transient(m) | AttemptError::Fatal(m) | AttemptError::Mismatch(m) => m,
            AttemptError::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug)]
enum FetchState {
    Pending,
    InFlight { attempt: u32 },
    Retrying { attempt: u32 },
    Succeeded { attempt: u32, bytes: u64, reused: bool },
    Failed { attempt: u32, error: AttemptError },
}

/// Everything a worker needs, shared between all tasks of a run.
struct Shared {
    fetcher: Arc<dyn Fetcher>,
    staging: StagingArea,
    events: EventSinkHandle,
    cancel: CancellationToken,
    policy: RetryPolicy,
}

/// Downloads planned records into a [`StagingArea`].
pub struct FetchCoordinator {
    shared: Arc<Shared>,
    parallel_limit: usize,
}

/// A record together with the URL it is fetched from.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub record: PackageRecord,
    pub url: String,
}

impl FetchCoordinator {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        staging: StagingArea,
        events: EventSinkHandle,
        cancel: CancellationToken,
        policy: RetryPolicy,
        parallel_limit: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                fetcher,
                staging,
                events,
                cancel,
                policy,
            }),
            parallel_limit: parallel_limit.max(1),
        }
    }

    /// Runs every job and returns one result per job, in job order.
    pub async fn run(&self, jobs: Vec<FetchJob>) -> Vec<FetchResult> {
        debug!(
            count = jobs.len(),
            parallel = self.parallel_limit,
            "fetching packages"
        );
        let semaphore = Arc::new(Semaphore::new(self.parallel_limit));
        let mut handles = Vec::with_capacity(jobs.len());

        for job in jobs {
            let record = job.record.clone();
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit.ok(),
                _ = self.shared.cancel.cancelled() => None,
            };
            let shared = self.shared.clone();

            let handle = tokio::spawn(async move {
                let Some(permit) = permit else {
                    return (FetchOutcome::Cancelled, 0);
                };
                let result = run_job(&shared, job).await;
                drop(permit);
                result
            });
            handles.push((record, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (record, handle) in handles {
            let (outcome, attempts) = match handle.await {
                Ok(result) => result,
                Err(err) => {
                    (
                        FetchOutcome::FatalError {
                            reason: format!("download task failed: {err}"),
                        },
                        0,
                    )
                }
            };
            results.push(FetchResult {
                record,
                outcome,
                attempts,
            });
        }
        results
    }
}

async fn run_job(shared: &Arc<Shared>, job: FetchJob) -> (FetchOutcome, u32) {
    let op_id = next_op_id();
    let filename = job.record.filename.clone();
    let job = Arc::new(job);
    let mut state = FetchState::Pending;

    loop {
        state = match state {
            FetchState::Pending => {
                if shared.cancel.is_cancelled() {
                    FetchState::Failed {
                        attempt: 0,
                        error: AttemptError::Cancelled,
                    }
                } else {
                    match reuse_staged(shared.clone(), job.clone()).await {
                        Some(bytes) => {
                            FetchState::Succeeded {
                                attempt: 0,
                                bytes,
                                reused: true,
                            }
                        }
                        None => {
                            FetchState::InFlight {
                                attempt: 1,
                            }
                        }
                    }
                }
            }
            FetchState::InFlight { attempt } => {
                let worker_shared = shared.clone();
                let worker_job = job.clone();
                let result = tokio::task::spawn_blocking(move || {
                    download_once(&worker_shared, &worker_job, op_id)
                })
                .await
                .unwrap_or_else(|err| Err(AttemptError::Fatal(format!("worker failed: {err}"))));

                match result {
                    Ok(bytes) => {
                        FetchState::Succeeded {
                            attempt,
                            bytes,
                            reused: false,
                        }
                    }
                    Err(error) if error.retryable() && attempt <= shared.policy.retries => {
                        warn!(
                            file = filename,
                            attempt,
                            "download failed, retrying: {}",
                            error.message()
                        );
                        shared.events.emit(SyncEvent::FetchRetry {
                            op_id,
                            filename: filename.clone(),
                            attempt,
                            reason: error.message().to_string(),
                        });
                        FetchState::Retrying {
                            attempt,
                        }
                    }
                    Err(error) => {
                        FetchState::Failed {
                            attempt,
                            error,
                        }
                    }
                }
            }
            FetchState::Retrying { attempt } => {
                let delay = shared.policy.delay(attempt);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => FetchState::InFlight { attempt: attempt + 1 },
                    _ = shared.cancel.cancelled() => FetchState::Failed {
                        attempt,
                        error: AttemptError::Cancelled,
                    },
                }
            }
            FetchState::Succeeded {
                attempt,
                bytes,
                reused,
            } => {
                shared.events.emit(SyncEvent::FetchComplete {
                    op_id,
                    filename: filename.clone(),
                    total: bytes,
                });
                debug!(file = filename, bytes, reused, "package staged");
                return (
                    FetchOutcome::Success {
                        bytes,
                        reused,
                    },
                    attempt,
                );
            }
            FetchState::Failed { attempt, error } => {
                if error != AttemptError::Cancelled {
                    shared.staging.remove(&filename);
                    warn!(file = filename, attempt, "giving up on package: {}", error.message());
                    shared.events.emit(SyncEvent::FetchFailed {
                        op_id,
                        filename: filename.clone(),
                        reason: error.message().to_string(),
                    });
                }
                return (error.into_outcome(), attempt);
            }
        };
    }
}

/// Returns the size of an already staged file for the job's record if it
/// still verifies. A staged file that does not is removed.
async fn reuse_staged(shared: Arc<Shared>, job: Arc<FetchJob>) -> Option<u64> {
    let path = shared.staging.staged(&job.record.filename)?;
    tokio::task::spawn_blocking(move || {
        let record = &job.record;
        let size = fs::metadata(&path).ok()?.len();
        let size_ok = record.csize.is_none_or(|csize| csize == size);
        let digest_ok = size_ok
            && calculate_checksum(&path, record.checksum.algorithm)
                .is_ok_and(|digest| record.checksum.matches(&digest));

        if digest_ok {
            info!(file = record.filename, "reusing staged download");
            Some(size)
        } else {
            debug!(file = record.filename, "discarding invalid staged download");
            shared.staging.remove(&record.filename);
            None
        }
    })
    .await
    .ok()
    .flatten()
}

/// One download attempt: stream to a part file while hashing, check size and
/// digest, then move the part file to its staged name.
fn download_once(shared: &Shared, job: &FetchJob, op_id: OperationId) -> Result<u64, AttemptError> {
    let record = &job.record;
    let part = shared.staging.part_path(&record.filename);

    let result = transfer(shared, job, op_id, &part);
    if result.is_err() {
        let _ = fs::remove_file(&part);
    }
    let bytes = result?;

    rename(&part, shared.staging.file_path(&record.filename)).map_err(|err| {
        let _ = fs::remove_file(&part);
        AttemptError::Fatal(err.to_string())
    })?;
    Ok(bytes)
}

fn transfer(
    shared: &Shared,
    job: &FetchJob,
    op_id: OperationId,
    part: &std::path::Path,
) -> Result<u64, AttemptError> {
    let record = &job.record;
    if shared.cancel.is_cancelled() {
        return Err(AttemptError::Cancelled);
    }

    let mut remote = shared.fetcher.fetch(&job.url).map_err(|err| {
        if err.is_transient() {
            AttemptError::Transient(err.to_string())
        } else {
            AttemptError::Fatal(err.to_string())
        }
    })?;

    let total = record.csize.or(remote.content_length).unwrap_or(0);
    shared.events.emit(SyncEvent::FetchStarting {
        op_id,
        filename: record.filename.clone(),
        total,
    });

    let mut file = File::create(part)
        .map_err(|err| AttemptError::Fatal(format!("creating {}: {err}", part.display())))?;
    let mut hasher = Hasher::new(record.checksum.algorithm);
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut written: u64 = 0;
    let mut reported: u64 = 0;

    loop {
        if shared.cancel.is_cancelled() {
            return Err(AttemptError::Cancelled);
        }

        let n = match remote.reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(AttemptError::Transient(format!("stream interrupted: {err}"))),
        };

        file.write_all(&buffer[..n])
            .map_err(|err| AttemptError::Fatal(format!("writing {}: {err}", part.display())))?;
        hasher.update(&buffer[..n]);
        written += n as u64;

        if let Some(csize) = record.csize {
            if written > csize {
                return Err(AttemptError::Mismatch(format!(
                    "received more than the expected {csize} bytes"
                )));
            }
        }

        if written - reported >= PROGRESS_INTERVAL {
            reported = written;
            shared.events.emit(SyncEvent::FetchProgress {
                op_id,
                filename: record.filename.clone(),
                current: written,
                total,
            });
        }
    }

    if let Some(csize) = record.csize {
        if written != csize {
            return Err(AttemptError::Mismatch(format!(
                "size mismatch: expected {csize} bytes, got {written}"
            )));
        }
    }

    let digest = hasher.finalize();
    if !record.checksum.matches(&digest) {
        return Err(AttemptError::Mismatch(format!(
            "{} mismatch: expected {}, got {digest}",
            record.checksum.algorithm, record.checksum.digest
        )));
    }

    file.sync_all()
        .map_err(|err| AttemptError::Fatal(format!("syncing {}: {err}", part.display())))?;
    Ok(written)
}
