use crate::OperationId;

/// All event types emitted during a sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A target (`arch/branch`) is about to be synced.
    TargetStarting { target: String },
    /// The target's index was fetched and parsed.
    IndexLoaded { target: String, packages: usize },
    /// The reconciler produced a plan for the target.
    PlanReady {
        target: String,
        fetch: usize,
        satisfied: usize,
        stale: usize,
        bytes: u64,
    },
    /// A package download is starting. `total` is 0 when unknown.
    FetchStarting {
        op_id: OperationId,
        filename: String,
        total: u64,
    },
    /// Download progress update.
    FetchProgress {
        op_id: OperationId,
        filename: String,
        current: u64,
        total: u64,
    },
    /// An attempt failed and the download will be retried.
    FetchRetry {
        op_id: OperationId,
        filename: String,
        attempt: u32,
        reason: String,
    },
    /// The package was downloaded and verified.
    FetchComplete {
        op_id: OperationId,
        filename: String,
        total: u64,
    },
    /// The package could not be fetched in this cycle.
    FetchFailed {
        op_id: OperationId,
        filename: String,
        reason: String,
    },
    /// Publishing stage for a target.
    Publishing { target: String, stage: PublishStage },
    /// A target finished.
    TargetComplete { target: String, status: TargetStatus },
}

/// Steps of publishing a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStage {
    MovingFiles { count: usize },
    WritingIndex,
    Pruning { count: usize },
    Done,
}

/// Final state of a target after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    /// Every record is present and the new index is live.
    Synced,
    /// A filtered index was published; some records are missing.
    Partial,
    /// Nothing was published; the previous index is still live.
    Unchanged,
    /// The target could not be processed at all.
    Failed,
    Cancelled,
}

impl SyncEvent {
    /// File name for per-package events.
    pub fn filename(&self) -> Option<&str> {
        match self {
            SyncEvent::FetchStarting { filename, .. }
            | SyncEvent::FetchProgress { filename, .. }
            | SyncEvent::FetchRetry { filename, .. }
            | SyncEvent::FetchComplete { filename, .. }
            | SyncEvent::FetchFailed { filename, .. } => Some(filename),
            _ => None,
        }
    }
}
