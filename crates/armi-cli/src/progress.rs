use std::{
    collections::HashMap,
    sync::{mpsc::Receiver, LazyLock},
    time::Duration,
};

use armi_events::{OperationId, PublishStage, SyncEvent};
use armi_utils::bytes::format_bytes;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use nu_ansi_term::Color::Cyan;

use crate::utils::progress_enabled;

/// Shared MultiProgress instance for suspend/stop from other modules.
static MULTI: LazyLock<MultiProgress> = LazyLock::new(MultiProgress::new);

/// Pause progress display, run the closure, then resume.
pub fn suspend<F: FnOnce()>(f: F) {
    MULTI.suspend(f);
}

/// Stop and clear all progress bars.
pub fn stop() {
    MULTI.clear().ok();
}

/// Owns the thread that renders [`SyncEvent`]s.
///
/// Every sender of the channel must be dropped before
/// [`finish`](ProgressGuard::finish) is called, or it blocks forever.
pub struct ProgressGuard {
    handle: Option<std::thread::JoinHandle<()>>,
}

impl ProgressGuard {
    pub fn finish(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

fn download_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.cyan} {prefix}  {wide_bar:.cyan/dim}  {bytes}/{total_bytes}  {bytes_per_sec}  {eta}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("━━─")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn new_bar(bar: ProgressBar) -> ProgressBar {
    if progress_enabled() {
        MULTI.add(bar)
    } else {
        MULTI.add(ProgressBar::hidden())
    }
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = new_bar(ProgressBar::new_spinner());
    pb.set_style(spinner_style());
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn stage_message(target: &str, stage: PublishStage) -> String {
    match stage {
        PublishStage::MovingFiles { count } => format!("{target}: moving {count} packages into place"),
        PublishStage::WritingIndex => format!("{target}: writing index"),
        PublishStage::Pruning { count } => format!("{target}: pruning {count} stale files"),
        PublishStage::Done => format!("{target}: published"),
    }
}

/// Spawns a thread that maps [`SyncEvent`]s to indicatif bars: one spinner
/// per target and one bar per package download.
pub fn spawn_event_handler(receiver: Receiver<SyncEvent>) -> ProgressGuard {
    let handle = std::thread::spawn(move || {
        let mut downloads: HashMap<OperationId, ProgressBar> = HashMap::new();
        let mut targets: HashMap<String, ProgressBar> = HashMap::new();

        while let Ok(event) = receiver.recv() {
            match event {
                SyncEvent::TargetStarting { target } => {
                    let pb = create_spinner(format!("{target}: fetching index"));
                    targets.insert(target, pb);
                }
                SyncEvent::IndexLoaded { target, packages } => {
                    if let Some(pb) = targets.get(&target) {
                        pb.set_message(format!("{target}: {packages} packages, checking local files"));
                    }
                }
                SyncEvent::PlanReady {
                    target,
                    fetch,
                    bytes,
                    ..
                } => {
                    if let Some(pb) = targets.get(&target) {
                        if fetch == 0 {
                            pb.set_message(format!("{target}: up to date"));
                        } else {
                            pb.set_message(format!(
                                "{target}: fetching {fetch} packages ({})",
                                format_bytes(bytes, 1)
                            ));
                        }
                    }
                }
                SyncEvent::FetchStarting {
                    op_id,
                    filename,
                    total,
                } => {
                    let pb = downloads.entry(op_id).or_insert_with(|| {
                        let pb = new_bar(ProgressBar::new(total));
                        pb.set_style(download_style());
                        pb.set_prefix(Cyan.paint(filename).to_string());
                        pb.enable_steady_tick(Duration::from_millis(100));
                        pb
                    });
                    pb.set_length(total);
                    pb.set_position(0);
                }
                SyncEvent::FetchProgress { op_id, current, .. } => {
                    if let Some(pb) = downloads.get(&op_id) {
                        pb.set_position(current);
                    }
                }
                SyncEvent::FetchRetry { op_id, .. } => {
                    if let Some(pb) = downloads.get(&op_id) {
                        pb.set_position(0);
                    }
                }
                SyncEvent::FetchComplete { op_id, .. } | SyncEvent::FetchFailed { op_id, .. } => {
                    if let Some(pb) = downloads.remove(&op_id) {
                        pb.finish_and_clear();
                    }
                }
                SyncEvent::Publishing { target, stage } => {
                    if let Some(pb) = targets.get(&target) {
                        pb.set_message(stage_message(&target, stage));
                    }
                }
                SyncEvent::TargetComplete { target, .. } => {
                    if let Some(pb) = targets.remove(&target) {
                        pb.finish_and_clear();
                    }
                    for (_, pb) in downloads.drain() {
                        pb.finish_and_clear();
                    }
                }
            }
        }
    });

    ProgressGuard {
        handle: Some(handle),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use armi_events::{ChannelSink, EventSink};

    use super::*;

    #[test]
    fn test_stage_message() {
        assert_eq!(
            stage_message("x86_64/core", PublishStage::Pruning { count: 3 }),
            "x86_64/core: pruning 3 stale files"
        );
        assert_eq!(
            stage_message("x86_64/core", PublishStage::WritingIndex),
            "x86_64/core: writing index"
        );
    }

    #[test]
    fn test_handler_drains_and_exits() {
        let (sink, receiver) = ChannelSink::new();
        crate::utils::PROGRESS.store(false, Ordering::Relaxed);
        let guard = spawn_event_handler(receiver);

        sink.emit(SyncEvent::TargetStarting {
            target: "x86_64/core".to_string(),
        });
        sink.emit(SyncEvent::FetchStarting {
            op_id: 1,
            filename: "foo-1.0-1-x86_64.pkg.tar.zst".to_string(),
            total: 10,
        });
        sink.emit(SyncEvent::FetchComplete {
            op_id: 1,
            filename: "foo-1.0-1-x86_64.pkg.tar.zst".to_string(),
            total: 10,
        });
        drop(sink);

        guard.finish();
    }
}
