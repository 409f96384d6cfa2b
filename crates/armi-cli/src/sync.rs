use std::sync::Arc;

use armi_core::{
    sync::{SyncReport, Syncer, TargetReport, EXIT_OK},
    Result,
};
use armi_events::TargetStatus;
use armi_utils::bytes::format_bytes;
use nu_ansi_term::Color::{Blue, Cyan, Green, Red, Yellow};
use tabled::{builder::Builder, settings::Style};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    progress::ProgressGuard,
    utils::{Colored, Icons},
};

/// Cancels `cancel` on the first SIGINT or SIGTERM.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let terminate = async {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(err) => {
                    debug!("cannot listen for SIGTERM: {err}");
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate => {}
        }
        warn!("Interrupted, stopping downloads");
        cancel.cancel();
    });
}

fn status_cell(status: TargetStatus) -> String {
    match status {
        TargetStatus::Synced => Colored(Green, format!("{} synced", Icons::CHECK)).to_string(),
        TargetStatus::Partial => Colored(Yellow, format!("{} partial", Icons::WARNING)).to_string(),
        TargetStatus::Unchanged => Colored(Yellow, format!("{} unchanged", Icons::WARNING)).to_string(),
        TargetStatus::Failed => Colored(Red, format!("{} failed", Icons::CROSS)).to_string(),
        TargetStatus::Cancelled => Colored(Red, format!("{} cancelled", Icons::CROSS)).to_string(),
    }
}

fn print_report(report: &SyncReport) {
    let mut builder = Builder::new();
    builder.push_record([
        "Repository",
        "Status",
        "Fetched",
        "Reused",
        "Up to date",
        "Failed",
        "Pruned",
    ]);
    for target in &report.targets {
        builder.push_record([
            target.target.clone(),
            status_cell(target.status),
            target.fetched.to_string(),
            target.reused.to_string(),
            target.satisfied.to_string(),
            target.failed.len().to_string(),
            target.pruned.to_string(),
        ]);
    }
    info!("{}", builder.build().with(Style::rounded()));

    for target in &report.targets {
        print_failures(target);
    }
}

fn print_failures(target: &TargetReport) {
    if let Some(error) = &target.error {
        warn!("{}: {error}", Colored(Blue, &target.target));
    }
    for (filename, reason) in &target.failed {
        warn!(
            "  {} {}: {reason}",
            Icons::ARROW,
            Colored(Cyan, filename)
        );
    }
}

/// Runs a full sync and returns the process exit code.
pub async fn run_sync(syncer: Syncer, progress: Option<ProgressGuard>) -> Result<i32> {
    spawn_signal_handler(syncer.cancellation());

    let result = syncer.run().await;
    drop(syncer);
    if let Some(guard) = progress {
        guard.finish();
    }
    crate::progress::stop();

    let report = result?;
    print_report(&report);

    if report.cancelled {
        warn!("Sync cancelled; the mirror still serves the last published state");
    } else if report.exit_code() == EXIT_OK {
        info!("{} All repositories are up to date", Colored(Green, Icons::CHECK));
    }
    Ok(report.exit_code())
}

/// Prints what a sync of each target would do.
pub async fn run_plan(syncer: &Syncer) -> Result<i32> {
    for target in &syncer.options().targets {
        let plan = syncer.plan_target(target).await?;
        info!(
            "{}: {} packages, {} to fetch ({}), {} up to date, {} stale",
            Colored(Blue, &plan.target),
            plan.packages,
            Colored(Cyan, plan.plan.fetch.len()),
            format_bytes(plan.plan.fetch_bytes(), 1),
            plan.plan.satisfied.len(),
            plan.plan.stale.len()
        );
        for record in &plan.plan.fetch {
            debug!("  fetch {}", record.filename);
        }
        for name in &plan.plan.stale {
            debug!("  stale {name}");
        }
    }
    Ok(EXIT_OK)
}

pub fn make_syncer_events() -> (armi_events::EventSinkHandle, Option<ProgressGuard>) {
    if crate::utils::progress_enabled() {
        let (sink, receiver) = armi_events::ChannelSink::new();
        let guard = crate::progress::spawn_event_handler(receiver);
        (Arc::new(sink), Some(guard))
    } else {
        (Arc::new(armi_events::NullSink), None)
    }
}
