use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use armi_config::config::{config_path, generate_default_config, set_config_path, Config};
use armi_core::{
    sync::{SyncOptions, Syncer, EXIT_FATAL, EXIT_OK},
    ArmiError, Result,
};
use armi_dl::{fetcher::HttpFetcher, http_client::configure_http_client};
use armi_utils::{error::UtilsError, path::resolve_path};
use clap::Parser;
use cli::{Args, Commands};
use logging::setup_logging;
use mirrors::list_mirrors;
use sync::{make_syncer_events, run_plan, run_sync};
use tracing::debug;
use utils::{COLOR, PROGRESS};
use verify::verify_mirror;

mod cli;
mod logging;
mod mirrors;
mod progress;
mod sync;
mod utils;
mod verify;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Applies command line overrides on top of the loaded configuration.
fn apply_overrides(config: &mut Config, args: &Args) -> Result<()> {
    if let Some(destination) = &args.destination {
        config.destination = Some(destination.clone());
    }
    if let Some(parallel) = args.parallel {
        config.parallel_limit = Some(parallel);
    }
    if let Some(policy) = args.policy {
        config.publish_policy = Some(policy);
    }
    if let Some(verify) = args.verify {
        config.verify = Some(verify);
    }
    if args.prune {
        config.prune = Some(true);
    }
    config.resolve()?;
    Ok(())
}

async fn handle_cli() -> Result<i32> {
    let args = Args::parse();

    setup_logging(&args);

    if args.no_color {
        COLOR.store(false, Ordering::Relaxed);
    }
    if args.no_progress || args.quiet || args.json {
        PROGRESS.store(false, Ordering::Relaxed);
    }

    if let Some(ref c) = args.config {
        let path = resolve_path(c).map_err(UtilsError::from)?;
        set_config_path(path);
    }

    let command = args.command.as_ref().unwrap_or(&Commands::Sync);
    if let Commands::DefConfig = command {
        generate_default_config(config_path())?;
        return Ok(EXIT_OK);
    }

    let mut config = Config::new()?;
    apply_overrides(&mut config, &args)?;

    if let Commands::Mirrors = command {
        list_mirrors(&config);
        return Ok(EXIT_OK);
    }

    let targets = config.targets(&args.arch, args.mirror.as_deref())?;
    let options = SyncOptions::from_config(&config, targets)?;
    debug!(
        destination = %options.destination.display(),
        targets = options.targets.len(),
        "resolved sync options"
    );

    if let Commands::Verify = command {
        return verify_mirror(&options.destination, &options.targets);
    }

    let user_agent = config.user_agent();
    let timeout = config.timeout();
    configure_http_client(|client| {
        client.user_agent = Some(user_agent);
        client.timeout = Some(timeout);
        client.connect_timeout = Some(CONNECT_TIMEOUT);
    });

    match command {
        Commands::Plan => {
            let syncer = Syncer::new(options, Arc::new(HttpFetcher), Arc::new(armi_events::NullSink));
            run_plan(&syncer).await
        }
        _ => {
            let (events, progress) = make_syncer_events();
            let syncer = Syncer::new(options, Arc::new(HttpFetcher), events);
            run_sync(syncer, progress).await
        }
    }
}

#[tokio::main]
async fn main() {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .build(),
        )
    }))
    .ok();

    let code = match handle_cli().await {
        Ok(code) => code,
        Err(ArmiError::Cancelled) => armi_core::sync::EXIT_CANCELLED,
        Err(err) => {
            eprintln!("{:?}", miette::Report::new(err));
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}
