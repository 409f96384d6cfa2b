use armi_config::config::{PublishPolicy, VerifyMode};
use clap::{ArgAction, Parser, Subcommand, ValueHint};

#[derive(Parser)]
#[command(
    author,
    version,
    about,
    help_template = "{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}"
)]
pub struct Args {
    /// Set output verbosity
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress outputs
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output logs as json
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Disable colors in output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Disable progress bars
    #[arg(long, global = true)]
    pub no_progress: bool,

    /// Provide custom config file
    #[arg(short, long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<String>,

    /// Directory to write the mirror to
    #[arg(short, long, global = true, value_hint = ValueHint::DirPath)]
    pub destination: Option<String>,

    /// Mirror to sync from, by name
    #[arg(short, long, global = true)]
    pub mirror: Option<String>,

    /// Architectures to sync ("all" for every configured one)
    #[arg(short, long, global = true, num_args = 1..)]
    pub arch: Vec<String>,

    /// Maximum number of concurrent downloads
    #[arg(short, long, global = true)]
    pub parallel: Option<u32>,

    /// What to publish when some packages fail: strict or partial
    #[arg(long, global = true)]
    pub policy: Option<PublishPolicy>,

    /// How to trust files already in the mirror: manifest or full
    #[arg(long, global = true)]
    pub verify: Option<VerifyMode>,

    /// Remove packages the index no longer names
    #[arg(long, global = true)]
    pub prune: bool,

    #[clap(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sync the selected repositories (default)
    #[clap(name = "sync", visible_alias = "S")]
    Sync,

    /// List configured mirrors
    #[clap(name = "mirrors")]
    Mirrors,

    /// Show what a sync would do without changing anything
    #[clap(name = "plan", visible_alias = "dry-run")]
    Plan,

    /// Check every published package against its index
    #[clap(name = "verify")]
    Verify,

    /// Generate default config
    #[clap(name = "defconfig")]
    DefConfig,
}
