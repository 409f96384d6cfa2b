use std::path::Path;

use armi_config::target::Target;
use armi_core::{audit::audit, sync::EXIT_OK, sync::EXIT_PARTIAL, Result};
use nu_ansi_term::Color::{Green, Red, Yellow};
use tabled::{builder::Builder, settings::Style};
use tracing::{info, warn};

use crate::utils::{Colored, Icons};

/// Hashes every published package of `targets` and prints what is wrong.
pub fn verify_mirror(destination: &Path, targets: &[Target]) -> Result<i32> {
    let mut builder = Builder::new();
    builder.push_record(["Repository", "Packages", "Missing", "Corrupt", "Status"]);

    let mut clean = true;
    for target in targets {
        let report = audit(destination, target)?;

        let status = if report.unpublished {
            Colored(Yellow, format!("{} not published", Icons::WARNING)).to_string()
        } else if report.is_clean() {
            Colored(Green, format!("{} ok", Icons::CHECK)).to_string()
        } else {
            clean = false;
            Colored(Red, format!("{} damaged", Icons::CROSS)).to_string()
        };
        builder.push_record([
            report.target.clone(),
            report.checked.to_string(),
            report.missing.len().to_string(),
            report.corrupt.len().to_string(),
            status,
        ]);

        for name in &report.missing {
            warn!("{}: {} is missing", report.target, name);
        }
        for name in &report.corrupt {
            warn!("{}: {} does not match its checksum", report.target, name);
        }
    }

    info!("{}", builder.build().with(Style::rounded()));
    Ok(if clean { EXIT_OK } else { EXIT_PARTIAL })
}
