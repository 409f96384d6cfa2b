use armi_config::config::Config;
use nu_ansi_term::Color::{Blue, Green};
use tabled::{builder::Builder, settings::Style};
use tracing::info;

use crate::utils::Colored;

pub fn list_mirrors(config: &Config) {
    let mut builder = Builder::new();
    builder.push_record(["", "Name", "URL"]);
    for (name, url) in &config.mirrors {
        let marker = if *name == config.default_mirror { "*" } else { "" };
        builder.push_record([
            Colored(Green, marker).to_string(),
            Colored(Blue, name).to_string(),
            url.clone(),
        ]);
    }

    let table = builder.build().with(Style::rounded()).to_string();
    info!("{table}");
}
