use std::path::{Path, PathBuf};

use documented::{Documented, DocumentedFields};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Repository layout for one architecture.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, Documented, DocumentedFields)]
pub struct TargetLayout {
    /// Architecture name, e.g. "x86_64".
    pub arch: String,

    /// Remote URL template. Placeholders: {mirror}, {arch}, {branch}, {name}.
    pub url_template: String,

    /// Repository branches mirrored for this architecture, in sync order.
    pub branches: Vec<String>,
}

impl TargetLayout {
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            ConfigError::InvalidTemplate {
                arch: self.arch.clone(),
                reason: reason.to_string(),
            }
        };

        if !self.url_template.contains("{name}") {
            return Err(invalid("missing {name} placeholder"));
        }
        if !self.url_template.contains("{mirror}") {
            return Err(invalid("missing {mirror} placeholder"));
        }
        if self.branches.is_empty() {
            return Err(invalid("no branches configured"));
        }

        let mut seen = std::collections::HashSet::new();
        for branch in &self.branches {
            if !seen.insert(branch.as_str()) {
                return Err(ConfigError::DuplicateBranch {
                    arch: self.arch.clone(),
                    branch: branch.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Built-in layouts for the architectures armi knows about.
pub fn default_layouts() -> Vec<TargetLayout> {
    vec![
        TargetLayout {
            arch: "aarch64".to_string(),
            url_template: "{mirror}/{arch}/{branch}/{name}".to_string(),
            branches: ["core", "extra", "community", "alarm"]
                .map(String::from)
                .to_vec(),
        },
        TargetLayout {
            arch: DEFAULT_ARCH.to_string(),
            url_template: "{mirror}/{branch}/os/{arch}/{name}".to_string(),
            branches: ["core", "extra", "community", "multilib"]
                .map(String::from)
                .to_vec(),
        },
    ]
}

pub const DEFAULT_ARCH: &str = "x86_64";

/// One (architecture, branch) pair resolved against a concrete mirror.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub arch: String,
    pub branch: String,
    pub mirror: String,
    pub url_template: String,
}

impl Target {
    /// Remote URL of a file named `name` in this repository.
    pub fn url_for(&self, name: &str) -> String {
        self.url_template
            .replace("{mirror}", self.mirror.trim_end_matches('/'))
            .replace("{arch}", &self.arch)
            .replace("{branch}", &self.branch)
            .replace("{name}", name)
    }

    /// Local directory of this repository under `destination`.
    pub fn dir(&self, destination: &Path) -> PathBuf {
        destination.join(&self.arch).join(&self.branch)
    }

    /// File name of the package database archive, e.g. `core.db.tar.gz`.
    pub fn db_archive(&self) -> String {
        format!("{}.db.tar.gz", self.branch)
    }

    /// File name of the file-list database archive, e.g. `core.files.tar.gz`.
    pub fn files_archive(&self) -> String {
        format!("{}.files.tar.gz", self.branch)
    }

    /// Names that belong to the repository itself rather than to a package.
    pub fn service_files(&self) -> [String; 4] {
        [
            format!("{}.db", self.branch),
            self.db_archive(),
            format!("{}.files", self.branch),
            self.files_archive(),
        ]
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.arch, self.branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x86_core() -> Target {
        Target {
            arch: "x86_64".to_string(),
            branch: "core".to_string(),
            mirror: "https://mirror.example.org/archlinux/".to_string(),
            url_template: "{mirror}/{branch}/os/{arch}/{name}".to_string(),
        }
    }

    #[test]
    fn test_url_for() {
        assert_eq!(
            x86_core().url_for("core.db.tar.gz"),
            "https://mirror.example.org/archlinux/core/os/x86_64/core.db.tar.gz"
        );
    }

    #[test]
    fn test_dir_and_service_files() {
        let target = x86_core();
        assert_eq!(
            target.dir(Path::new("/srv/mirror")),
            PathBuf::from("/srv/mirror/x86_64/core")
        );
        assert!(target.service_files().contains(&"core.db".to_string()));
        assert!(target
            .service_files()
            .contains(&"core.files.tar.gz".to_string()));
    }

    #[test]
    fn test_default_layouts_are_valid() {
        for layout in default_layouts() {
            layout.validate().unwrap();
        }
    }

    #[test]
    fn test_layout_validation() {
        let mut layout = default_layouts().remove(0);
        layout.url_template = "{mirror}/{branch}".to_string();
        assert!(matches!(
            layout.validate(),
            Err(ConfigError::InvalidTemplate { .. })
        ));

        let mut layout = default_layouts().remove(0);
        layout.branches.push("core".to_string());
        assert!(matches!(
            layout.validate(),
            Err(ConfigError::DuplicateBranch { .. })
        ));
    }
}
