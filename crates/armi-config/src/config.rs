use std::{
    collections::{BTreeMap, HashSet},
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{LazyLock, RwLock},
    time::Duration,
};

use armi_utils::{
    path::{resolve_path, xdg_config_home},
    time::parse_duration,
};
use documented::{Documented, DocumentedFields};
use serde::{Deserialize, Serialize};
use toml_edit::DocumentMut;
use tracing::{debug, info};

use crate::{
    annotations::{annotate_toml_array_of_tables, annotate_toml_table},
    error::{ConfigError, Result},
    target::{default_layouts, Target, TargetLayout, DEFAULT_ARCH},
};

/// Keyword accepted wherever a list of architectures is expected.
pub const ALL_ARCHES: &str = "all";

/// What to do when some packages of a repository could not be fetched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishPolicy {
    /// Publish nothing; the previous index and files stay untouched.
    #[default]
    Strict,
    /// Publish the packages that succeeded with an index that omits the rest.
    Partial,
}

/// How files already present in the mirror are trusted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyMode {
    /// Trust manifest entries whose size and mtime are unchanged.
    #[default]
    Manifest,
    /// Recompute every checksum.
    Full,
}

macro_rules! impl_str_enum {
    ($ty:ty, $field:literal, $($variant:ident => $name:literal),+) => {
        impl FromStr for $ty {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($name => Ok(Self::$variant),)+
                    _ => Err(ConfigError::InvalidValue {
                        field: $field,
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($name),)+
                }
            }
        }
    };
}

impl_str_enum!(PublishPolicy, "publish_policy", Strict => "strict", Partial => "partial");
impl_str_enum!(VerifyMode, "verify", Manifest => "manifest", Full => "full");

/// armi configuration
#[derive(Clone, Debug, Deserialize, Serialize, Documented, DocumentedFields)]
pub struct Config {
    /// Directory the mirror tree is written to.
    /// Default: current working directory
    pub destination: Option<String>,

    /// Name of the mirror used when none is given on the command line.
    pub default_mirror: String,

    /// Known mirrors, by name.
    pub mirrors: BTreeMap<String, String>,

    /// Architectures synced when none are given on the command line.
    /// Use "all" for every configured target.
    /// Default: ["x86_64"]
    pub arches: Option<Vec<String>>,

    /// Maximum number of concurrent package downloads.
    /// Default: 4
    pub parallel_limit: Option<u32>,

    /// Additional attempts for a package after a transient failure or a
    /// checksum mismatch.
    /// Default: 2
    pub retries: Option<u32>,

    /// Delay before the first retry; doubled on every further attempt.
    /// Default: "1s"
    pub retry_backoff: Option<String>,

    /// Timeout for a single HTTP request, e.g. "2m".
    /// Default: "2m"
    pub timeout: Option<String>,

    /// Abort the whole run after this long, e.g. "6h".
    /// Default: no limit
    pub cycle_timeout: Option<String>,

    /// User agent sent with every request.
    /// Default: "armi/<version>"
    pub user_agent: Option<String>,

    /// "strict" publishes a repository only if every package was fetched;
    /// "partial" publishes the fetched subset with an index that omits the rest.
    /// Default: "strict"
    pub publish_policy: Option<PublishPolicy>,

    /// "manifest" trusts recorded checksums of unchanged files;
    /// "full" recomputes the checksum of every file.
    /// Default: "manifest"
    pub verify: Option<VerifyMode>,

    /// Remove package files that are no longer referenced by the index,
    /// after the new index is published.
    /// Default: false
    pub prune: Option<bool>,

    /// Also mirror the `<branch>.files` database.
    /// Default: true
    pub files_db: Option<bool>,

    /// Repository layouts per architecture.
    #[serde(default)]
    pub targets: Vec<TargetLayout>,
}

pub static CONFIG_PATH: LazyLock<RwLock<PathBuf>> = LazyLock::new(|| {
    RwLock::new(match std::env::var("ARMI_CONFIG") {
        Ok(path_str) => PathBuf::from(path_str),
        Err(_) => xdg_config_home().join("armi").join("config.toml"),
    })
});

/// Returns the current configuration path.
pub fn config_path() -> PathBuf {
    CONFIG_PATH
        .read()
        .map(|path| path.clone())
        .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
}

/// Overrides the configuration path (from `--config`).
pub fn set_config_path(path: PathBuf) {
    match CONFIG_PATH.write() {
        Ok(mut guard) => *guard = path,
        Err(poisoned) => *poisoned.into_inner() = path,
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl Config {
    pub fn default_config() -> Self {
        Self {
            destination: None,
            default_mirror: "worldwide".to_string(),
            mirrors: BTreeMap::from([(
                "worldwide".to_string(),
                "https://geo.mirror.pkgbuild.com".to_string(),
            )]),
            arches: Some(vec![DEFAULT_ARCH.to_string()]),
            parallel_limit: Some(4),
            retries: Some(2),
            retry_backoff: Some("1s".to_string()),
            timeout: Some("2m".to_string()),
            cycle_timeout: None,
            user_agent: None,
            publish_policy: Some(PublishPolicy::Strict),
            verify: Some(VerifyMode::Manifest),
            prune: Some(false),
            files_db: Some(true),
            targets: default_layouts(),
        }
    }

    /// Loads the configuration from the configured path, falling back to the
    /// defaults when the file does not exist.
    pub fn new() -> Result<Self> {
        Self::load(config_path())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("config {} not found, using defaults", path.display());
                Self::default_config()
            }
            Err(err) => return Err(ConfigError::IoError(err)),
        };

        config.resolve()?;
        Ok(config)
    }

    /// Normalizes names and validates cross-field constraints.
    pub fn resolve(&mut self) -> Result<()> {
        let norm = |value: &str| value.trim().to_lowercase();

        self.default_mirror = norm(&self.default_mirror);
        self.mirrors = std::mem::take(&mut self.mirrors)
            .into_iter()
            .map(|(name, url)| (norm(&name), url.trim().to_string()))
            .collect();

        if !self.mirrors.contains_key(&self.default_mirror) {
            return Err(ConfigError::UnknownMirror(self.default_mirror.clone()));
        }

        if self.targets.is_empty() {
            self.targets = default_layouts();
        }

        let mut seen = HashSet::new();
        for layout in &self.targets {
            if !seen.insert(layout.arch.as_str()) {
                return Err(ConfigError::DuplicateArch(layout.arch.clone()));
            }
            layout.validate()?;
        }

        if self.parallel_limit == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "parallel_limit",
                value: "0".to_string(),
            });
        }

        for (field, value) in [
            ("retry_backoff", &self.retry_backoff),
            ("timeout", &self.timeout),
            ("cycle_timeout", &self.cycle_timeout),
        ] {
            if let Some(value) = value {
                if parse_duration(value).is_none() {
                    return Err(ConfigError::InvalidValue {
                        field,
                        value: value.clone(),
                    });
                }
            }
        }

        if let Some(arches) = &self.arches {
            for arch in arches {
                if arch != ALL_ARCHES && self.layout(arch).is_none() {
                    return Err(ConfigError::UnknownArch(arch.clone()));
                }
            }
        }

        Ok(())
    }

    pub fn destination(&self) -> Result<PathBuf> {
        match &self.destination {
            Some(dest) => Ok(resolve_path(dest)?),
            None => Ok(std::env::current_dir()?),
        }
    }

    /// URL of the named mirror, or of the default mirror.
    pub fn mirror_url(&self, name: Option<&str>) -> Result<&str> {
        let name = name
            .map(|n| n.trim().to_lowercase())
            .unwrap_or_else(|| self.default_mirror.clone());
        self.mirrors
            .get(&name)
            .map(String::as_str)
            .ok_or(ConfigError::UnknownMirror(name))
    }

    pub fn layout(&self, arch: &str) -> Option<&TargetLayout> {
        self.targets.iter().find(|layout| layout.arch == arch)
    }

    /// Expands the architectures to sync, honoring the "all" keyword.
    pub fn selected_arches(&self, requested: &[String]) -> Result<Vec<String>> {
        let requested = if requested.is_empty() {
            self.arches
                .clone()
                .unwrap_or_else(|| vec![DEFAULT_ARCH.to_string()])
        } else {
            requested.to_vec()
        };

        if requested.iter().any(|arch| arch == ALL_ARCHES) {
            return Ok(self.targets.iter().map(|l| l.arch.clone()).collect());
        }

        let mut arches = Vec::new();
        for arch in requested {
            if self.layout(&arch).is_none() {
                return Err(ConfigError::UnknownArch(arch));
            }
            if !arches.contains(&arch) {
                arches.push(arch);
            }
        }
        Ok(arches)
    }

    /// Resolves every (arch, branch) pair to sync against `mirror`.
    pub fn targets(&self, arches: &[String], mirror: Option<&str>) -> Result<Vec<Target>> {
        let mirror = self.mirror_url(mirror)?.to_string();
        let mut targets = Vec::new();

        for arch in self.selected_arches(arches)? {
            let layout = self
                .layout(&arch)
                .ok_or_else(|| ConfigError::UnknownArch(arch.clone()))?;
            for branch in &layout.branches {
                targets.push(Target {
                    arch: layout.arch.clone(),
                    branch: branch.clone(),
                    mirror: mirror.clone(),
                    url_template: layout.url_template.clone(),
                });
            }
        }

        Ok(targets)
    }

    pub fn parallel_limit(&self) -> usize {
        self.parallel_limit.unwrap_or(4).max(1) as usize
    }

    pub fn retries(&self) -> u32 {
        self.retries.unwrap_or(2)
    }

    pub fn retry_backoff(&self) -> Duration {
        self.retry_backoff
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(Duration::from_secs(1))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(Duration::from_secs(120))
    }

    pub fn cycle_timeout(&self) -> Option<Duration> {
        self.cycle_timeout.as_deref().and_then(parse_duration)
    }

    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| format!("armi/{}", env!("CARGO_PKG_VERSION")))
    }

    pub fn publish_policy(&self) -> PublishPolicy {
        self.publish_policy.unwrap_or_default()
    }

    pub fn verify_mode(&self) -> VerifyMode {
        self.verify.unwrap_or_default()
    }

    pub fn prune(&self) -> bool {
        self.prune.unwrap_or(false)
    }

    pub fn files_db(&self) -> bool {
        self.files_db.unwrap_or(true)
    }

    pub fn to_annotated_document(&self) -> Result<DocumentMut> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut doc = toml_string.parse::<DocumentMut>()?;

        annotate_toml_table::<Config>(doc.as_table_mut(), true)?;

        if let Some(targets) = doc
            .get_mut("targets")
            .and_then(|item| item.as_array_of_tables_mut())
        {
            annotate_toml_array_of_tables::<TargetLayout>(targets)?;
        }

        Ok(doc)
    }
}

/// Writes an annotated default configuration to `path`.
///
/// Refuses to overwrite an existing file.
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        return Err(ConfigError::ConfigAlreadyExists(
            path.display().to_string(),
        ));
    }

    let doc = Config::default_config().to_annotated_document()?;
    if let Some(parent) = path.parent() {
        armi_utils::fs::ensure_dir_exists(parent)?;
    }
    fs::write(path, doc.to_string())?;
    info!("Default config written to {}", path.display());
    Ok(())
}
