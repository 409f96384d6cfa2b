use armi_utils::error::{PathError, UtilsError};
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("TOML serialization error: {0}")]
    #[diagnostic(
        code(armi_config::toml_serialize),
        help("Check your configuration structure for invalid values")
    )]
    TomlSerError(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    #[diagnostic(
        code(armi_config::toml_deserialize),
        help("Check your config.toml syntax and structure")
    )]
    TomlDeError(#[from] toml::de::Error),

    #[error("Configuration file already exists: {0}")]
    #[diagnostic(
        code(armi_config::already_exists),
        help("Remove the existing config file or use a different location")
    )]
    ConfigAlreadyExists(String),

    #[error("Unknown mirror: {0}")]
    #[diagnostic(
        code(armi_config::unknown_mirror),
        help("Run `armi mirrors` to list configured mirrors")
    )]
    UnknownMirror(String),

    #[error("Unknown architecture: {0}")]
    #[diagnostic(
        code(armi_config::unknown_arch),
        help("Add a [[targets]] entry for this architecture or pick a configured one")
    )]
    UnknownArch(String),

    #[error("Duplicate target architecture: {0}")]
    #[diagnostic(
        code(armi_config::duplicate_arch),
        help("Each [[targets]] entry must have a unique arch")
    )]
    DuplicateArch(String),

    #[error("Duplicate branch `{branch}` for architecture {arch}")]
    #[diagnostic(code(armi_config::duplicate_branch))]
    DuplicateBranch { arch: String, branch: String },

    #[error("Invalid URL template for {arch}: {reason}")]
    #[diagnostic(
        code(armi_config::invalid_template),
        help("Templates may use {{mirror}}, {{arch}}, {{branch}} and must contain {{name}}")
    )]
    InvalidTemplate { arch: String, reason: String },

    #[error("Invalid value for `{field}`: {value}")]
    #[diagnostic(code(armi_config::invalid_value))]
    InvalidValue { field: &'static str, value: String },

    #[error("IO error: {0}")]
    #[diagnostic(code(armi_config::io))]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    #[diagnostic(code(armi_config::utils))]
    Utils(#[from] UtilsError),

    #[error("Failed to parse TOML: {0}")]
    #[diagnostic(code(armi_config::toml))]
    Toml(#[from] toml_edit::TomlError),

    #[error("Encountered unexpected TOML item: {0}")]
    #[diagnostic(code(armi_config::unexpected_toml_item))]
    UnexpectedTomlItem(String),
}

impl From<PathError> for ConfigError {
    fn from(err: PathError) -> Self {
        Self::Utils(UtilsError::Path(err))
    }
}

impl From<armi_utils::error::FileSystemError> for ConfigError {
    fn from(err: armi_utils::error::FileSystemError) -> Self {
        Self::Utils(UtilsError::FileSystem(err))
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
