//! Error types for armi-core.

use armi_config::error::ConfigError;
use armi_dl::error::DownloadError;
use armi_registry::{ParseError, RegistryError};
use armi_utils::error::{FileSystemError, HashError, LockError, UtilsError};
use miette::Diagnostic;
use thiserror::Error;

/// Failures while committing a cycle to the live tree.
#[derive(Error, Diagnostic, Debug)]
pub enum PublishError {
    #[error("Staged file for '{filename}' is missing")]
    #[diagnostic(
        code(armi::publish::missing_staged),
        help("The staging directory was modified during the sync")
    )]
    MissingStagedFile { filename: String },

    #[error("Staged file for '{filename}' has size {actual}, expected {expected}")]
    #[diagnostic(code(armi::publish::staged_size))]
    StagedSizeMismatch {
        filename: String,
        expected: u64,
        actual: u64,
    },

    #[error(transparent)]
    #[diagnostic(code(armi::publish::filesystem))]
    FileSystem(#[from] FileSystemError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to encode manifest: {0}")]
    #[diagnostic(code(armi::publish::manifest))]
    Manifest(#[from] serde_json::Error),
}

/// Core error type for armi operations.
#[derive(Error, Diagnostic, Debug)]
pub enum ArmiError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    #[diagnostic(code(armi::filesystem), help("Check file permissions and disk space"))]
    FileSystem(#[from] FileSystemError),

    #[error(transparent)]
    #[diagnostic(code(armi::hash))]
    Hash(#[from] HashError),

    #[error(transparent)]
    #[diagnostic(
        code(armi::lock),
        help("Another armi process is syncing this destination; wait for it to finish")
    )]
    Lock(#[from] LockError),

    #[error(transparent)]
    #[diagnostic(code(armi::utils))]
    Utils(#[from] UtilsError),

    #[error("Error while {action}")]
    #[diagnostic(code(armi::io), help("Check file permissions and disk space"))]
    IoError {
        action: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Background task failed: {0}")]
    #[diagnostic(
        code(armi::task),
        help("This is an internal error, please report it")
    )]
    TaskFailed(String),

    #[error("Sync was cancelled")]
    #[diagnostic(code(armi::cancelled))]
    Cancelled,
}

impl From<tokio::task::JoinError> for ArmiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskFailed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ArmiError>;

/// Trait for adding context to IO errors.
pub trait ErrorContext<T> {
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: FnOnce() -> String;
}

impl<T> ErrorContext<T> for std::io::Result<T> {
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: FnOnce() -> String,
    {
        self.map_err(|err| {
            ArmiError::IoError {
                action: context(),
                source: err,
            }
        })
    }
}
