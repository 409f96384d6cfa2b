//! Error types for the registry crate.

use armi_utils::error::HashError;
use miette::Diagnostic;
use thiserror::Error;

/// Reasons an index archive is rejected.
///
/// Any of these is fatal for the cycle of the target whose index failed; the
/// mirror is left untouched.
#[derive(Error, Diagnostic, Debug)]
pub enum ParseError {
    #[error("Index is empty")]
    #[diagnostic(
        code(armi_registry::empty),
        help("The mirror returned an empty body for the index")
    )]
    Empty,

    #[error("Unsupported index compression: {0}")]
    #[diagnostic(
        code(armi_registry::unsupported_compression),
        help("Only gzip, zstd and uncompressed tar indexes are supported")
    )]
    UnsupportedCompression(&'static str),

    #[error("Corrupt or truncated index archive: {source}")]
    #[diagnostic(
        code(armi_registry::archive),
        help("The download may have been interrupted; it will be fetched again next run")
    )]
    Archive {
        #[source]
        source: std::io::Error,
    },

    #[error("Entry '{entry}' is truncated")]
    #[diagnostic(code(armi_registry::truncated))]
    Truncated { entry: String },

    #[error("Entry '{entry}' declares {size} bytes, more than any package description")]
    #[diagnostic(
        code(armi_registry::oversized),
        help("The index header is corrupt")
    )]
    Oversized { entry: String, size: u64 },

    #[error("Entry '{entry}' is not valid UTF-8")]
    #[diagnostic(code(armi_registry::encoding))]
    Encoding { entry: String },

    #[error("Entry '{entry}', line {line}: {reason}")]
    #[diagnostic(code(armi_registry::malformed))]
    Malformed {
        entry: String,
        line: usize,
        reason: &'static str,
    },

    #[error("Entry '{entry}' is missing mandatory field %{field}%")]
    #[diagnostic(
        code(armi_registry::missing_field),
        help("A package cannot be mirrored without a name, a file name and a checksum")
    )]
    MissingField { entry: String, field: &'static str },

    #[error("Entry '{entry}' has an invalid %{field}% value '{value}'")]
    #[diagnostic(code(armi_registry::invalid_value))]
    InvalidValue {
        entry: String,
        field: &'static str,
        value: String,
    },

    #[error("Entry '{entry}' has an invalid checksum: {source}")]
    #[diagnostic(code(armi_registry::invalid_checksum))]
    InvalidChecksum {
        entry: String,
        #[source]
        source: HashError,
    },

    #[error("File name '{filename}' is listed more than once")]
    #[diagnostic(code(armi_registry::duplicate_filename))]
    DuplicateFilename { filename: String },
}

/// Errors from rewriting index archives.
#[derive(Error, Diagnostic, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error("Error while {action}: {source}")]
    #[diagnostic(code(armi_registry::io))]
    IoError {
        action: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Extension trait for adding context to I/O errors.
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
            RegistryError::IoError {
                action: context(),
                source: err,
            }
        })
    }
}
