//! Repository index handling for armi.
//!
//! A repository index (`<branch>.db.tar.gz`) is a compressed tar archive with
//! one directory per package. Each directory holds a `desc` file made of
//! `%KEY%` sections:
//!
//! ```text
//! %FILENAME%
//! foo-1.0-1-x86_64.pkg.tar.zst
//!
//! %NAME%
//! foo
//! ```
//!
//! [`RepositoryIndex::parse`] decodes such an archive into
//! [`PackageRecord`]s keyed by file name, and [`filter_archive`] rewrites an
//! archive without a chosen set of package directories.
//!
//! # Example
//!
//! ```no_run
//! use armi_registry::RepositoryIndex;
//!
//! fn list(raw: Vec<u8>) -> Result<(), armi_registry::ParseError> {
//!     let index = RepositoryIndex::parse(raw)?;
//!     for record in index.records() {
//!         println!("{} {} -> {}", record.name, record.version, record.filename);
//!     }
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod error;
pub mod index;
pub mod package;

pub use archive::{filter_archive, ArchiveWriter, Compression};
pub use error::{ErrorContext, ParseError, RegistryError, Result};
pub use index::RepositoryIndex;
pub use package::PackageRecord;
