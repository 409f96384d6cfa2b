//! File-based locking for the mirror destination.
//!
//! A sync run holds an exclusive `flock` on a `.armi.lock` file at the root of
//! the destination so that two runs never stage or publish into the same tree
//! at the same time.

use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

use crate::error::{LockError, LockResult};

/// Name of the lock file created at the root of a mirror destination.
pub const LOCK_FILE_NAME: &str = ".armi.lock";

/// A file-based lock using `flock`.
///
/// The lock is automatically released when `FileLock` is dropped.
#[derive(Debug)]
pub struct FileLock {
    _file: nix::fcntl::Flock<File>,
    path: PathBuf,
}

impl FileLock {
    /// Try to acquire an exclusive lock on `dir` without blocking.
    ///
    /// Fails with [`LockError::Held`] if another process holds it.
    pub fn try_acquire<P: AsRef<Path>>(dir: P) -> LockResult<Self> {
        let lock_path = dir.as_ref().join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|err| {
                LockError::Io {
                    path: lock_path.clone(),
                    source: err,
                }
            })?;

        match nix::fcntl::Flock::lock(file, nix::fcntl::FlockArg::LockExclusiveNonblock) {
            Ok(file) => {
                Ok(FileLock {
                    path: lock_path,
                    _file: file,
                })
            }
            Err((_, nix::errno::Errno::EWOULDBLOCK)) => {
                Err(LockError::Held {
                    path: lock_path,
                })
            }
            Err((_, err)) => {
                Err(LockError::AcquireFailed(format!(
                    "{}: {}",
                    lock_path.display(),
                    err
                )))
            }
        }
    }

    /// Get the path to the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
