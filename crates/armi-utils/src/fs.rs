//! Crash-safe filesystem primitives.
//!
//! Everything that becomes visible in a live mirror goes through one of the
//! rename-based helpers here: content is written next to its final location,
//! flushed to disk, and then moved into place with a single `rename(2)`.

use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    os::unix::fs::symlink,
    path::{Path, PathBuf},
    process,
};

use crate::error::{FileSystemError, FileSystemResult};

/// Suffix of a download that has not been verified yet.
pub const PART_SUFFIX: &str = ".part";

/// Removes the specified file or directory safely.
///
/// If the path does not exist, this function returns `Ok(())`. Directories are
/// removed recursively. Symlinks are removed, never followed.
///
/// # Errors
///
/// Returns a [`FileSystemError::File`] if the removal fails for any reason other than
/// the path not existing.
pub fn safe_remove<P: AsRef<Path>>(path: P) -> FileSystemResult<()> {
    let path = path.as_ref();

    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(FileSystemError::File {
                path: path.to_path_buf(),
                action: "stat",
                source: err,
            })
        }
    };

    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            Err(FileSystemError::File {
                path: path.to_path_buf(),
                action: "remove",
                source: err,
            })
        }
    }
}

/// Creates a directory structure if it doesn't exist.
///
/// # Errors
///
/// * [`FileSystemError::Directory`] if the directory could not be created.
/// * [`FileSystemError::NotADirectory`] if the path exists but is not a directory.
pub fn ensure_dir_exists<P: AsRef<Path>>(path: P) -> FileSystemResult<()> {
    let path = path.as_ref();

    if !path.exists() {
        fs::create_dir_all(path).map_err(|err| {
            FileSystemError::Directory {
                path: path.to_path_buf(),
                action: "create",
                source: err,
            }
        })?;
    } else if !path.is_dir() {
        return Err(FileSystemError::NotADirectory {
            path: path.to_path_buf(),
        });
    }

    Ok(())
}

/// Flushes a directory's entries to disk so that renames inside it survive a
/// crash.
pub fn sync_dir<P: AsRef<Path>>(dir: P) -> FileSystemResult<()> {
    let dir = dir.as_ref();
    File::open(dir)
        .and_then(|handle| handle.sync_all())
        .map_err(|err| {
            FileSystemError::Directory {
                path: dir.to_path_buf(),
                action: "sync",
                source: err,
            }
        })
}

/// Renames `from` to `to`, replacing `to` atomically if it exists.
pub fn rename<P: AsRef<Path>, Q: AsRef<Path>>(from: P, to: Q) -> FileSystemResult<()> {
    let (from, to) = (from.as_ref(), to.as_ref());
    fs::rename(from, to).map_err(|err| {
        FileSystemError::Rename {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source: err,
        }
    })
}

/// Path of the hidden sibling used while `path` is being replaced.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp-{}", process::id()))
}

/// Atomically replaces the contents of `path` with `content`.
///
/// Readers observe either the previous file or the complete new one.
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &[u8]) -> FileSystemResult<()> {
    let path = path.as_ref();
    let tmp = temp_sibling(path);

    let write = || -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(content)?;
        file.sync_all()
    };

    if let Err(err) = write() {
        let _ = fs::remove_file(&tmp);
        return Err(FileSystemError::File {
            path: tmp,
            action: "write",
            source: err,
        });
    }

    if let Err(err) = rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        sync_dir(parent)?;
    }

    Ok(())
}

/// Points `link` at `target`, replacing whatever `link` was before in one
/// rename.
pub fn replace_symlink<P: AsRef<Path>, Q: AsRef<Path>>(target: P, link: Q) -> FileSystemResult<()> {
    let (target, link) = (target.as_ref(), link.as_ref());
    let tmp = temp_sibling(link);

    safe_remove(&tmp)?;
    symlink(target, &tmp).map_err(|err| {
        FileSystemError::File {
            path: tmp.clone(),
            action: "symlink",
            source: err,
        }
    })?;

    if let Err(err) = rename(&tmp, link) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    Ok(())
}
