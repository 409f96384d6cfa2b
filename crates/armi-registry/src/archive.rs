//! Compression detection and tar re-encoding for index archives.

use std::{
    collections::HashSet,
    fmt,
    io::{self, Read, Write},
    path::{Component, Path},
};

use flate2::{read::MultiGzDecoder, write::GzEncoder};
use tar::{EntryType, Header};
use tracing::debug;

use crate::error::{ErrorContext, ParseError, Result};

pub const GZIP_MAGIC_BYTES: [u8; 2] = [0x1f, 0x8b];
pub const ZST_MAGIC_BYTES: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];
const XZ_MAGIC_BYTES: [u8; 6] = [0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];
const BZIP2_MAGIC_BYTES: [u8; 3] = [0x42, 0x5a, 0x68];

/// Compression of an index archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Zstd,
    None,
}

impl Compression {
    /// Detects the compression from the leading bytes of `content`.
    ///
    /// Anything that is not a known compressed stream is assumed to be a
    /// plain tar archive; the tar reader rejects it later if it is not.
    pub fn detect(content: &[u8]) -> std::result::Result<Self, ParseError> {
        if content.starts_with(&GZIP_MAGIC_BYTES) {
            Ok(Compression::Gzip)
        } else if content.starts_with(&ZST_MAGIC_BYTES) {
            Ok(Compression::Zstd)
        } else if content.starts_with(&XZ_MAGIC_BYTES) {
            Err(ParseError::UnsupportedCompression("xz"))
        } else if content.starts_with(&BZIP2_MAGIC_BYTES) {
            Err(ParseError::UnsupportedCompression("bzip2"))
        } else {
            Ok(Compression::None)
        }
    }

    /// Wraps `content` in a decompressing reader.
    pub fn decoder<'a>(self, content: &'a [u8]) -> io::Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Compression::Gzip => Box::new(MultiGzDecoder::new(content)),
            Compression::Zstd => Box::new(zstd::Decoder::new(content)?),
            Compression::None => Box::new(content),
        })
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::Gzip => write!(f, "gzip"),
            Compression::Zstd => write!(f, "zstd"),
            Compression::None => write!(f, "none"),
        }
    }
}

enum Encoder {
    Gzip(GzEncoder<Vec<u8>>),
    Zstd(zstd::Encoder<'static, Vec<u8>>),
    Plain(Vec<u8>),
}

impl Encoder {
    fn new(compression: Compression) -> io::Result<Self> {
        Ok(match compression {
            Compression::Gzip => {
                Encoder::Gzip(GzEncoder::new(Vec::new(), flate2::Compression::default()))
            }
            Compression::Zstd => Encoder::Zstd(zstd::Encoder::new(Vec::new(), 0)?),
            Compression::None => Encoder::Plain(Vec::new()),
        })
    }

    fn finish(self) -> io::Result<Vec<u8>> {
        match self {
            Encoder::Gzip(enc) => enc.finish(),
            Encoder::Zstd(enc) => enc.finish(),
            Encoder::Plain(buf) => Ok(buf),
        }
    }
}

impl Write for Encoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Gzip(enc) => enc.write(buf),
            Encoder::Zstd(enc) => enc.write(buf),
            Encoder::Plain(out) => out.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Gzip(enc) => enc.flush(),
            Encoder::Zstd(enc) => enc.flush(),
            Encoder::Plain(out) => out.flush(),
        }
    }
}

/// Builds an index archive in memory.
pub struct ArchiveWriter {
    builder: tar::Builder<Encoder>,
}

impl ArchiveWriter {
    pub fn new(compression: Compression) -> io::Result<Self> {
        let mut builder = tar::Builder::new(Encoder::new(compression)?);
        builder.mode(tar::HeaderMode::Deterministic);
        Ok(Self {
            builder,
        })
    }

    /// Adds a package directory entry such as `foo-1.0-1/`.
    pub fn append_dir(&mut self, path: &str) -> io::Result<()> {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_mode(0o755);
        header.set_size(0);
        self.builder.append_data(&mut header, path, io::empty())
    }

    /// Adds a regular file with `data` as its content.
    pub fn append_file(&mut self, path: &str, data: &[u8]) -> io::Result<()> {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(data.len() as u64);
        self.builder.append_data(&mut header, path, data)
    }

    fn append_entry<R: Read>(&mut self, header: &Header, path: &Path, data: R) -> io::Result<()> {
        let mut header = header.clone();
        self.builder.append_data(&mut header, path, data)
    }

    /// Writes the end-of-archive marker and returns the compressed bytes.
    pub fn finish(self) -> io::Result<Vec<u8>> {
        self.builder.into_inner()?.finish()
    }
}

/// Name of the top-level directory an archive path belongs to.
pub(crate) fn top_dir(path: &Path) -> Option<String> {
    path.components().find_map(|c| {
        match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        }
    })
}

/// Rewrites an index archive without the package directories in `excluded`.
///
/// The output uses the same compression as the input. Entry order and
/// metadata are preserved for everything that is kept.
pub fn filter_archive(raw: &[u8], excluded: &HashSet<String>) -> Result<Vec<u8>> {
    let compression = Compression::detect(raw)?;
    let decoder = compression
        .decoder(raw)
        .with_context(|| "opening index archive".to_string())?;
    let mut archive = tar::Archive::new(decoder);
    let mut writer =
        ArchiveWriter::new(compression).with_context(|| "creating index encoder".to_string())?;

    let mut dropped = 0usize;
    let entries = archive
        .entries()
        .with_context(|| "reading index archive".to_string())?;
    for entry in entries {
        let entry = entry.map_err(|source| ParseError::Archive { source })?;
        let path = entry
            .path()
            .map_err(|source| ParseError::Archive { source })?
            .into_owned();

        if top_dir(&path).is_some_and(|dir| excluded.contains(&dir)) {
            if entry.header().entry_type() == EntryType::Directory {
                dropped += 1;
            }
            continue;
        }

        let header = entry.header().clone();
        writer
            .append_entry(&header, &path, entry)
            .with_context(|| format!("copying entry {}", path.display()))?;
    }

    debug!(
        compression = %compression,
        dropped,
        "rewrote index archive without excluded packages"
    );
    writer
        .finish()
        .with_context(|| "finishing filtered index".to_string())
}
