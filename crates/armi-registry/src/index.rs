use std::{
    collections::{btree_map::Entry, BTreeMap},
    io::Read,
};

use tracing::{debug, trace};

use crate::{
    archive::{top_dir, Compression},
    error::ParseError,
    package::PackageRecord,
};

/// Upper bound for a single `desc` document. Real ones are a few hundred bytes.
const MAX_DESC_SIZE: u64 = 1024 * 1024;

/// The packages named by one fetched index archive, keyed by file name.
///
/// The raw archive is kept alongside the records so the exact bytes can be
/// published once every package has been fetched.
#[derive(Debug, Clone)]
pub struct RepositoryIndex {
    records: BTreeMap<String, PackageRecord>,
    timestamp: Option<i64>,
    compression: Compression,
    raw: Vec<u8>,
}

impl RepositoryIndex {
    /// Decodes an index archive.
    ///
    /// Fails on truncated or corrupt archives, on `desc` entries that are not
    /// valid key/value documents or lack a name, file name or checksum, and on
    /// two records claiming the same file name.
    pub fn parse(raw: Vec<u8>) -> Result<Self, ParseError> {
        if raw.is_empty() {
            return Err(ParseError::Empty);
        }

        let compression = Compression::detect(&raw)?;
        let records = read_records(&raw, compression)?;
        let timestamp = records.values().filter_map(|r| r.build_date).max();

        debug!(
            packages = records.len(),
            compression = %compression,
            "parsed repository index"
        );

        Ok(Self {
            records,
            timestamp,
            compression,
            raw,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, filename: &str) -> Option<&PackageRecord> {
        self.records.get(filename)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.records.contains_key(filename)
    }

    /// Records in file-name order.
    pub fn records(&self) -> impl Iterator<Item = &PackageRecord> {
        self.records.values()
    }

    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Newest `%BUILDDATE%` among the records, as a Unix timestamp.
    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// The archive bytes this index was parsed from.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

fn read_records(
    raw: &[u8],
    compression: Compression,
) -> Result<BTreeMap<String, PackageRecord>, ParseError> {
    let archive_err = |source| ParseError::Archive { source };

    let decoder = compression.decoder(raw).map_err(archive_err)?;
    let mut archive = tar::Archive::new(decoder);
    let mut records = BTreeMap::new();

    for entry in archive.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry.path().map_err(archive_err)?.into_owned();
        if path.file_name().is_none_or(|name| name != "desc") {
            trace!(entry = %path.display(), "skipping index entry");
            continue;
        }
        let name = path.display().to_string();

        let expected = entry.size();
        if expected > MAX_DESC_SIZE {
            return Err(ParseError::Oversized {
                entry: name,
                size: expected,
            });
        }
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).map_err(archive_err)?;
        if bytes.len() as u64 != expected {
            return Err(ParseError::Truncated {
                entry: name,
            });
        }

        let text = String::from_utf8(bytes).map_err(|_| {
            ParseError::Encoding {
                entry: name.clone(),
            }
        })?;
        let entry_dir = top_dir(&path).unwrap_or_default();
        let record = PackageRecord::from_desc(&name, &entry_dir, &text)?;

        match records.entry(record.filename.clone()) {
            Entry::Occupied(_) => {
                return Err(ParseError::DuplicateFilename {
                    filename: record.filename,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
    }

    Ok(records)
}
