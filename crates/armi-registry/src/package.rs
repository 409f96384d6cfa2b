//! Package records decoded from `desc` entries.

use std::collections::BTreeMap;

use armi_utils::{
    fs::PART_SUFFIX,
    hash::{Checksum, HashAlgorithm},
};
use serde::Serialize;

use crate::error::ParseError;

/// Suffixes of the files a repository directory keeps next to its packages:
/// `<branch>.db`, `<branch>.db.tar.gz`, `<branch>.files`, `<branch>.files.tar.gz`.
const DATABASE_SUFFIXES: [&str; 4] = [".db", ".db.tar.gz", ".files", ".files.tar.gz"];

/// Default architecture for records without an `%ARCH%` section.
pub const ARCH_ANY: &str = "any";

/// One package from a repository index.
///
/// Sections the mirror does not interpret (dependencies, descriptions,
/// signatures, ...) are kept verbatim in [`PackageRecord::extra`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    pub arch: String,
    pub filename: String,
    /// Compressed size in bytes (`%CSIZE%`).
    pub csize: Option<u64>,
    pub checksum: Checksum,
    pub build_date: Option<i64>,
    /// Directory inside the index archive this record was read from.
    pub entry_dir: String,
    pub extra: BTreeMap<String, Vec<String>>,
}

impl PackageRecord {
    /// Identity of the package: (name, arch, version).
    pub fn id(&self) -> (&str, &str, &str) {
        (&self.name, &self.arch, &self.version)
    }

    /// Decodes the text of a `desc` entry.
    ///
    /// `entry` is the archive path of the entry and is only used in error
    /// messages and to remember the package directory.
    pub fn from_desc(entry: &str, entry_dir: &str, text: &str) -> Result<Self, ParseError> {
        let mut sections = parse_sections(entry, text)?;

        let mut take_single = |field: &'static str| -> Result<Option<String>, ParseError> {
            match sections.remove(field) {
                None => Ok(None),
                Some(values) if values.is_empty() => Ok(None),
                Some(mut values) if values.len() == 1 => Ok(values.pop()),
                Some(values) => {
                    Err(ParseError::InvalidValue {
                        entry: entry.to_string(),
                        field,
                        value: values.join(" "),
                    })
                }
            }
        };

        let missing = |field: &'static str| {
            ParseError::MissingField {
                entry: entry.to_string(),
                field,
            }
        };

        let name = take_single("NAME")?.ok_or_else(|| missing("NAME"))?;
        let filename = take_single("FILENAME")?.ok_or_else(|| missing("FILENAME"))?;
        let version = take_single("VERSION")?.unwrap_or_default();
        let arch = take_single("ARCH")?.unwrap_or_else(|| ARCH_ANY.to_string());
        let csize = take_single("CSIZE")?
            .map(|v| parse_number::<u64>(entry, "CSIZE", v))
            .transpose()?;
        let build_date = take_single("BUILDDATE")?
            .map(|v| parse_number::<i64>(entry, "BUILDDATE", v))
            .transpose()?;

        let sha256 = take_single("SHA256SUM")?;
        let md5 = take_single("MD5SUM")?;
        let checksum = match (sha256, md5) {
            (Some(digest), _) => checksum(entry, HashAlgorithm::Sha256, &digest)?,
            (None, Some(digest)) => checksum(entry, HashAlgorithm::Md5, &digest)?,
            (None, None) => return Err(missing("SHA256SUM")),
        };

        if !is_plain_file_name(&filename) {
            return Err(ParseError::InvalidValue {
                entry: entry.to_string(),
                field: "FILENAME",
                value: filename,
            });
        }

        Ok(Self {
            name,
            version,
            arch,
            filename,
            csize,
            checksum,
            build_date,
            entry_dir: entry_dir.to_string(),
            extra: sections,
        })
    }
}

fn checksum(entry: &str, algorithm: HashAlgorithm, digest: &str) -> Result<Checksum, ParseError> {
    Checksum::new(algorithm, digest).map_err(|source| {
        ParseError::InvalidChecksum {
            entry: entry.to_string(),
            source,
        }
    })
}

fn parse_number<T: std::str::FromStr>(
    entry: &str,
    field: &'static str,
    value: String,
) -> Result<T, ParseError> {
    value.trim().parse::<T>().map_err(|_| {
        ParseError::InvalidValue {
            entry: entry.to_string(),
            field,
            value,
        }
    })
}

/// A file name that stays inside the repository directory and cannot be
/// mistaken for a database archive, a partial download or a hidden file
/// armi keeps for itself.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains('/')
        && !name.contains('\0')
        && !name.ends_with(PART_SUFFIX)
        && !DATABASE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

fn section_key(line: &str) -> Option<&str> {
    line.strip_prefix('%')
        .and_then(|rest| rest.strip_suffix('%'))
        .filter(|key| !key.is_empty() && !key.contains('%'))
}

/// Splits a `desc` document into its `%KEY%` sections.
///
/// A section runs from its header line to the next blank line. Lines before
/// the first header, and repeated headers, are errors.
fn parse_sections(entry: &str, text: &str) -> Result<BTreeMap<String, Vec<String>>, ParseError> {
    let mut sections: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut current: Option<(String, Vec<String>)> = None;

    let malformed = |line: usize, reason: &'static str| {
        ParseError::Malformed {
            entry: entry.to_string(),
            line,
            reason,
        }
    };

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        let line_no = idx + 1;

        if line.trim().is_empty() {
            if let Some((key, values)) = current.take() {
                if sections.insert(key, values).is_some() {
                    return Err(malformed(line_no, "section appears more than once"));
                }
            }
            continue;
        }

        match current.as_mut() {
            Some((_, values)) => values.push(line.to_string()),
            None => {
                let key =
                    section_key(line).ok_or_else(|| malformed(line_no, "value outside of a section"))?;
                current = Some((key.to_string(), Vec::new()));
            }
        }
    }

    if let Some((key, values)) = current.take() {
        if sections.insert(key, values).is_some() {
            return Err(malformed(text.lines().count(), "section appears more than once"));
        }
    }

    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MD5: &str = "6f5902ac237024bdd0c176cb93063dc4";
    const SHA256: &str = "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447";

    fn desc(body: &str) -> Result<PackageRecord, ParseError> {
        PackageRecord::from_desc("foo-1.0-1/desc", "foo-1.0-1", body)
    }

    #[test]
    fn test_full_record() {
        let text = format!(
            "%FILENAME%\nfoo-1.0-1-x86_64.pkg.tar.zst\n\n%NAME%\nfoo\n\n%VERSION%\n1.0-1\n\n\
             %CSIZE%\n12\n\n%MD5SUM%\n{MD5}\n\n%SHA256SUM%\n{SHA256}\n\n%ARCH%\nx86_64\n\n\
             %BUILDDATE%\n1700000000\n\n%DEPENDS%\nbar\nbaz>=2\n\n"
        );
        let record = desc(&text).unwrap();

        assert_eq!(record.name, "foo");
        assert_eq!(record.version, "1.0-1");
        assert_eq!(record.arch, "x86_64");
        assert_eq!(record.filename, "foo-1.0-1-x86_64.pkg.tar.zst");
        assert_eq!(record.csize, Some(12));
        assert_eq!(record.build_date, Some(1_700_000_000));
        assert_eq!(record.checksum.algorithm, HashAlgorithm::Sha256);
        assert_eq!(record.checksum.digest, SHA256);
        assert_eq!(record.entry_dir, "foo-1.0-1");
        assert_eq!(record.id(), ("foo", "x86_64", "1.0-1"));
        assert_eq!(
            record.extra.get("DEPENDS").unwrap(),
            &vec!["bar".to_string(), "baz>=2".to_string()]
        );
        assert!(!record.extra.contains_key("NAME"));
    }

    #[test]
    fn test_md5_only_and_defaults() {
        let text = format!("%FILENAME%\nfoo.pkg\n\n%NAME%\nfoo\n\n%MD5SUM%\n{MD5}\n");
        let record = desc(&text).unwrap();
        assert_eq!(record.checksum.algorithm, HashAlgorithm::Md5);
        assert_eq!(record.arch, ARCH_ANY);
        assert_eq!(record.version, "");
        assert_eq!(record.csize, None);
    }

    #[test]
    fn test_unknown_fields_are_kept() {
        let text = format!(
            "%FILENAME%\nfoo.pkg\n\n%NAME%\nfoo\n\n%MD5SUM%\n{MD5}\n\n%FUTUREKEY%\nsomething\n\n"
        );
        let record = desc(&text).unwrap();
        assert_eq!(record.extra["FUTUREKEY"], vec!["something".to_string()]);
    }

    #[test]
    fn test_missing_mandatory_fields() {
        let no_checksum = "%FILENAME%\nfoo.pkg\n\n%NAME%\nfoo\n\n";
        assert!(matches!(
            desc(no_checksum),
            Err(ParseError::MissingField { .. })
        ));

        let no_filename = format!("%NAME%\nfoo\n\n%MD5SUM%\n{MD5}\n\n");
        assert!(matches!(
            desc(&no_filename),
            Err(ParseError::MissingField {
                field: "FILENAME",
                ..
            })
        ));

        let empty_name = format!("%FILENAME%\nfoo.pkg\n\n%NAME%\n\n%MD5SUM%\n{MD5}\n\n");
        assert!(matches!(
            desc(&empty_name),
            Err(ParseError::MissingField { field: "NAME", .. })
        ));
    }

    #[test]
    fn test_malformed_documents() {
        assert!(matches!(
            desc("foo\n%NAME%\nfoo\n"),
            Err(ParseError::Malformed { line: 1, .. })
        ));

        let repeated = format!("%NAME%\nfoo\n\n%NAME%\nbar\n\n%MD5SUM%\n{MD5}\n");
        assert!(matches!(
            desc(&repeated),
            Err(ParseError::Malformed { .. })
        ));
    }

    #[test]
    fn test_invalid_values() {
        let bad_size = format!("%FILENAME%\nfoo.pkg\n\n%NAME%\nfoo\n\n%CSIZE%\nbig\n\n%MD5SUM%\n{MD5}\n");
        assert!(matches!(
            desc(&bad_size),
            Err(ParseError::InvalidValue { field: "CSIZE", .. })
        ));

        let bad_digest = "%FILENAME%\nfoo.pkg\n\n%NAME%\nfoo\n\n%MD5SUM%\nnot-a-digest\n";
        assert!(matches!(
            desc(bad_digest),
            Err(ParseError::InvalidChecksum { .. })
        ));

        let traversal = format!("%FILENAME%\n../../etc/passwd\n\n%NAME%\nfoo\n\n%MD5SUM%\n{MD5}\n");
        assert!(matches!(
            desc(&traversal),
            Err(ParseError::InvalidValue {
                field: "FILENAME",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_names_reserved_by_the_repository() {
        for filename in [
            "core.db.tar.gz",
            "core.db",
            "core.files",
            "extra.files.tar.gz",
            "foo-1.0-1-x86_64.pkg.tar.zst.part",
            ".armi-manifest.json",
            ".hidden.pkg.tar.zst",
        ] {
            let text = format!("%FILENAME%\n{filename}\n\n%NAME%\nfoo\n\n%MD5SUM%\n{MD5}\n");
            assert!(
                matches!(
                    desc(&text),
                    Err(ParseError::InvalidValue {
                        field: "FILENAME",
                        ..
                    })
                ),
                "{filename} was accepted"
            );
        }

        let text = format!(
            "%FILENAME%\ndb-tools-1.0-1-any.pkg.tar.zst\n\n%NAME%\ndb-tools\n\n%MD5SUM%\n{MD5}\n"
        );
        assert!(desc(&text).is_ok());
    }

    #[test]
    fn test_crlf_lines() {
        let text = format!("%FILENAME%\r\nfoo.pkg\r\n\r\n%NAME%\r\nfoo\r\n\r\n%MD5SUM%\r\n{MD5}\r\n");
        let record = desc(&text).unwrap();
        assert_eq!(record.filename, "foo.pkg");
    }
}
