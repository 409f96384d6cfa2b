//! Checksums for package verification.
//!
//! Repository indexes carry either an MD5 or a SHA-256 digest per package.
//! All digests are lowercase hex strings.

use std::{
    fmt,
    fs::File,
    io::{self, Read},
    path::Path,
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use sha2::Digest as _;

use crate::error::{HashError, HashResult};

/// Buffer size used when hashing files and streams.
pub const HASH_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha256,
}

impl HashAlgorithm {
    /// Length of a hex-encoded digest for this algorithm.
    pub fn hex_len(self) -> usize {
        match self {
            HashAlgorithm::Md5 => 32,
            HashAlgorithm::Sha256 => 64,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha256" => Ok(HashAlgorithm::Sha256),
            _ => {
                Err(HashError::UnknownAlgorithm {
                    name: s.to_string(),
                })
            }
        }
    }
}

/// An expected digest together with the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    pub digest: String,
}

impl Checksum {
    /// Builds a checksum after validating that `digest` is well-formed hex of
    /// the right length for `algorithm`. The digest is normalized to lowercase.
    pub fn new(algorithm: HashAlgorithm, digest: &str) -> HashResult<Self> {
        let digest = digest.trim();
        if digest.len() != algorithm.hex_len() {
            return Err(HashError::InvalidDigest {
                digest: digest.to_string(),
                reason: "unexpected length",
            });
        }
        if !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(HashError::InvalidDigest {
                digest: digest.to_string(),
                reason: "not hexadecimal",
            });
        }
        Ok(Self {
            algorithm,
            digest: digest.to_ascii_lowercase(),
        })
    }

    /// Compares a computed hex digest with this checksum, ignoring case.
    pub fn matches(&self, actual: &str) -> bool {
        self.digest.eq_ignore_ascii_case(actual)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.digest)
    }
}

/// Incremental hasher over any supported algorithm.
pub enum Hasher {
    Md5(md5::Md5),
    Sha256(sha2::Sha256),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Hasher::Md5(md5::Md5::new()),
            HashAlgorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    /// Consumes the hasher and returns the lowercase hex digest.
    pub fn finalize(self) -> String {
        match self {
            Hasher::Md5(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Hashes everything `reader` yields.
pub fn checksum_reader<R: Read>(algorithm: HashAlgorithm, mut reader: R) -> io::Result<String> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize())
}

/// Hashes an in-memory buffer.
pub fn checksum_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Calculates the checksum of a file with the given algorithm.
///
/// # Errors
///
/// * [`HashError::ReadFailed`] if the file cannot be read.
pub fn calculate_checksum<P: AsRef<Path>>(
    file_path: P,
    algorithm: HashAlgorithm,
) -> HashResult<String> {
    let file_path = file_path.as_ref();
    let read_failed = |source| {
        HashError::ReadFailed {
            path: file_path.to_path_buf(),
            source,
        }
    };

    let file = File::open(file_path).map_err(read_failed)?;
    checksum_reader(algorithm, file).map_err(read_failed)
}

/// Verifies a file against an expected checksum.
///
/// # Errors
///
/// * [`HashError::ReadFailed`] if the file cannot be read.
pub fn verify_checksum<P: AsRef<Path>>(file_path: P, expected: &Checksum) -> HashResult<bool> {
    let actual = calculate_checksum(file_path, expected.algorithm)?;
    Ok(expected.matches(&actual))
}

/// Verifies an in-memory buffer against an expected checksum.
pub fn verify_bytes(data: &[u8], expected: &Checksum) -> bool {
    expected.matches(&checksum_bytes(expected.algorithm, data))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    const HELLO_MD5: &str = "6f5902ac237024bdd0c176cb93063dc4";
    const HELLO_SHA256: &str = "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447";

    #[test]
    fn test_checksum_bytes_all_algorithms() {
        let data = b"hello world\n";
        assert_eq!(checksum_bytes(HashAlgorithm::Md5, data), HELLO_MD5);
        assert_eq!(checksum_bytes(HashAlgorithm::Sha256, data), HELLO_SHA256);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut hasher = Hasher::new(HashAlgorithm::Sha256);
        hasher.update(b"hello ");
        hasher.update(b"world\n");
        assert_eq!(hasher.finalize(), HELLO_SHA256);
    }

    #[test]
    fn test_calculate_checksum_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world\n").unwrap();

        assert_eq!(
            calculate_checksum(file.path(), HashAlgorithm::Md5).unwrap(),
            HELLO_MD5
        );
        assert_eq!(
            calculate_checksum(file.path(), HashAlgorithm::Sha256).unwrap(),
            HELLO_SHA256
        );
    }

    #[test]
    fn test_verify_checksum_case_insensitive() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world\n").unwrap();

        let expected = Checksum {
            algorithm: HashAlgorithm::Sha256,
            digest: HELLO_SHA256.to_uppercase(),
        };
        assert!(verify_checksum(file.path(), &expected).unwrap());
    }

    #[test]
    fn test_verify_checksum_mismatch() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();

        let expected = Checksum::new(HashAlgorithm::Md5, HELLO_MD5).unwrap();
        assert!(!verify_checksum(file.path(), &expected).unwrap());
    }

    #[test]
    fn test_verify_bytes() {
        let expected = Checksum::new(HashAlgorithm::Md5, HELLO_MD5).unwrap();
        assert!(verify_bytes(b"hello world\n", &expected));
        assert!(!verify_bytes(b"hello world!", &expected));
    }

    #[test]
    fn test_calculate_checksum_file_not_found() {
        let result = calculate_checksum("/path/to/nonexistent/file", HashAlgorithm::Sha256);
        assert!(matches!(result, Err(HashError::ReadFailed { .. })));
    }

    #[test]
    fn test_checksum_new_validates() {
        assert!(Checksum::new(HashAlgorithm::Md5, "abc").is_err());
        assert!(Checksum::new(HashAlgorithm::Md5, &"g".repeat(32)).is_err());

        let checksum = Checksum::new(HashAlgorithm::Md5, &HELLO_MD5.to_uppercase()).unwrap();
        assert_eq!(checksum.digest, HELLO_MD5);
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!("SHA256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("md5".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Md5);
        assert!("crc32".parse::<HashAlgorithm>().is_err());
        assert!("blake3".parse::<HashAlgorithm>().is_err());
    }
}
