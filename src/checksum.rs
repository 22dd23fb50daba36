// src/checksum.rs

//! Content digests for packages and generated metadata
//!
//! One algorithm is selected per build and used for every digest in that
//! build: source packages, compressed and decompressed catalog documents,
//! and the group file. Streams are read in fixed-size chunks so package
//! size does not bound memory.

use crate::error::ChecksumError;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// Read size used when streaming content into a hasher
const CHUNK_SIZE: usize = 16 * 1024;

/// Checksum algorithm type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    /// MD5 (128-bit, legacy, not for security)
    Md5,

    /// SHA-256 (preferred)
    #[default]
    Sha256,

    /// SHA-512
    Sha512,
}

impl ChecksumType {
    /// Tag written into `type` attributes of the generated metadata
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Digest length in bits
    pub const fn bits(&self) -> usize {
        match self {
            Self::Md5 => 128,
            Self::Sha256 => 256,
            Self::Sha512 => 512,
        }
    }

    /// Length of the hex encoding of a digest
    pub const fn hex_len(&self) -> usize {
        self.bits() / 4
    }
}

impl fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChecksumType {
    type Err = ChecksumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            _ => Err(ChecksumError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// A hex digest tagged with the algorithm that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: ChecksumType,
    pub value: String,
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

fn hash_stream<D: Digest>(reader: &mut dyn Read) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Digest an already-open stream
///
/// `label` names the stream in error messages.
pub fn digest_reader(
    algorithm: ChecksumType,
    reader: &mut dyn Read,
    label: &Path,
) -> Result<Checksum, ChecksumError> {
    let value = match algorithm {
        ChecksumType::Md5 => hash_stream::<Md5>(reader),
        ChecksumType::Sha256 => hash_stream::<Sha256>(reader),
        ChecksumType::Sha512 => hash_stream::<Sha512>(reader),
    }
    .map_err(|source| ChecksumError::Io {
        path: label.to_path_buf(),
        source,
    })?;

    Ok(Checksum { algorithm, value })
}

/// Digest a file on disk
pub fn digest_file(algorithm: ChecksumType, path: &Path) -> Result<Checksum, ChecksumError> {
    let mut file = File::open(path).map_err(|source| ChecksumError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    digest_reader(algorithm, &mut file, path)
}

/// Digest an in-memory buffer
pub fn digest_bytes(algorithm: ChecksumType, data: &[u8]) -> Checksum {
    let value = match algorithm {
        ChecksumType::Md5 => hex::encode(Md5::digest(data)),
        ChecksumType::Sha256 => hex::encode(Sha256::digest(data)),
        ChecksumType::Sha512 => hex::encode(Sha512::digest(data)),
    };
    Checksum { algorithm, value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_known_digests() {
        let sha = digest_bytes(ChecksumType::Sha256, b"abc");
        assert_eq!(
            sha.value,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        let md5 = digest_bytes(ChecksumType::Md5, b"abc");
        assert_eq!(md5.value, "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(md5.value.len(), ChecksumType::Md5.hex_len());
    }

    #[test]
    fn test_streamed_known_digest() {
        let sum = digest_reader(ChecksumType::Sha256, &mut &b"abc"[..], Path::new("mem")).unwrap();
        assert_eq!(
            sum.value,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_stream_matches_buffer_across_chunks() {
        let data: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        for algo in [ChecksumType::Md5, ChecksumType::Sha256, ChecksumType::Sha512] {
            let streamed = digest_reader(algo, &mut data.as_slice(), Path::new("mem")).unwrap();
            assert_eq!(streamed, digest_bytes(algo, &data));
            assert_eq!(streamed.value.len(), algo.hex_len());
        }
    }

    #[test]
    fn test_digest_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        file.flush().unwrap();

        let sum = digest_file(ChecksumType::Sha256, file.path()).unwrap();
        assert_eq!(sum, digest_bytes(ChecksumType::Sha256, b"abc"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = digest_file(ChecksumType::Md5, Path::new("/nonexistent/pkg.rpm")).unwrap_err();
        assert!(matches!(err, ChecksumError::Io { .. }));
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!("sha256".parse::<ChecksumType>().unwrap(), ChecksumType::Sha256);
        assert_eq!("MD5".parse::<ChecksumType>().unwrap(), ChecksumType::Md5);
        assert_eq!("sha-512".parse::<ChecksumType>().unwrap(), ChecksumType::Sha512);
        assert!(matches!(
            "crc32".parse::<ChecksumType>(),
            Err(ChecksumError::UnknownAlgorithm(_))
        ));
        assert_eq!(ChecksumType::Sha256.to_string(), "sha256");
    }
}
