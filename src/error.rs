// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Core error types for repository metadata generation
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration, missing or unwritable directories
    #[error("Configuration error: {0}")]
    Config(String),

    /// One package is unreadable or structurally malformed
    #[error("Cannot read package {}: {reason}", path.display())]
    PackageRead { path: PathBuf, reason: String },

    /// Checksum computation failed
    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    /// Generated artifacts are inconsistent, or a publish rename failed
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// XML serialization or parsing errors
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Invalid file or directory pattern
    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    /// Invalid exclude glob
    #[error("Invalid exclude glob: {0}")]
    Glob(#[from] glob::PatternError),

    /// Directory traversal errors
    #[error("Failed to scan directory: {0}")]
    Walk(#[from] walkdir::Error),
}

impl Error {
    /// Errors the scan loop reports and skips instead of aborting the build
    pub fn is_per_package(&self) -> bool {
        matches!(
            self,
            Error::PackageRead { .. } | Error::Checksum(ChecksumError::Io { .. })
        )
    }

    pub(crate) fn package_read(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::PackageRead {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Checksum failures, split by cause so callers can pick skip or abort
#[derive(Error, Debug)]
pub enum ChecksumError {
    /// Algorithm name not recognized
    #[error("unknown checksum algorithm: {0}")]
    UnknownAlgorithm(String),

    /// Source could not be read
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_package_classification() {
        let read = Error::package_read("/repo/a.rpm", "truncated header");
        assert!(read.is_per_package());

        let io = Error::Checksum(ChecksumError::Io {
            path: PathBuf::from("/repo/a.rpm"),
            source: std::io::Error::other("boom"),
        });
        assert!(io.is_per_package());

        let algo = Error::Checksum(ChecksumError::UnknownAlgorithm("crc".to_string()));
        assert!(!algo.is_per_package());
        assert!(!Error::Integrity("count".to_string()).is_per_package());
        assert!(!Error::Config("bad".to_string()).is_per_package());
    }

    #[test]
    fn test_package_read_message_names_path() {
        let err = Error::package_read("/repo/broken.rpm", "bad magic");
        let message = err.to_string();
        assert!(message.contains("/repo/broken.rpm"));
        assert!(message.contains("bad magic"));
    }
}
