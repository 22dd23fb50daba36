// src/packages/traits.rs

//! Common types and traits for package header readers

use crate::error::Result;
use std::path::Path;

/// Dependency sense bits, matching the RPM header encoding
pub mod sense {
    pub const LESS: u32 = 1 << 1;
    pub const GREATER: u32 = 1 << 2;
    pub const EQUAL: u32 = 1 << 3;
    pub const PREREQ: u32 = 1 << 6;

    /// Comparison bits only
    pub const COMPARE_MASK: u32 = LESS | GREATER | EQUAL;
}

/// Kind of a file entry in a package payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
    Ghost,
}

/// Metadata about a file within a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    pub path: String,
    pub kind: FileKind,
}

impl PackageFile {
    pub fn new(path: impl Into<String>, kind: FileKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// One capability entry (provides/requires/conflicts/obsoletes)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dependency {
    pub name: String,
    /// Sense bits, see [`sense`]
    pub flags: u32,
    /// `[epoch:]version[-release]`, empty when unversioned
    pub version: String,
}

impl Dependency {
    /// Create an unversioned dependency
    pub fn unversioned(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: 0,
            version: String::new(),
        }
    }

    /// Create a versioned dependency
    pub fn versioned(name: impl Into<String>, flags: u32, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags,
            version: version.into(),
        }
    }

    /// Whether this names a file path rather than a capability
    pub fn is_path(&self) -> bool {
        self.name.starts_with('/')
    }
}

/// A single changelog entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogEntry {
    pub author: String,
    pub timestamp: u64,
    pub text: String,
}

/// Byte sizes recorded in the primary catalog
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackageSizes {
    /// Size of the package file
    pub package: u64,
    /// Sum of installed file sizes
    pub installed: u64,
    /// Uncompressed payload size
    pub archive: u64,
}

/// Header fields of one package, as handed out by a [`PackageReader`]
///
/// Identity fields are optional so that a structurally incomplete header
/// can be represented and rejected by the catalog builder.
#[derive(Debug, Clone, Default)]
pub struct PackageHeader {
    pub name: Option<String>,
    pub epoch: Option<u32>,
    pub version: Option<String>,
    pub release: Option<String>,
    pub arch: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub packager: Option<String>,
    pub url: Option<String>,
    pub license: Option<String>,
    pub vendor: Option<String>,
    pub group: Option<String>,
    pub build_host: Option<String>,
    pub source_rpm: Option<String>,
    pub build_time: u64,
    /// Modification time of the package file, seconds since the epoch
    pub file_time: u64,
    pub sizes: PackageSizes,
    /// Byte offsets of the main header within the package file
    pub header_range: (u64, u64),
    pub files: Vec<PackageFile>,
    pub provides: Vec<Dependency>,
    pub requires: Vec<Dependency>,
    pub conflicts: Vec<Dependency>,
    pub obsoletes: Vec<Dependency>,
    pub changelog: Vec<ChangelogEntry>,
}

impl PackageHeader {
    /// Requirement names that are absolute paths
    pub fn path_requirements(&self) -> impl Iterator<Item = &str> {
        self.requires
            .iter()
            .filter(|dep| dep.is_path())
            .map(|dep| dep.name.as_str())
    }
}

/// Source of package headers
///
/// The generator never parses package files itself; it asks a reader for
/// the header and digests the raw bytes separately.
pub trait PackageReader: Sync {
    /// Read the header of the package at `path`
    fn read_header(&self, path: &Path) -> Result<PackageHeader>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_requirements() {
        let header = PackageHeader {
            requires: vec![
                Dependency::unversioned("/bin/sh"),
                Dependency::versioned("glibc", sense::GREATER | sense::EQUAL, "2.34"),
                Dependency::unversioned("/usr/bin/perl"),
            ],
            ..Default::default()
        };

        let paths: Vec<_> = header.path_requirements().collect();
        assert_eq!(paths, vec!["/bin/sh", "/usr/bin/perl"]);
    }

    #[test]
    fn test_dependency_constructors() {
        let dep = Dependency::unversioned("bash");
        assert_eq!(dep.flags, 0);
        assert!(dep.version.is_empty());
        assert!(!dep.is_path());

        let versioned = Dependency::versioned("libc", sense::EQUAL, "1:2.3-4");
        assert_eq!(versioned.version, "1:2.3-4");
    }
}
