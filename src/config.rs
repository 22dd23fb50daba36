// src/config.rs

//! Build configuration
//!
//! A `RepoConfig` is assembled once (from the command line or by a caller)
//! and passed by reference to every stage of the build.

use crate::checksum::ChecksumType;
use crate::error::{Error, Result};
use crate::repository::manifest::MANIFEST_FILE;
use crate::repository::writer::CatalogRole;
use regex::Regex;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Default package file extension
pub const DEFAULT_EXTENSION: &str = "rpm";

/// Directory holding the published metadata, relative to the repository root
pub const FINAL_DIR: &str = "repodata";

/// Staging directory for a build in progress
pub const STAGING_DIR: &str = ".repodata";

/// Previous generation kept while the new one is swapped in
pub const BACKUP_DIR: &str = ".olddata";

/// Built-in file patterns for the primary catalog file list
pub const DEFAULT_FILE_PATTERNS: &[&str] = &["^.*bin/.*$", "^/etc/.*$", "^/usr/lib/sendmail$"];

/// Built-in directory patterns for the primary catalog file list
pub const DEFAULT_DIR_PATTERNS: &[&str] = &["^.*bin/.*$", "^/etc/.*$"];

/// Immutable configuration of one repository build
#[derive(Debug, Clone, Serialize)]
pub struct RepoConfig {
    /// Directory of packages; metadata is published below it
    pub root: PathBuf,
    /// Package file extension, matched case-insensitively
    pub extension: String,
    /// Shell-style globs removing packages from the scan
    pub excludes: Vec<String>,
    /// Prefix recorded as `xml:base` on every manifest location
    pub base_url: Option<String>,
    /// Group file copied verbatim into the published set
    pub group_file: Option<PathBuf>,
    /// Digest algorithm for the whole build
    pub checksum: ChecksumType,
    /// Indented catalog serialization
    pub pretty: bool,
    /// Mine path patterns from package requirements
    pub autoglob: bool,
    /// Regular expressions selecting files for the primary catalog
    pub file_patterns: Vec<String>,
    /// Regular expressions selecting directories for the primary catalog
    pub dir_patterns: Vec<String>,
    /// Whether operator-supplied patterns replaced the built-in ones
    pub custom_patterns: bool,
    /// Embed the active patterns in the manifest
    pub globinfo: bool,
    /// Worker threads for checksumming and header reading
    pub workers: usize,
}

impl RepoConfig {
    /// Configuration with defaults for the given repository root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: DEFAULT_EXTENSION.to_string(),
            excludes: Vec::new(),
            base_url: None,
            group_file: None,
            checksum: ChecksumType::default(),
            pretty: false,
            autoglob: false,
            file_patterns: DEFAULT_FILE_PATTERNS.iter().map(|s| s.to_string()).collect(),
            dir_patterns: DEFAULT_DIR_PATTERNS.iter().map(|s| s.to_string()).collect(),
            custom_patterns: false,
            globinfo: false,
            workers: default_workers(),
        }
    }

    /// Replace the built-in file and/or directory patterns
    ///
    /// An empty list keeps the corresponding built-in set.
    pub fn with_patterns(mut self, files: Vec<String>, dirs: Vec<String>) -> Self {
        if !files.is_empty() {
            self.file_patterns = files;
            self.custom_patterns = true;
        }
        if !dirs.is_empty() {
            self.dir_patterns = dirs;
            self.custom_patterns = true;
        }
        self
    }

    /// Check the configuration before any work starts
    pub fn validate(&self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(Error::Config(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }

        if self.extension.is_empty() {
            return Err(Error::Config("package extension must not be empty".to_string()));
        }

        if self.workers == 0 {
            return Err(Error::Config("worker count must be at least 1".to_string()));
        }

        if self.autoglob && self.custom_patterns {
            return Err(Error::Config(
                "--autoglob cannot be combined with --fileglob/--dirglob".to_string(),
            ));
        }

        if let Some(group) = &self.group_file {
            if !group.is_file() {
                return Err(Error::Config(format!(
                    "group file {} does not exist",
                    group.display()
                )));
            }

            // The group file is published under its own name next to the
            // generated documents
            let name = group.file_name().map(|n| n.to_string_lossy());
            let reserved = name.as_deref().is_some_and(|n| {
                n == MANIFEST_FILE || CatalogRole::ALL.iter().any(|r| r.file_name() == n)
            });
            if reserved {
                return Err(Error::Config(format!(
                    "group file {} would replace generated metadata; rename it",
                    group.display()
                )));
            }
        }

        for pattern in self.file_patterns.iter().chain(&self.dir_patterns) {
            Regex::new(pattern).map_err(|e| {
                Error::Config(format!("invalid pattern '{}': {}", pattern, e))
            })?;
        }

        for exclude in &self.excludes {
            glob::Pattern::new(exclude).map_err(|e| {
                Error::Config(format!("invalid exclude glob '{}': {}", exclude, e))
            })?;
        }

        Ok(())
    }

    pub fn final_dir(&self) -> PathBuf {
        self.root.join(FINAL_DIR)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.join(BACKUP_DIR)
    }

    /// Path of `path` relative to the repository root, with `/` separators
    pub fn relative_location(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}
