// src/repository/patterns.rs

//! File and directory pattern sets
//!
//! The active pattern set decides which file entries the primary catalog
//! lists, and can be recorded in the manifest so clients know the shape of
//! that list. Patterns are regular expressions. They either come from the
//! configuration or are mined from path requirements of the packages
//! themselves ("autoglob").

use crate::config::RepoConfig;
use crate::error::Result;
use crate::packages::{FileKind, PackageFile, PackageHeader};
use regex::{RegexSet, RegexSetBuilder};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Compiled size limit for a pattern set; mined sets can be large
const PATTERN_SIZE_LIMIT: usize = 256 * 1024 * 1024;

/// Regex metacharacters and their literal forms
const REGEX_ESCAPES: &[(char, &str)] = &[
    ('\\', r"\\"),
    ('.', r"\."),
    ('+', r"\+"),
    ('*', r"\*"),
    ('?', r"\?"),
    ('(', r"\("),
    (')', r"\)"),
    ('|', r"\|"),
    ('[', r"\["),
    (']', r"\]"),
    ('{', r"\{"),
    ('}', r"\}"),
    ('^', r"\^"),
    ('$', r"\$"),
];

/// Turn a literal path into an anchored pattern matching exactly that path
pub fn escape_path(path: &str) -> String {
    let mut pattern = String::with_capacity(path.len() + 8);
    for c in path.chars() {
        match REGEX_ESCAPES.iter().find(|(meta, _)| *meta == c) {
            Some((_, escaped)) => pattern.push_str(escaped),
            None => pattern.push(c),
        }
    }
    format!("^{}$", pattern)
}

/// File patterns and directory patterns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatternSet {
    pub files: BTreeSet<String>,
    pub dirs: BTreeSet<String>,
}

impl PatternSet {
    /// Patterns named by the configuration (built-in or operator-supplied)
    pub fn from_config(config: &RepoConfig) -> Self {
        Self {
            files: config.file_patterns.iter().cloned().collect(),
            dirs: config.dir_patterns.iter().cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len() + self.dirs.len()
    }
}

/// Collects path requirements across packages and turns them into patterns
///
/// Requirements are classified as directory patterns when some package in
/// the repository ships that path as a directory, file patterns otherwise.
#[derive(Debug, Default)]
pub struct PatternMiner {
    requirements: BTreeSet<String>,
    directories: HashSet<String>,
}

impl PatternMiner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the path requirements and directories of one package
    pub fn observe(&mut self, header: &PackageHeader) {
        for req in header.path_requirements() {
            self.requirements.insert(req.to_string());
        }
        for file in header.files.iter().filter(|f| f.kind == FileKind::Dir) {
            self.directories.insert(file.path.clone());
        }
    }

    /// Number of distinct path requirements seen so far
    pub fn requirement_count(&self) -> usize {
        self.requirements.len()
    }

    /// Produce the mined pattern set
    pub fn finish(self) -> PatternSet {
        let mut set = PatternSet::default();
        for req in &self.requirements {
            let pattern = escape_path(req);
            if self.directories.contains(req) {
                set.dirs.insert(pattern);
            } else {
                set.files.insert(pattern);
            }
        }

        debug!(
            "Mined {} file patterns and {} directory patterns",
            set.files.len(),
            set.dirs.len()
        );
        set
    }
}

/// Compiled form of a [`PatternSet`]
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    files: RegexSet,
    dirs: RegexSet,
}

fn compile(patterns: &BTreeSet<String>) -> Result<RegexSet> {
    Ok(RegexSetBuilder::new(patterns)
        .size_limit(PATTERN_SIZE_LIMIT)
        .build()?)
}

impl PatternMatcher {
    pub fn new(set: &PatternSet) -> Result<Self> {
        Ok(Self {
            files: compile(&set.files)?,
            dirs: compile(&set.dirs)?,
        })
    }

    /// Whether a file entry belongs in the primary catalog
    pub fn keeps(&self, file: &PackageFile) -> bool {
        match file.kind {
            FileKind::Dir => self.dirs.is_match(&file.path),
            FileKind::File | FileKind::Ghost => self.files.is_match(&file.path),
        }
    }
}
