// src/repository/scanner.rs

//! Package discovery
//!
//! Walks the repository tree in lexicographic order at every level, so two
//! scans of an unchanged tree yield the same sequence. Exclude globs are
//! applied after collection.

use crate::config::{BACKUP_DIR, FINAL_DIR, STAGING_DIR};
use crate::error::Result;
use glob::Pattern;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Lazy, ordered sequence of package paths under a root
pub struct PackageWalker {
    inner: walkdir::IntoIter,
    suffix: String,
}

impl PackageWalker {
    pub fn new(root: &Path, extension: &str) -> Self {
        let inner = WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter();

        Self {
            inner,
            suffix: format!(".{}", extension.trim_start_matches('.').to_ascii_lowercase()),
        }
    }

    fn is_package(&self, name: &str) -> bool {
        name.to_ascii_lowercase().ends_with(&self.suffix)
    }
}

/// Metadata directories at the top level are never scanned
fn is_metadata_dir(entry: &walkdir::DirEntry) -> bool {
    entry.depth() == 1
        && entry.file_type().is_dir()
        && matches!(
            entry.file_name().to_str(),
            Some(FINAL_DIR) | Some(STAGING_DIR) | Some(BACKUP_DIR)
        )
}

impl Iterator for PackageWalker {
    type Item = Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e.into())),
            };

            if is_metadata_dir(&entry) {
                self.inner.skip_current_dir();
                continue;
            }

            if !entry.file_type().is_file() {
                continue;
            }

            if entry
                .file_name()
                .to_str()
                .is_some_and(|name| self.is_package(name))
            {
                return Some(Ok(entry.into_path()));
            }

            debug!("Ignoring {}", entry.path().display());
        }
    }
}

/// Compiled exclude filter
#[derive(Debug, Default)]
pub struct ExcludeFilter {
    patterns: Vec<Pattern>,
}

impl ExcludeFilter {
    pub fn new(globs: &[String]) -> Result<Self> {
        let patterns = globs
            .iter()
            .map(|g| Pattern::new(g))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Whether a package (given relative to the root) is excluded
    ///
    /// Globs are tried against the relative path and the bare file name.
    pub fn is_excluded(&self, relative: &Path) -> bool {
        let full = relative.to_string_lossy();
        let name = relative
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        self.patterns
            .iter()
            .any(|p| p.matches(&full) || p.matches(&name))
    }
}

/// Collect package paths under `root`, in scan order, minus exclusions
pub fn scan(root: &Path, extension: &str, excludes: &[String]) -> Result<Vec<PathBuf>> {
    let filter = ExcludeFilter::new(excludes)?;

    let mut found = Vec::new();
    for path in PackageWalker::new(root, extension) {
        found.push(path?);
    }
    let total = found.len();

    found.retain(|path| {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let excluded = filter.is_excluded(relative);
        if excluded {
            debug!("Excluding {}", relative.display());
        }
        !excluded
    });

    debug!(
        "Scanned {}: {} packages, {} excluded",
        root.display(),
        found.len(),
        total - found.len()
    );
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn relative(root: &Path, paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_scan_is_ordered_and_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "b/zeta-1.0.rpm");
        touch(root, "a.rpm");
        touch(root, "b/alpha-1.0.RPM");
        touch(root, "c/d/deep-2.0.rpm");
        touch(root, "notes.txt");

        let found = scan(root, "rpm", &[]).unwrap();
        assert_eq!(
            relative(root, &found),
            vec!["a.rpm", "b/alpha-1.0.RPM", "b/zeta-1.0.rpm", "c/d/deep-2.0.rpm"]
        );

        // Same tree, same sequence
        assert_eq!(scan(root, "rpm", &[]).unwrap(), found);
    }

    #[test]
    fn test_exclude_globs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "pkgA-debug-1.0.rpm");
        touch(root, "pkgA-1.0.rpm");
        touch(root, "sub/pkgB-debuginfo-1.0.rpm");

        let found = scan(root, "rpm", &["*debug*".to_string()]).unwrap();
        assert_eq!(relative(root, &found), vec!["pkgA-1.0.rpm"]);
    }

    #[test]
    fn test_metadata_dirs_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "repodata/stray.rpm");
        touch(root, ".repodata/stray.rpm");
        touch(root, ".olddata/stray.rpm");
        touch(root, "Packages/repodata/kept.rpm");

        let found = scan(root, "rpm", &[]).unwrap();
        assert_eq!(relative(root, &found), vec!["Packages/repodata/kept.rpm"]);
    }

    #[test]
    fn test_invalid_exclude_glob() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan(dir.path(), "rpm", &["[".to_string()]).is_err());
    }
}
