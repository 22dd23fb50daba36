// src/repository/reader.rs

//! Read-back of generated metadata
//!
//! Parses a `repomd.xml` and the catalogs it references, and checks that the
//! set is self-consistent: every referenced file exists with the recorded
//! checksums, and every catalog holds exactly as many package records as its
//! header declares. The publisher runs this over the staging directory
//! before the swap.

use crate::checksum::{digest_file, digest_reader, ChecksumType};
use crate::error::{Error, Result};
use crate::repository::manifest::MANIFEST_FILE;
use flate2::read::GzDecoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

/// A `data` element as read back from a manifest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestRef {
    pub role: String,
    pub href: String,
    pub base: Option<String>,
    pub checksum_type: String,
    pub checksum: String,
    pub open_checksum: Option<String>,
    pub timestamp: u64,
}

/// Package records found in one catalog
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSummary {
    /// Root element name
    pub root: String,
    /// Value of the root `packages` attribute
    pub declared: usize,
    /// Package identifiers in document order
    pub pkgids: Vec<String>,
}

impl CatalogSummary {
    pub fn records(&self) -> usize {
        self.pkgids.len()
    }
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).to_string())
}

/// Parse the `data` entries of a manifest
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestRef>> {
    let mut reader = Reader::from_reader(BufReader::new(File::open(path)?));
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut entries = Vec::new();
    let mut current: Option<ManifestRef> = None;
    let mut current_tag = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match tag.as_str() {
                    "data" => {
                        current = Some(ManifestRef {
                            role: attribute(&e, b"type").unwrap_or_default(),
                            ..Default::default()
                        });
                    }
                    "checksum" | "open-checksum" => {
                        if let Some(entry) = current.as_mut() {
                            if let Some(kind) = attribute(&e, b"type") {
                                entry.checksum_type = kind;
                            }
                        }
                    }
                    _ => {}
                }
                current_tag = tag;
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"location" => {
                if let Some(entry) = current.as_mut() {
                    entry.href = attribute(&e, b"href").unwrap_or_default();
                    entry.base = attribute(&e, b"xml:base");
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(entry) = current.as_mut() {
                    let text = e.unescape().unwrap_or_default().to_string();
                    match current_tag.as_str() {
                        "checksum" => entry.checksum = text,
                        "open-checksum" => entry.open_checksum = Some(text),
                        "timestamp" => entry.timestamp = text.parse().unwrap_or(0),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"data" {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
                current_tag.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::Integrity(format!(
                    "Failed to parse {}: {}",
                    path.display(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

/// Decompress a catalog and collect its declared count and package ids
pub fn read_catalog(path: &Path) -> Result<CatalogSummary> {
    let decoder = GzDecoder::new(BufReader::new(File::open(path)?));
    let mut reader = Reader::from_reader(BufReader::new(decoder));
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut summary = CatalogSummary::default();
    let mut depth = 0usize;
    let mut in_checksum = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                depth += 1;
                match (depth, e.name().as_ref()) {
                    (1, name) => {
                        summary.root = String::from_utf8_lossy(name).to_string();
                        summary.declared = attribute(&e, b"packages")
                            .and_then(|v| v.parse().ok())
                            .ok_or_else(|| {
                                Error::Integrity(format!(
                                    "{} has no valid packages attribute",
                                    path.display()
                                ))
                            })?;
                    }
                    (2, b"package") => {
                        // filelists and other carry the id as an attribute
                        if let Some(pkgid) = attribute(&e, b"pkgid") {
                            summary.pkgids.push(pkgid);
                        }
                    }
                    (3, b"checksum") => in_checksum = true,
                    _ => {}
                }
            }
            Ok(Event::Text(e)) if in_checksum => {
                summary.pkgids.push(e.unescape().unwrap_or_default().to_string());
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
                in_checksum = false;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::Integrity(format!(
                    "Failed to parse {}: {}",
                    path.display(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(summary)
}

/// Check a metadata directory against its own manifest
///
/// Returns the package count shared by all catalogs.
pub fn verify_metadata_dir(dir: &Path, algorithm: ChecksumType) -> Result<usize> {
    let entries = read_manifest(&dir.join(MANIFEST_FILE))?;
    let mut count: Option<usize> = None;

    for entry in &entries {
        let name = Path::new(&entry.href).file_name().ok_or_else(|| {
            Error::Integrity(format!("manifest entry {} has no location", entry.role))
        })?;
        let path = dir.join(name);
        if !path.is_file() {
            return Err(Error::Integrity(format!(
                "{} referenced by the manifest is missing",
                path.display()
            )));
        }

        let stored = digest_file(algorithm, &path)?;
        if stored.value != entry.checksum {
            return Err(Error::Integrity(format!(
                "checksum mismatch for {}",
                path.display()
            )));
        }

        let Some(expected_open) = &entry.open_checksum else {
            continue;
        };

        let mut decoder = GzDecoder::new(BufReader::new(File::open(&path)?));
        let open = digest_reader(algorithm, &mut decoder, &path)
            .map_err(|e| Error::Integrity(e.to_string()))?;
        if &open.value != expected_open {
            return Err(Error::Integrity(format!(
                "open checksum mismatch for {}",
                path.display()
            )));
        }

        let summary = read_catalog(&path)?;
        if summary.declared != summary.records() {
            return Err(Error::Integrity(format!(
                "{} declares {} packages but holds {}",
                path.display(),
                summary.declared,
                summary.records()
            )));
        }

        match count {
            Some(n) if n != summary.declared => {
                return Err(Error::Integrity(format!(
                    "{} declares {} packages, other catalogs declare {}",
                    path.display(),
                    summary.declared,
                    n
                )))
            }
            _ => count = Some(summary.declared),
        }
    }

    let count = count.ok_or_else(|| {
        Error::Integrity(format!("{} references no catalogs", dir.display()))
    })?;
    debug!("Verified {}: {} packages", dir.display(), count);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepoConfig;
    use crate::repository::manifest::ManifestBuilder;
    use crate::repository::nodes::{FilelistRecord, OtherRecord, PackageIdentity, PrimaryRecord};
    use crate::repository::writer::CatalogWriter;

    fn identity(pkgid: &str) -> PackageIdentity {
        PackageIdentity {
            pkgid: pkgid.to_string(),
            name: "foo".to_string(),
            arch: "noarch".to_string(),
            epoch: "0".to_string(),
            version: "1.0".to_string(),
            release: "1".to_string(),
        }
    }

    fn write_set(dir: &Path, pkgids: &[&str]) {
        let config = RepoConfig::new(dir);
        let mut filelists =
            CatalogWriter::<FilelistRecord>::open(dir, pkgids.len(), false).unwrap();
        let mut other = CatalogWriter::<OtherRecord>::open(dir, pkgids.len(), true).unwrap();
        let primary = CatalogWriter::<PrimaryRecord>::open(dir, 0, false).unwrap();
        for id in pkgids {
            filelists
                .append(&FilelistRecord {
                    identity: identity(id),
                    files: Vec::new(),
                })
                .unwrap();
            other
                .append(&OtherRecord {
                    identity: identity(id),
                    changelog: Vec::new(),
                })
                .unwrap();
        }
        let catalogs = vec![
            primary.seal().unwrap(),
            filelists.seal().unwrap(),
            other.seal().unwrap(),
        ];
        ManifestBuilder::new(&config)
            .build(dir, &catalogs)
            .unwrap()
            .write(dir)
            .unwrap();
    }

    #[test]
    fn test_read_catalog_counts_records() {
        let dir = tempfile::tempdir().unwrap();
        write_set(dir.path(), &["aaa", "bbb"]);

        let summary = read_catalog(&dir.path().join("other.xml.gz")).unwrap();
        assert_eq!(summary.root, "otherdata");
        assert_eq!(summary.declared, 2);
        assert_eq!(summary.pkgids, vec!["aaa", "bbb"]);
    }

    #[test]
    fn test_read_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write_set(dir.path(), &["aaa"]);

        let entries = read_manifest(&dir.path().join(MANIFEST_FILE)).unwrap();
        let roles: Vec<_> = entries.iter().map(|e| e.role.as_str()).collect();
        assert_eq!(roles, vec!["primary", "filelists", "other"]);
        assert_eq!(entries[1].href, "repodata/filelists.xml.gz");
        assert_eq!(entries[1].checksum_type, "sha256");
        assert_eq!(entries[1].checksum.len(), 64);
        assert!(entries.iter().all(|e| e.open_checksum.is_some()));
    }

    #[test]
    fn test_verify_detects_inconsistent_counts() {
        let dir = tempfile::tempdir().unwrap();
        write_set(dir.path(), &["aaa"]);

        // primary was written with 0 records, the others with 1
        let err = verify_metadata_dir(dir.path(), ChecksumType::Sha256).unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
    }

    #[test]
    fn test_verify_empty_repository() {
        let dir = tempfile::tempdir().unwrap();
        write_set(dir.path(), &[]);
        assert_eq!(verify_metadata_dir(dir.path(), ChecksumType::Sha256).unwrap(), 0);
    }

    #[test]
    fn test_verify_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        write_set(dir.path(), &[]);
        std::fs::write(dir.path().join("other.xml.gz"), b"tampered").unwrap();

        assert!(matches!(
            verify_metadata_dir(dir.path(), ChecksumType::Sha256),
            Err(Error::Integrity(_))
        ));
    }
}
