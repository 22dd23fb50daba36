// src/repository/manifest.rs

//! Top-level repository manifest (repomd.xml)
//!
//! The manifest references every sealed catalog by location, checksum of
//! the stored bytes, checksum of the decompressed content and modification
//! time. An optional group file is copied verbatim next to the catalogs and
//! gets its own entry, without an open checksum.

use crate::checksum::{digest_file, digest_reader, Checksum};
use crate::config::{RepoConfig, FINAL_DIR};
use crate::error::{ChecksumError, Error, Result};
use crate::repository::patterns::PatternSet;
use crate::repository::writer::{CatalogRole, SealedCatalog};
use flate2::read::GzDecoder;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info};

/// File name of the manifest inside the metadata directory
pub const MANIFEST_FILE: &str = "repomd.xml";

const REPO_NS: &str = "http://linux.duke.edu/metadata/repo";

/// What a manifest entry points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryRole {
    Primary,
    Filelists,
    Other,
    Group,
}

impl EntryRole {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Filelists => "filelists",
            Self::Other => "other",
            Self::Group => "group",
        }
    }
}

impl From<CatalogRole> for EntryRole {
    fn from(role: CatalogRole) -> Self {
        match role {
            CatalogRole::Primary => Self::Primary,
            CatalogRole::Filelists => Self::Filelists,
            CatalogRole::Other => Self::Other,
        }
    }
}

/// One `data` element of the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub role: EntryRole,
    /// Location relative to the repository root
    pub location: String,
    /// Checksum of the bytes as stored
    pub checksum: Checksum,
    /// Checksum of the decompressed content; catalogs only
    pub open_checksum: Option<Checksum>,
    /// Modification time, seconds since the epoch
    pub timestamp: u64,
    /// Active patterns; primary entry only, when annotation is enabled
    pub patterns: Option<PatternSet>,
}

/// The manifest of one build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestDocument {
    /// Build time, seconds since the epoch
    pub revision: i64,
    pub base_url: Option<String>,
    pub entries: Vec<ManifestEntry>,
}

impl ManifestDocument {
    pub fn entry(&self, role: EntryRole) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.role == role)
    }

    /// Serialize the manifest into any writer
    pub fn write_to<W: Write>(&self, out: W) -> Result<()> {
        let mut writer = Writer::new_with_indent(out, b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::Start(
            BytesStart::new("repomd").with_attributes([("xmlns", REPO_NS)]),
        ))?;

        text_element(&mut writer, BytesStart::new("revision"), &self.revision.to_string())?;

        for entry in &self.entries {
            self.write_entry(&mut writer, entry)?;
        }

        writer.write_event(Event::End(BytesEnd::new("repomd")))?;
        writer.get_mut().write_all(b"\n")?;
        Ok(())
    }

    fn write_entry<W: Write>(&self, writer: &mut Writer<W>, entry: &ManifestEntry) -> Result<()> {
        writer.write_event(Event::Start(
            BytesStart::new("data").with_attributes([("type", entry.role.name())]),
        ))?;

        let mut location = BytesStart::new("location");
        if let Some(base) = &self.base_url {
            location.push_attribute(("xml:base", base.as_str()));
        }
        location.push_attribute(("href", entry.location.as_str()));
        writer.write_event(Event::Empty(location))?;

        text_element(
            writer,
            BytesStart::new("checksum")
                .with_attributes([("type", entry.checksum.algorithm.name())]),
            &entry.checksum.value,
        )?;
        text_element(writer, BytesStart::new("timestamp"), &entry.timestamp.to_string())?;

        if let Some(open) = &entry.open_checksum {
            text_element(
                writer,
                BytesStart::new("open-checksum").with_attributes([("type", open.algorithm.name())]),
                &open.value,
            )?;
        }

        if let Some(patterns) = &entry.patterns {
            writer.write_event(Event::Start(BytesStart::new("patterns")))?;
            for pattern in &patterns.files {
                text_element(writer, BytesStart::new("file"), pattern)?;
            }
            for pattern in &patterns.dirs {
                text_element(writer, BytesStart::new("dir"), pattern)?;
            }
            writer.write_event(Event::End(BytesEnd::new("patterns")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("data")))?;
        Ok(())
    }

    /// Write `repomd.xml` into `dir` and flush it to disk
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MANIFEST_FILE);
        let mut out = BufWriter::new(File::create(&path)?);
        self.write_to(&mut out)?;
        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        info!("Wrote manifest with {} entries", self.entries.len());
        Ok(path)
    }
}

fn text_element<W: Write>(writer: &mut Writer<W>, start: BytesStart<'_>, text: &str) -> Result<()> {
    let end = BytesEnd::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    writer.write_event(Event::Start(start))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(end))?;
    Ok(())
}

fn modified_secs(path: &Path) -> Result<u64> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0))
}

/// Builds the manifest over the sealed catalogs of one build
pub struct ManifestBuilder<'a> {
    config: &'a RepoConfig,
    patterns: Option<&'a PatternSet>,
}

impl<'a> ManifestBuilder<'a> {
    pub fn new(config: &'a RepoConfig) -> Self {
        Self {
            config,
            patterns: None,
        }
    }

    /// Attach the active pattern set to the primary entry
    pub fn with_patterns(mut self, patterns: &'a PatternSet) -> Self {
        self.patterns = Some(patterns);
        self
    }

    /// Checksum the decompressed content of a sealed catalog
    ///
    /// A document that does not decompress cleanly was not fully written.
    fn open_checksum(&self, path: &Path) -> Result<Checksum> {
        let file = File::open(path)?;
        let mut decoder = GzDecoder::new(BufReader::new(file));
        digest_reader(self.config.checksum, &mut decoder, path).map_err(|e| match e {
            ChecksumError::Io { path, source } => Error::Integrity(format!(
                "{} does not decompress cleanly: {}",
                path.display(),
                source
            )),
            other => other.into(),
        })
    }

    fn catalog_entry(&self, catalog: &SealedCatalog) -> Result<ManifestEntry> {
        let checksum = digest_file(self.config.checksum, &catalog.path)?;
        let open_checksum = self.open_checksum(&catalog.path)?;
        let patterns = match catalog.role {
            CatalogRole::Primary => self.patterns.cloned(),
            _ => None,
        };

        debug!(
            "{}: checksum {}, open checksum {}",
            catalog.role, checksum.value, open_checksum.value
        );

        Ok(ManifestEntry {
            role: catalog.role.into(),
            location: format!("{}/{}", FINAL_DIR, catalog.role.file_name()),
            checksum,
            open_checksum: Some(open_checksum),
            timestamp: modified_secs(&catalog.path)?,
            patterns,
        })
    }

    /// Copy the group file into `staging` and describe it
    fn group_entry(&self, group: &Path, staging: &Path) -> Result<ManifestEntry> {
        let name = group.file_name().ok_or_else(|| {
            Error::Config(format!("group file {} has no file name", group.display()))
        })?;
        let staged = staging.join(name);
        fs::copy(group, &staged)?;

        let checksum = digest_file(self.config.checksum, &staged)?;
        debug!("group: {} -> {}", group.display(), checksum.value);

        Ok(ManifestEntry {
            role: EntryRole::Group,
            location: format!("{}/{}", FINAL_DIR, name.to_string_lossy()),
            checksum,
            open_checksum: None,
            timestamp: modified_secs(&staged)?,
            patterns: None,
        })
    }

    /// Describe the sealed catalogs (and the group file, if configured)
    ///
    /// Entries come out in fixed role order with the group file last,
    /// whatever order the catalogs are passed in.
    pub fn build(&self, staging: &Path, catalogs: &[SealedCatalog]) -> Result<ManifestDocument> {
        let mut entries = Vec::with_capacity(CatalogRole::ALL.len() + 1);
        for role in CatalogRole::ALL {
            let catalog = catalogs.iter().find(|c| c.role == role).ok_or_else(|| {
                Error::Integrity(format!("{} catalog was not written", role))
            })?;
            entries.push(self.catalog_entry(catalog)?);
        }

        if let Some(group) = &self.config.group_file {
            entries.push(self.group_entry(group, staging)?);
        }

        Ok(ManifestDocument {
            revision: chrono::Utc::now().timestamp(),
            base_url: self.config.base_url.clone(),
            entries,
        })
    }
}
