// src/repository/nodes.rs

//! Catalog records for one package
//!
//! Every package contributes one record to each of the three catalogs:
//! primary (summary, capabilities, essential files), filelists (every file)
//! and other (changelog). The three records share the package checksum as
//! their identity.

use crate::checksum::Checksum;
use crate::error::{Error, Result};
use crate::packages::traits::sense;
use crate::packages::{
    ChangelogEntry, Dependency, FileKind, PackageFile, PackageHeader, PackageSizes,
};
use crate::repository::patterns::PatternMatcher;
use crate::repository::writer::CatalogRole;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Write;
use std::path::PathBuf;

/// A package ready for catalog building: header plus checksum
#[derive(Debug, Clone)]
pub struct PackageRecord {
    /// Package file on disk
    pub path: PathBuf,
    /// Location relative to the repository root, `/`-separated
    pub location: String,
    pub checksum: Checksum,
    pub header: PackageHeader,
}

/// Identity shared by the three records of one package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageIdentity {
    /// Package checksum value
    pub pkgid: String,
    pub name: String,
    pub arch: String,
    pub epoch: String,
    pub version: String,
    pub release: String,
}

impl PackageIdentity {
    /// `name-epoch:version-release.arch`
    pub fn nevra(&self) -> String {
        format!(
            "{}-{}:{}-{}.{}",
            self.name, self.epoch, self.version, self.release, self.arch
        )
    }

    fn write_version<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        let version = BytesStart::new("version").with_attributes([
            ("epoch", self.epoch.as_str()),
            ("ver", self.version.as_str()),
            ("rel", self.release.as_str()),
        ]);
        writer.write_event(Event::Empty(version))?;
        Ok(())
    }

    /// Opening `package` element of the filelists and other catalogs
    fn start_element(&self) -> BytesStart<'_> {
        BytesStart::new("package").with_attributes([
            ("pkgid", self.pkgid.as_str()),
            ("name", self.name.as_str()),
            ("arch", self.arch.as_str()),
        ])
    }
}

/// A dependency entry as rendered in the primary catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEntry {
    pub name: String,
    pub flags: Option<&'static str>,
    /// (epoch, version, release); release may be empty
    pub evr: Option<(String, String, String)>,
    pub pre: bool,
}

/// Comparison flags as written in the catalog
fn flag_name(flags: u32) -> Option<&'static str> {
    match flags & sense::COMPARE_MASK {
        f if f == sense::EQUAL => Some("EQ"),
        f if f == sense::LESS => Some("LT"),
        f if f == sense::GREATER => Some("GT"),
        f if f == sense::LESS | sense::EQUAL => Some("LE"),
        f if f == sense::GREATER | sense::EQUAL => Some("GE"),
        _ => None,
    }
}

/// Split `[epoch:]version[-release]`; epoch defaults to "0"
pub fn split_evr(evr: &str) -> (String, String, String) {
    let (epoch, rest) = match evr.find(':') {
        Some(i) => (&evr[..i], &evr[i + 1..]),
        None => ("0", evr),
    };
    match rest.find('-') {
        Some(j) => (epoch.to_string(), rest[..j].to_string(), rest[j + 1..].to_string()),
        None => (epoch.to_string(), rest.to_string(), String::new()),
    }
}

/// Drop duplicate capabilities and order them for stable output
///
/// Flags are compared on their comparison and pre-requirement bits only.
fn dependency_entries(deps: &[Dependency], is_requires: bool) -> Vec<DependencyEntry> {
    let mut unique: Vec<(String, u32, String)> = deps
        .iter()
        .map(|d| {
            (
                clean_text(&d.name),
                d.flags & (sense::COMPARE_MASK | sense::PREREQ),
                clean_text(&d.version),
            )
        })
        .collect();
    unique.sort();
    unique.dedup();

    unique
        .into_iter()
        .map(|(name, flags, version)| DependencyEntry {
            name,
            flags: flag_name(flags),
            evr: (!version.is_empty()).then(|| split_evr(&version)),
            pre: is_requires && flags & sense::PREREQ != 0,
        })
        .collect()
}

/// Regular files, then directories, then ghosts; each group sorted
fn ordered_files<'a>(files: impl Iterator<Item = &'a PackageFile>) -> Vec<PackageFile> {
    let mut ordered: Vec<PackageFile> = files.cloned().collect();
    ordered.sort_by(|a, b| {
        let rank = |kind: FileKind| match kind {
            FileKind::File => 0,
            FileKind::Dir => 1,
            FileKind::Ghost => 2,
        };
        rank(a.kind).cmp(&rank(b.kind)).then_with(|| a.path.cmp(&b.path))
    });
    ordered
}

/// Strip characters XML 1.0 cannot carry
fn clean_text(text: &str) -> String {
    text.trim_end_matches('\n')
        .chars()
        .map(|c| match c {
            '\t' | '\n' | '\r' => c,
            c if (c as u32) < 0x20 || c == '\u{fffe}' || c == '\u{ffff}' => '?',
            c => c,
        })
        .collect()
}

fn write_text<W: Write>(writer: &mut Writer<W>, start: BytesStart<'_>, text: &str) -> Result<()> {
    let end = BytesEnd::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    let cleaned = clean_text(text);
    writer.write_event(Event::Start(start))?;
    writer.write_event(Event::Text(BytesText::new(&cleaned)))?;
    writer.write_event(Event::End(end))?;
    Ok(())
}

fn write_files<W: Write>(writer: &mut Writer<W>, files: &[PackageFile]) -> Result<()> {
    for file in files {
        let start = match file.kind {
            FileKind::File => BytesStart::new("file"),
            FileKind::Dir => BytesStart::new("file").with_attributes([("type", "dir")]),
            FileKind::Ghost => BytesStart::new("file").with_attributes([("type", "ghost")]),
        };
        write_text(writer, start, &file.path)?;
    }
    Ok(())
}

/// A record that can be appended to a catalog document
pub trait CatalogRecord {
    /// Catalog this record belongs to
    const ROLE: CatalogRole;

    /// Checksum identifying the package
    fn pkgid(&self) -> &str;

    /// Serialize the record as one `package` element
    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<()>;
}

/// Record of the primary catalog
#[derive(Debug, Clone)]
pub struct PrimaryRecord {
    pub identity: PackageIdentity,
    pub checksum_type: &'static str,
    pub summary: String,
    pub description: String,
    pub packager: String,
    pub url: String,
    pub file_time: u64,
    pub build_time: u64,
    pub sizes: PackageSizes,
    pub location: String,
    pub license: String,
    pub vendor: String,
    pub group: String,
    pub build_host: String,
    pub source_rpm: String,
    pub header_range: (u64, u64),
    pub provides: Vec<DependencyEntry>,
    pub conflicts: Vec<DependencyEntry>,
    pub obsoletes: Vec<DependencyEntry>,
    pub requires: Vec<DependencyEntry>,
    /// Entries selected by the active pattern set
    pub files: Vec<PackageFile>,
}

fn write_dependencies<W: Write>(
    writer: &mut Writer<W>,
    tag: &str,
    entries: &[DependencyEntry],
) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }

    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    for entry in entries {
        let mut element = BytesStart::new("rpm:entry");
        element.push_attribute(("name", entry.name.as_str()));
        if let Some(flags) = entry.flags {
            element.push_attribute(("flags", flags));
        }
        if let Some((epoch, ver, rel)) = &entry.evr {
            element.push_attribute(("epoch", epoch.as_str()));
            element.push_attribute(("ver", ver.as_str()));
            if !rel.is_empty() {
                element.push_attribute(("rel", rel.as_str()));
            }
        }
        if entry.pre {
            element.push_attribute(("pre", "1"));
        }
        writer.write_event(Event::Empty(element))?;
    }
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

impl CatalogRecord for PrimaryRecord {
    const ROLE: CatalogRole = CatalogRole::Primary;

    fn pkgid(&self) -> &str {
        &self.identity.pkgid
    }

    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        let id = &self.identity;
        writer.write_event(Event::Start(
            BytesStart::new("package").with_attributes([("type", "rpm")]),
        ))?;
        write_text(writer, BytesStart::new("name"), &id.name)?;
        write_text(writer, BytesStart::new("arch"), &id.arch)?;
        id.write_version(writer)?;
        write_text(
            writer,
            BytesStart::new("checksum")
                .with_attributes([("type", self.checksum_type), ("pkgid", "YES")]),
            &id.pkgid,
        )?;
        write_text(writer, BytesStart::new("summary"), &self.summary)?;
        write_text(writer, BytesStart::new("description"), &self.description)?;
        write_text(writer, BytesStart::new("packager"), &self.packager)?;
        write_text(writer, BytesStart::new("url"), &self.url)?;

        let file_time = self.file_time.to_string();
        let build_time = self.build_time.to_string();
        writer.write_event(Event::Empty(BytesStart::new("time").with_attributes([
            ("file", file_time.as_str()),
            ("build", build_time.as_str()),
        ])))?;

        let package = self.sizes.package.to_string();
        let installed = self.sizes.installed.to_string();
        let archive = self.sizes.archive.to_string();
        writer.write_event(Event::Empty(BytesStart::new("size").with_attributes([
            ("package", package.as_str()),
            ("installed", installed.as_str()),
            ("archive", archive.as_str()),
        ])))?;

        writer.write_event(Event::Empty(
            BytesStart::new("location").with_attributes([("href", self.location.as_str())]),
        ))?;

        writer.write_event(Event::Start(BytesStart::new("format")))?;
        write_text(writer, BytesStart::new("rpm:license"), &self.license)?;
        write_text(writer, BytesStart::new("rpm:vendor"), &self.vendor)?;
        write_text(writer, BytesStart::new("rpm:group"), &self.group)?;
        write_text(writer, BytesStart::new("rpm:buildhost"), &self.build_host)?;
        write_text(writer, BytesStart::new("rpm:sourcerpm"), &self.source_rpm)?;

        let start = self.header_range.0.to_string();
        let end = self.header_range.1.to_string();
        writer.write_event(Event::Empty(
            BytesStart::new("rpm:header-range")
                .with_attributes([("start", start.as_str()), ("end", end.as_str())]),
        ))?;

        write_dependencies(writer, "rpm:provides", &self.provides)?;
        write_dependencies(writer, "rpm:conflicts", &self.conflicts)?;
        write_dependencies(writer, "rpm:obsoletes", &self.obsoletes)?;
        write_dependencies(writer, "rpm:requires", &self.requires)?;
        write_files(writer, &self.files)?;
        writer.write_event(Event::End(BytesEnd::new("format")))?;

        writer.write_event(Event::End(BytesEnd::new("package")))?;
        Ok(())
    }
}

/// Record of the filelists catalog
#[derive(Debug, Clone)]
pub struct FilelistRecord {
    pub identity: PackageIdentity,
    pub files: Vec<PackageFile>,
}

impl CatalogRecord for FilelistRecord {
    const ROLE: CatalogRole = CatalogRole::Filelists;

    fn pkgid(&self) -> &str {
        &self.identity.pkgid
    }

    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        writer.write_event(Event::Start(self.identity.start_element()))?;
        self.identity.write_version(writer)?;
        write_files(writer, &self.files)?;
        writer.write_event(Event::End(BytesEnd::new("package")))?;
        Ok(())
    }
}

/// Record of the other (changelog) catalog
#[derive(Debug, Clone)]
pub struct OtherRecord {
    pub identity: PackageIdentity,
    pub changelog: Vec<ChangelogEntry>,
}

impl CatalogRecord for OtherRecord {
    const ROLE: CatalogRole = CatalogRole::Other;

    fn pkgid(&self) -> &str {
        &self.identity.pkgid
    }

    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        writer.write_event(Event::Start(self.identity.start_element()))?;
        self.identity.write_version(writer)?;
        for entry in &self.changelog {
            let author = clean_text(&entry.author);
            let date = entry.timestamp.to_string();
            let start = BytesStart::new("changelog")
                .with_attributes([("author", author.as_str()), ("date", date.as_str())]);
            write_text(writer, start, &entry.text)?;
        }
        writer.write_event(Event::End(BytesEnd::new("package")))?;
        Ok(())
    }
}

/// The three records of one package
#[derive(Debug, Clone)]
pub struct CatalogRecords {
    pub primary: PrimaryRecord,
    pub filelist: FilelistRecord,
    pub other: OtherRecord,
}

/// Builds catalog records from package headers
pub struct CatalogNodeBuilder<'a> {
    matcher: &'a PatternMatcher,
}

fn required<'h>(record: &PackageRecord, value: &'h Option<String>, field: &str) -> Result<&'h str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            Error::package_read(
                &record.path,
                format!("missing mandatory header field: {}", field),
            )
        })
}

impl<'a> CatalogNodeBuilder<'a> {
    pub fn new(matcher: &'a PatternMatcher) -> Self {
        Self { matcher }
    }

    /// Check that the header carries every identity field
    ///
    /// Identity values end up in attributes, so they are cleaned like text.
    pub fn identity(record: &PackageRecord) -> Result<PackageIdentity> {
        let header = &record.header;
        Ok(PackageIdentity {
            pkgid: record.checksum.value.clone(),
            name: clean_text(required(record, &header.name, "name")?),
            arch: clean_text(required(record, &header.arch, "arch")?),
            epoch: header.epoch.unwrap_or(0).to_string(),
            version: clean_text(required(record, &header.version, "version")?),
            release: clean_text(required(record, &header.release, "release")?),
        })
    }

    /// Produce the primary, filelists and other records of one package
    pub fn build(&self, record: &PackageRecord) -> Result<CatalogRecords> {
        let identity = Self::identity(record)?;
        let header = &record.header;
        let text = |value: &Option<String>| value.clone().unwrap_or_default();

        let primary = PrimaryRecord {
            identity: identity.clone(),
            checksum_type: record.checksum.algorithm.name(),
            summary: text(&header.summary),
            description: text(&header.description),
            packager: text(&header.packager),
            url: text(&header.url),
            file_time: header.file_time,
            build_time: header.build_time,
            sizes: header.sizes,
            location: clean_text(&record.location),
            license: text(&header.license),
            vendor: text(&header.vendor),
            group: text(&header.group),
            build_host: text(&header.build_host),
            source_rpm: text(&header.source_rpm),
            header_range: header.header_range,
            provides: dependency_entries(&header.provides, false),
            conflicts: dependency_entries(&header.conflicts, false),
            obsoletes: dependency_entries(&header.obsoletes, false),
            requires: dependency_entries(&header.requires, true),
            files: ordered_files(header.files.iter().filter(|f| self.matcher.keeps(f))),
        };

        let filelist = FilelistRecord {
            identity: identity.clone(),
            files: ordered_files(header.files.iter()),
        };

        let other = OtherRecord {
            identity,
            changelog: header.changelog.clone(),
        };

        Ok(CatalogRecords {
            primary,
            filelist,
            other,
        })
    }
}
