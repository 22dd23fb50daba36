// src/repository/writer.rs

//! Streaming catalog documents
//!
//! A catalog is written as one gzip stream: XML declaration and root element
//! with the declared package count, then one `package` element per appended
//! record, then the closing root tag. Records go straight through the
//! compressor so only one record is held in memory at a time.
//!
//! The gzip header is pinned (mtime 0, OS byte 255, no file name, fixed
//! compression level) so an unchanged repository yields identical bytes.

use crate::error::{Error, Result};
use crate::repository::nodes::CatalogRecord;
use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Gzip OS byte for "unknown"
const GZIP_OS_UNKNOWN: u8 = 255;

const COMMON_NS: &str = "http://linux.duke.edu/metadata/common";
const RPM_NS: &str = "http://linux.duke.edu/metadata/rpm";
const FILELISTS_NS: &str = "http://linux.duke.edu/metadata/filelists";
const OTHER_NS: &str = "http://linux.duke.edu/metadata/other";

/// The three catalog documents of a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogRole {
    Primary,
    Filelists,
    Other,
}

impl CatalogRole {
    /// Fixed processing order of the roles
    pub const ALL: [CatalogRole; 3] = [Self::Primary, Self::Filelists, Self::Other];

    /// Role tag used as the manifest `type`
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Filelists => "filelists",
            Self::Other => "other",
        }
    }

    /// File name of the compressed document
    pub const fn file_name(&self) -> &'static str {
        match self {
            Self::Primary => "primary.xml.gz",
            Self::Filelists => "filelists.xml.gz",
            Self::Other => "other.xml.gz",
        }
    }

    /// Root element name
    pub const fn root_element(&self) -> &'static str {
        match self {
            Self::Primary => "metadata",
            Self::Filelists => "filelists",
            Self::Other => "otherdata",
        }
    }

    /// Namespace declarations of the root element
    pub fn namespaces(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Primary => &[("xmlns", COMMON_NS), ("xmlns:rpm", RPM_NS)],
            Self::Filelists => &[("xmlns", FILELISTS_NS)],
            Self::Other => &[("xmlns", OTHER_NS)],
        }
    }
}

impl fmt::Display for CatalogRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A catalog document that has been sealed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedCatalog {
    pub role: CatalogRole,
    pub path: PathBuf,
    pub count: usize,
}

/// Append-only writer for one catalog document
///
/// The record type fixes the role, so a primary record can never land in
/// the filelists document.
pub struct CatalogWriter<R: CatalogRecord> {
    path: PathBuf,
    declared: usize,
    appended: usize,
    pretty: bool,
    writer: Writer<GzEncoder<BufWriter<File>>>,
    _record: PhantomData<fn(&R)>,
}

impl<R: CatalogRecord> CatalogWriter<R> {
    /// Create the document in `dir` and write its header
    pub fn open(dir: &Path, declared: usize, pretty: bool) -> Result<Self> {
        let role = R::ROLE;
        let path = dir.join(role.file_name());
        let file = File::create(&path)?;

        let encoder = GzBuilder::new()
            .mtime(0)
            .operating_system(GZIP_OS_UNKNOWN)
            .write(BufWriter::new(file), Compression::best());

        let mut writer = if pretty {
            Writer::new_with_indent(encoder, b' ', 2)
        } else {
            Writer::new(encoder)
        };

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        if !pretty {
            writer.get_mut().write_all(b"\n")?;
        }

        let count = declared.to_string();
        let mut root = BytesStart::new(role.root_element());
        for &(key, value) in role.namespaces() {
            root.push_attribute((key, value));
        }
        root.push_attribute(("packages", count.as_str()));
        writer.write_event(Event::Start(root))?;
        if !pretty {
            writer.get_mut().write_all(b"\n")?;
        }

        debug!("Opened {} catalog, {} packages declared", role, declared);

        Ok(Self {
            path,
            declared,
            appended: 0,
            pretty,
            writer,
            _record: PhantomData,
        })
    }

    /// Records appended so far
    pub fn appended(&self) -> usize {
        self.appended
    }

    /// Serialize and append one record
    pub fn append(&mut self, record: &R) -> Result<()> {
        if self.appended >= self.declared {
            return Err(Error::Integrity(format!(
                "{} catalog declares {} packages, refusing record {}",
                R::ROLE,
                self.declared,
                record.pkgid()
            )));
        }

        record.write_xml(&mut self.writer)?;
        if !self.pretty {
            self.writer.get_mut().write_all(b"\n")?;
        }
        self.appended += 1;
        Ok(())
    }

    /// Write the footer, finish compression and flush to disk
    ///
    /// Fails if the number of appended records differs from the count
    /// declared in the header.
    pub fn seal(mut self) -> Result<SealedCatalog> {
        let role = R::ROLE;
        if self.appended != self.declared {
            return Err(Error::Integrity(format!(
                "{} catalog declares {} packages but {} were appended",
                role, self.declared, self.appended
            )));
        }

        self.writer
            .write_event(Event::End(BytesEnd::new(role.root_element())))?;
        self.writer.get_mut().write_all(b"\n")?;

        let buffered = self.writer.into_inner().finish()?;
        let file = buffered.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        debug!("Sealed {} catalog with {} packages", role, self.appended);

        Ok(SealedCatalog {
            role,
            path: self.path,
            count: self.appended,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::{FileKind, PackageFile};
    use crate::repository::nodes::{FilelistRecord, OtherRecord, PackageIdentity};
    use flate2::read::GzDecoder;
    use std::io::Read;

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

    fn filelist(pkgid: &str) -> FilelistRecord {
        FilelistRecord {
            identity: identity(pkgid),
            files: vec![PackageFile::new("/usr/bin/foo", FileKind::File)],
        }
    }

    fn decompress(path: &Path) -> String {
        let mut out = String::new();
        GzDecoder::new(File::open(path).unwrap())
            .read_to_string(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_document_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = CatalogWriter::<FilelistRecord>::open(dir.path(), 2, false).unwrap();
        writer.append(&filelist("aaa")).unwrap();
        writer.append(&filelist("bbb")).unwrap();
        let sealed = writer.seal().unwrap();

        assert_eq!(sealed.role, CatalogRole::Filelists);
        assert_eq!(sealed.count, 2);
        assert_eq!(sealed.path, dir.path().join("filelists.xml.gz"));

        let xml = decompress(&sealed.path);
        let lines: Vec<_> = xml.lines().collect();
        assert_eq!(lines[0], r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        assert_eq!(
            lines[1],
            r#"<filelists xmlns="http://linux.duke.edu/metadata/filelists" packages="2">"#
        );
        assert!(lines[2].starts_with(r#"<package pkgid="aaa""#));
        assert!(lines[3].starts_with(r#"<package pkgid="bbb""#));
        assert_eq!(lines[4], "</filelists>");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_gzip_header_is_pinned() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CatalogWriter::<OtherRecord>::open(dir.path(), 0, false).unwrap();
        let sealed = writer.seal().unwrap();

        let bytes = std::fs::read(&sealed.path).unwrap();
        // magic, deflate, no flags, mtime 0, best-compression xfl, OS unknown
        assert_eq!(&bytes[..10], &[0x1f, 0x8b, 8, 0, 0, 0, 0, 0, 2, 255]);
    }

    #[test]
    fn test_identical_content_identical_bytes() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        for dir in [first.path(), second.path()] {
            let mut writer = CatalogWriter::<FilelistRecord>::open(dir, 1, true).unwrap();
            writer.append(&filelist("aaa")).unwrap();
            writer.seal().unwrap();
        }

        let a = std::fs::read(first.path().join("filelists.xml.gz")).unwrap();
        let b = std::fs::read(second.path().join("filelists.xml.gz")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_count_mismatch_is_integrity_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = CatalogWriter::<FilelistRecord>::open(dir.path(), 2, false).unwrap();
        writer.append(&filelist("aaa")).unwrap();
        assert!(matches!(writer.seal(), Err(Error::Integrity(_))));

        let mut writer = CatalogWriter::<FilelistRecord>::open(dir.path(), 1, false).unwrap();
        writer.append(&filelist("aaa")).unwrap();
        assert!(matches!(
            writer.append(&filelist("bbb")),
            Err(Error::Integrity(_))
        ));
        assert_eq!(writer.appended(), 1);
    }

    #[test]
    fn test_pretty_output_is_indented() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = CatalogWriter::<FilelistRecord>::open(dir.path(), 1, true).unwrap();
        writer.append(&filelist("aaa")).unwrap();
        let sealed = writer.seal().unwrap();

        let xml = decompress(&sealed.path);
        assert!(xml.contains("\n  <package pkgid=\"aaa\""));
        assert!(xml.contains("\n    <file>/usr/bin/foo</file>"));
        assert!(xml.ends_with("</filelists>\n"));
    }
}
