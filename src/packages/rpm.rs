// src/packages/rpm.rs

//! RPM package header reader

use crate::error::{Error, Result};
use crate::packages::traits::{
    ChangelogEntry, Dependency, FileKind, PackageFile, PackageHeader, PackageReader, PackageSizes,
};
use rpm::{FileFlags, PackageMetadata};
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::debug;

/// Size of the fixed RPM lead
const LEAD_SIZE: u64 = 96;

/// Magic bytes opening every header structure
const HEADER_MAGIC: [u8; 3] = [0x8e, 0xad, 0xe8];

/// Upper bounds that reject corrupt index counts before allocating
const MAX_INDEX_ENTRIES: u32 = 0x10000;
const MAX_HEADER_STORE: u32 = 256 * 1024 * 1024;

const RPMTAG_LONGARCHIVESIZE: u32 = 271;
const RPMTAG_ARCHIVESIZE: u32 = 1046;
const RPM_INT32_TYPE: u32 = 4;
const RPM_INT64_TYPE: u32 = 5;

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;

/// Reads package headers with the `rpm` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct RpmReader;

impl RpmReader {
    pub fn new() -> Self {
        Self
    }

    /// Extract file list with kind classification
    fn extract_files(metadata: &PackageMetadata) -> Vec<PackageFile> {
        let mut files = Vec::new();

        if let Ok(entries) = metadata.get_file_entries() {
            for entry in entries {
                let raw_mode = entry.mode.raw_mode() as u32;
                let kind = if raw_mode & S_IFMT == S_IFDIR {
                    FileKind::Dir
                } else if entry.flags.contains(FileFlags::GHOST) {
                    FileKind::Ghost
                } else {
                    FileKind::File
                };

                files.push(PackageFile::new(entry.path.to_string_lossy(), kind));
            }
        }

        files
    }

    fn convert_dependencies(
        deps: std::result::Result<Vec<rpm::Dependency>, rpm::Error>,
    ) -> Vec<Dependency> {
        deps.unwrap_or_default()
            .into_iter()
            .map(|dep| Dependency::versioned(dep.name, dep.flags.bits(), dep.version))
            .collect()
    }

    fn extract_changelog(metadata: &PackageMetadata) -> Vec<ChangelogEntry> {
        metadata
            .get_changelog_entries()
            .unwrap_or_default()
            .into_iter()
            .map(|entry| ChangelogEntry {
                author: entry.name,
                timestamp: entry.timestamp,
                text: entry.description,
            })
            .collect()
    }
}

fn text(value: std::result::Result<&str, rpm::Error>) -> Option<String> {
    value.ok().map(str::to_string)
}

/// Position of the main header inside a package file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeaderLayout {
    start: u64,
    end: u64,
    archive_size: Option<u64>,
}

fn read_u32(reader: &mut impl Read) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// Read a header intro, returning (index entry count, data store size)
fn read_header_intro(reader: &mut impl Read, path: &Path) -> Result<(u32, u32)> {
    let mut magic = [0u8; 8];
    reader
        .read_exact(&mut magic)
        .map_err(|e| Error::package_read(path, format!("truncated header: {}", e)))?;
    if magic[..3] != HEADER_MAGIC {
        return Err(Error::package_read(path, "bad header magic"));
    }

    let entries = read_u32(reader).map_err(|e| Error::package_read(path, e.to_string()))?;
    let store = read_u32(reader).map_err(|e| Error::package_read(path, e.to_string()))?;
    if entries > MAX_INDEX_ENTRIES || store > MAX_HEADER_STORE {
        return Err(Error::package_read(path, "header index out of range"));
    }

    Ok((entries, store))
}

/// Locate the main header and pick the archive size out of its index
fn read_header_layout(path: &Path) -> Result<HeaderLayout> {
    let mut file = File::open(path).map_err(|e| Error::package_read(path, e.to_string()))?;
    let io_err = |e: std::io::Error| Error::package_read(path, e.to_string());

    file.seek(SeekFrom::Start(LEAD_SIZE)).map_err(io_err)?;
    let (sig_entries, sig_store) = read_header_intro(&mut file, path)?;
    let sig_len = 16 + 16 * u64::from(sig_entries) + u64::from(sig_store);
    let start = LEAD_SIZE + ((sig_len + 7) & !7);

    file.seek(SeekFrom::Start(start)).map_err(io_err)?;
    let (entries, store) = read_header_intro(&mut file, path)?;
    let data_start = start + 16 + 16 * u64::from(entries);
    let end = data_start + u64::from(store);

    let mut archive_slot = None;
    for _ in 0..entries {
        let tag = read_u32(&mut file).map_err(io_err)?;
        let kind = read_u32(&mut file).map_err(io_err)?;
        let offset = read_u32(&mut file).map_err(io_err)?;
        let _count = read_u32(&mut file).map_err(io_err)?;
        match (tag, kind) {
            (RPMTAG_LONGARCHIVESIZE, RPM_INT64_TYPE) => archive_slot = Some((offset, 8)),
            (RPMTAG_ARCHIVESIZE, RPM_INT32_TYPE) if archive_slot.is_none() => {
                archive_slot = Some((offset, 4))
            }
            _ => {}
        }
    }

    let archive_size = match archive_slot {
        Some((offset, width)) => {
            file.seek(SeekFrom::Start(data_start + u64::from(offset)))
                .map_err(io_err)?;
            let mut buf = [0u8; 8];
            file.read_exact(&mut buf[8 - width..]).map_err(io_err)?;
            Some(u64::from_be_bytes(buf))
        }
        None => None,
    };

    Ok(HeaderLayout {
        start,
        end,
        archive_size,
    })
}

impl PackageReader for RpmReader {
    fn read_header(&self, path: &Path) -> Result<PackageHeader> {
        debug!("Reading RPM header: {}", path.display());

        let stat = fs::metadata(path).map_err(|e| Error::package_read(path, e.to_string()))?;
        let file_time = stat
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let layout = read_header_layout(path)?;

        let file = File::open(path).map_err(|e| Error::package_read(path, e.to_string()))?;
        let mut buf_reader = BufReader::new(file);
        let metadata = PackageMetadata::parse(&mut buf_reader)
            .map_err(|e| Error::package_read(path, format!("Failed to parse RPM: {}", e)))?;

        let header = PackageHeader {
            name: text(metadata.get_name()),
            epoch: metadata.get_epoch().ok(),
            version: text(metadata.get_version()),
            release: text(metadata.get_release()),
            arch: text(metadata.get_arch()),
            summary: text(metadata.get_summary()),
            description: text(metadata.get_description()),
            packager: text(metadata.get_packager()),
            url: text(metadata.get_url()),
            license: text(metadata.get_license()),
            vendor: text(metadata.get_vendor()),
            group: text(metadata.get_group()),
            build_host: text(metadata.get_build_host()),
            source_rpm: text(metadata.get_source_rpm()),
            build_time: metadata.get_build_time().unwrap_or(0),
            file_time,
            sizes: PackageSizes {
                package: stat.len(),
                installed: metadata.get_installed_size().unwrap_or(0),
                archive: layout.archive_size.unwrap_or(0),
            },
            header_range: (layout.start, layout.end),
            files: Self::extract_files(&metadata),
            provides: Self::convert_dependencies(metadata.get_provides()),
            requires: Self::convert_dependencies(metadata.get_requires()),
            conflicts: Self::convert_dependencies(metadata.get_conflicts()),
            obsoletes: Self::convert_dependencies(metadata.get_obsoletes()),
            changelog: Self::extract_changelog(&metadata),
        };

        debug!(
            "Parsed RPM: {} ({} files, {} requires)",
            header.name.as_deref().unwrap_or("<unnamed>"),
            header.files.len(),
            header.requires.len()
        );

        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn header_block(entries: &[(u32, u32, u32, u32)], store: &[u8]) -> Vec<u8> {
        let mut out = vec![0x8e, 0xad, 0xe8, 0x01, 0, 0, 0, 0];
        out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        out.extend_from_slice(&(store.len() as u32).to_be_bytes());
        for (tag, kind, offset, count) in entries {
            for v in [tag, kind, offset, count] {
                out.extend_from_slice(&v.to_be_bytes());
            }
        }
        out.extend_from_slice(store);
        out
    }

    #[test]
    fn test_header_layout_and_archive_size() {
        let mut data = vec![0u8; LEAD_SIZE as usize];
        // 16 + 16 + 3 = 35 bytes, padded to 40
        data.extend(header_block(&[(1000, 7, 0, 3)], &[1, 2, 3]));
        data.extend(std::iter::repeat_n(0u8, 5));
        let start = data.len() as u64;
        let store = [0u8, 0, 0x10, 0x00];
        data.extend(header_block(&[(RPMTAG_ARCHIVESIZE, RPM_INT32_TYPE, 0, 1)], &store));
        let end = data.len() as u64;
        data.extend_from_slice(b"payload");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let layout = read_header_layout(file.path()).unwrap();
        assert_eq!(layout.start, start);
        assert_eq!(layout.start, LEAD_SIZE + 40);
        assert_eq!(layout.end, end);
        assert_eq!(layout.archive_size, Some(4096));
    }

    #[test]
    fn test_truncated_file_is_package_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 40]).unwrap();
        file.flush().unwrap();

        let err = RpmReader::new().read_header(file.path()).unwrap_err();
        assert!(err.is_per_package());
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let mut data = vec![0u8; LEAD_SIZE as usize];
        data.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        assert!(matches!(
            read_header_layout(file.path()),
            Err(Error::PackageRead { .. })
        ));
    }

    #[test]
    fn test_parse_nonexistent_file() {
        let result = RpmReader::new().read_header(Path::new("/nonexistent/file.rpm"));
        assert!(result.is_err());
    }
}
