// src/lib.rs

//! Conary repository metadata generator
//!
//! Turns a directory of RPM packages into a checksum-addressed metadata set
//! that clients fetch instead of every package:
//!
//! - `primary.xml.gz`: identity, summary, capabilities and essential files
//! - `filelists.xml.gz`: every file of every package
//! - `other.xml.gz`: changelogs
//! - `repomd.xml`: manifest with checksums of the above
//!
//! # Architecture
//!
//! - Deterministic: an unchanged tree yields byte-identical catalogs
//! - Streaming: one package is held in memory at a time
//! - Atomic: a build is staged and swapped in, the old generation survives
//!   any failure before the swap

pub mod checksum;
pub mod config;
mod error;
pub mod packages;
pub mod repository;

pub use checksum::{Checksum, ChecksumType};
pub use config::RepoConfig;
pub use error::{ChecksumError, Error, Result};
pub use repository::{build_repository, BuildReport, SkippedPackage};
