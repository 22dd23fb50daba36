// src/repository/mod.rs

//! Repository metadata generation
//!
//! A build runs in two passes over the scanned package set:
//!
//! 1. Pre-pass: checksum every package and read its header on the worker
//!    pool. Packages that fail are reported and dropped. When autoglob is
//!    enabled the headers also feed the pattern miner. Only the path and
//!    checksum of each survivor are kept.
//! 2. Main pass: headers are read again in bounded, ordered batches, turned
//!    into catalog records and appended to the three catalog writers in scan
//!    order. The catalogs declare the survivor count from the pre-pass.
//!
//! The sealed catalogs and the manifest are validated in the staging
//! directory and then published in one swap.

pub mod manifest;
pub mod nodes;
pub mod patterns;
pub mod publish;
pub mod reader;
pub mod scanner;
pub mod writer;

pub use manifest::{EntryRole, ManifestBuilder, ManifestDocument, ManifestEntry, MANIFEST_FILE};
pub use nodes::{CatalogNodeBuilder, CatalogRecord, CatalogRecords, PackageRecord};
pub use patterns::{escape_path, PatternMatcher, PatternMiner, PatternSet};
pub use publish::{PublishOutcome, PublishState, PublishTransaction};
pub use scanner::{scan, ExcludeFilter, PackageWalker};
pub use writer::{CatalogRole, CatalogWriter, SealedCatalog};

use crate::checksum::{digest_file, Checksum, ChecksumType};
use crate::config::RepoConfig;
use crate::error::{Error, Result};
use crate::packages::PackageReader;
use nodes::{FilelistRecord, OtherRecord, PrimaryRecord};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Packages handed to the worker pool at a time
const BATCH_SIZE: usize = 64;

/// A package dropped from the build
#[derive(Debug, Clone, Serialize)]
pub struct SkippedPackage {
    pub path: PathBuf,
    pub reason: String,
}

/// Summary of one repository build
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub root: PathBuf,
    /// Packages listed in every catalog
    pub packages: usize,
    pub skipped: Vec<SkippedPackage>,
    pub checksum: ChecksumType,
    /// Patterns active for the primary file list
    pub patterns: usize,
    pub manifest: PathBuf,
    pub entries: Vec<ManifestEntry>,
    pub carried_forward: usize,
    pub cleanup_warnings: usize,
}

/// A package that survived the pre-pass
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    location: String,
    checksum: Checksum,
}

fn worker_pool(workers: usize) -> Result<ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("repodata-worker-{}", i))
        .build()
        .map_err(|e| Error::Config(format!("cannot start worker pool: {}", e)))
}

/// Checksum one package and read its header
fn load_package<R: PackageReader + ?Sized>(
    config: &RepoConfig,
    reader: &R,
    path: &Path,
) -> Result<PackageRecord> {
    let checksum = digest_file(config.checksum, path)?;
    let header = reader.read_header(path)?;
    let record = PackageRecord {
        path: path.to_path_buf(),
        location: config.relative_location(path),
        checksum,
        header,
    };
    CatalogNodeBuilder::identity(&record)?;
    Ok(record)
}

fn skip(skipped: &mut Vec<SkippedPackage>, path: &Path, error: Error) {
    warn!("Skipping {}: {}", path.display(), error);
    skipped.push(SkippedPackage {
        path: path.to_path_buf(),
        reason: error.to_string(),
    });
}

/// Build the metadata for `config.root` and publish it
pub fn build_repository<R: PackageReader + ?Sized>(
    config: &RepoConfig,
    reader: &R,
) -> Result<BuildReport> {
    config.validate()?;
    let pool = worker_pool(config.workers)?;

    let mut tx = PublishTransaction::begin(config)?;
    let staging = tx.staging_dir().to_path_buf();

    let paths = scan(&config.root, &config.extension, &config.excludes)?;
    info!(
        "Found {} packages under {}",
        paths.len(),
        config.root.display()
    );

    let mut miner = config.autoglob.then(PatternMiner::new);
    let mut candidates = Vec::with_capacity(paths.len());
    let mut skipped = Vec::new();

    for batch in paths.chunks(BATCH_SIZE) {
        let loaded: Vec<Result<PackageRecord>> = pool.install(|| {
            batch
                .par_iter()
                .map(|path| load_package(config, reader, path))
                .collect()
        });

        for (path, result) in batch.iter().zip(loaded) {
            match result {
                Ok(record) => {
                    if let Some(miner) = miner.as_mut() {
                        miner.observe(&record.header);
                    }
                    candidates.push(Candidate {
                        path: record.path,
                        location: record.location,
                        checksum: record.checksum,
                    });
                }
                Err(e) if e.is_per_package() => skip(&mut skipped, path, e),
                Err(e) => return Err(e),
            }
        }
    }

    let patterns = match miner {
        Some(miner) => {
            info!(
                "Mined {} path requirements for the file patterns",
                miner.requirement_count()
            );
            miner.finish()
        }
        None => PatternSet::from_config(config),
    };
    if patterns.is_empty() {
        warn!("No file patterns active, primary file lists will be empty");
    }
    let matcher = PatternMatcher::new(&patterns)?;
    let builder = CatalogNodeBuilder::new(&matcher);

    let declared = candidates.len();
    let mut primary = CatalogWriter::<PrimaryRecord>::open(&staging, declared, config.pretty)?;
    let mut filelists = CatalogWriter::<FilelistRecord>::open(&staging, declared, config.pretty)?;
    let mut other = CatalogWriter::<OtherRecord>::open(&staging, declared, config.pretty)?;

    for batch in candidates.chunks(BATCH_SIZE) {
        let built: Vec<Result<CatalogRecords>> = pool.install(|| {
            batch
                .par_iter()
                .map(|candidate| {
                    let record = PackageRecord {
                        path: candidate.path.clone(),
                        location: candidate.location.clone(),
                        checksum: candidate.checksum.clone(),
                        header: reader.read_header(&candidate.path)?,
                    };
                    builder.build(&record)
                })
                .collect()
        });

        for (candidate, result) in batch.iter().zip(built) {
            match result {
                Ok(records) => {
                    debug!("Adding {}", records.primary.identity.nevra());
                    primary.append(&records.primary)?;
                    filelists.append(&records.filelist)?;
                    other.append(&records.other)?;
                }
                // The catalogs already declare this package, so sealing
                // will fail below.
                Err(e) if e.is_per_package() => skip(&mut skipped, &candidate.path, e),
                Err(e) => return Err(e),
            }
        }
    }

    let catalogs = vec![primary.seal()?, filelists.seal()?, other.seal()?];

    let mut manifest_builder = ManifestBuilder::new(config);
    if config.globinfo {
        manifest_builder = manifest_builder.with_patterns(&patterns);
    }
    let manifest = manifest_builder.build(&staging, &catalogs)?;
    manifest.write(&staging)?;

    let verified = tx.validate()?;
    if verified != declared {
        return Err(Error::Integrity(format!(
            "staged catalogs hold {} packages, expected {}",
            verified, declared
        )));
    }

    let outcome = tx.commit()?;
    info!(
        "Indexed {} packages ({} skipped) into {}",
        declared,
        skipped.len(),
        outcome.final_dir.display()
    );

    Ok(BuildReport {
        root: config.root.clone(),
        packages: declared,
        skipped,
        checksum: config.checksum,
        patterns: patterns.len(),
        manifest: outcome.final_dir.join(MANIFEST_FILE),
        entries: manifest.entries,
        carried_forward: outcome.carried_forward,
        cleanup_warnings: outcome.cleanup_warnings,
    })
}
