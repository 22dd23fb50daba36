// src/repository/publish.rs

//! Atomic publication of a generated metadata set
//!
//! Everything is written into a staging directory next to the published
//! one. Publishing renames the current generation to a backup name, renames
//! staging into place, then clears the backup. At every point either the old
//! generation or the new one is reachable under the final or backup name.

use crate::checksum::ChecksumType;
use crate::config::RepoConfig;
use crate::error::{Error, Result};
use crate::repository::reader::verify_metadata_dir;
use serde::Serialize;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Publish state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PublishState {
    /// Artifacts are being written to the staging directory
    Staging,
    /// Staged set checked against its own manifest
    Validated,
    /// New generation renamed into the final location
    Swapped,
    /// Superseded files removed from the backup
    BackupCleared,
    /// Backup directory removed
    Complete,
    /// Publish aborted; the previous generation is still in place
    Failed,
}

impl PublishState {
    /// Whether the new generation is live
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Swapped | Self::BackupCleared | Self::Complete)
    }
}

/// Result of a successful publish
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub final_dir: PathBuf,
    pub state: PublishState,
    /// Files from the previous generation moved into the new one
    pub carried_forward: usize,
    /// Non-fatal cleanup failures
    pub cleanup_warnings: usize,
}

/// Flush a directory entry change to disk; not all filesystems allow it
fn sync_dir(path: &Path) {
    if let Ok(dir) = File::open(path) {
        let _ = dir.sync_all();
    }
}

fn remove_path(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// One staging / final / backup directory triple
#[derive(Debug)]
pub struct PublishTransaction {
    staging: PathBuf,
    final_dir: PathBuf,
    backup: PathBuf,
    checksum: ChecksumType,
    state: PublishState,
}

impl PublishTransaction {
    /// Create the staging directory
    ///
    /// A staging or backup directory left over from an earlier run means
    /// that run did not finish; it is reported instead of overwritten.
    pub fn begin(config: &RepoConfig) -> Result<Self> {
        let staging = config.staging_dir();
        let backup = config.backup_dir();

        for stale in [&staging, &backup] {
            if stale.exists() {
                return Err(Error::Config(format!(
                    "{} exists, a previous run did not finish; remove it and retry",
                    stale.display()
                )));
            }
        }

        fs::create_dir(&staging).map_err(|e| {
            Error::Config(format!("cannot create {}: {}", staging.display(), e))
        })?;
        debug!("Staging metadata in {}", staging.display());

        Ok(Self {
            staging,
            final_dir: config.final_dir(),
            backup,
            checksum: config.checksum,
            state: PublishState::Staging,
        })
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    pub fn state(&self) -> PublishState {
        self.state
    }

    /// Check the staged set before it may replace the published one
    ///
    /// Returns the package count shared by the staged catalogs.
    pub fn validate(&mut self) -> Result<usize> {
        if self.state != PublishState::Staging {
            return Err(Error::Integrity(format!(
                "cannot validate in state {:?}",
                self.state
            )));
        }

        match verify_metadata_dir(&self.staging, self.checksum) {
            Ok(count) => {
                self.state = PublishState::Validated;
                Ok(count)
            }
            Err(e) => {
                self.state = PublishState::Failed;
                Err(e)
            }
        }
    }

    /// Move the current generation aside and the staged one into place
    fn swap(&mut self) -> Result<bool> {
        let had_previous = self.final_dir.exists();

        if had_previous {
            fs::rename(&self.final_dir, &self.backup).map_err(|e| {
                Error::Config(format!(
                    "cannot move {} aside: {}",
                    self.final_dir.display(),
                    e
                ))
            })?;
            debug!("Moved previous generation to {}", self.backup.display());
        }

        if let Err(e) = fs::rename(&self.staging, &self.final_dir) {
            let restored = if had_previous {
                match fs::rename(&self.backup, &self.final_dir) {
                    Ok(()) => "previous generation restored".to_string(),
                    Err(restore) => format!(
                        "previous generation left at {}: {}",
                        self.backup.display(),
                        restore
                    ),
                }
            } else {
                "no previous generation".to_string()
            };

            return Err(Error::Integrity(format!(
                "failed to move {} into place: {} ({})",
                self.staging.display(),
                e,
                restored
            )));
        }

        if let Some(parent) = self.final_dir.parent() {
            sync_dir(parent);
        }
        Ok(had_previous)
    }

    /// Drop superseded files from the backup and carry the rest forward
    fn clear_backup(&self, outcome: &mut PublishOutcome) {
        let entries = match fs::read_dir(&self.backup) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read {}: {}", self.backup.display(), e);
                outcome.cleanup_warnings += 1;
                return;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Cannot read {}: {}", self.backup.display(), e);
                    outcome.cleanup_warnings += 1;
                    continue;
                }
            };

            let old = entry.path();
            let new = self.final_dir.join(entry.file_name());
            let result = if new.exists() {
                remove_path(&old)
            } else {
                debug!("Carrying forward {}", old.display());
                fs::rename(&old, &new).map(|()| outcome.carried_forward += 1)
            };

            if let Err(e) = result {
                warn!("Failed to clean up {}: {}", old.display(), e);
                outcome.cleanup_warnings += 1;
            }
        }
    }

    /// Publish the validated set
    pub fn commit(mut self) -> Result<PublishOutcome> {
        if self.state != PublishState::Validated {
            return Err(Error::Integrity(format!(
                "cannot publish in state {:?}",
                self.state
            )));
        }

        let had_previous = match self.swap() {
            Ok(had_previous) => had_previous,
            Err(e) => {
                self.state = PublishState::Failed;
                return Err(e);
            }
        };
        self.state = PublishState::Swapped;
        info!("Published {}", self.final_dir.display());

        let mut outcome = PublishOutcome {
            final_dir: self.final_dir.clone(),
            state: self.state,
            carried_forward: 0,
            cleanup_warnings: 0,
        };

        if had_previous {
            self.clear_backup(&mut outcome);
            self.state = PublishState::BackupCleared;

            match fs::remove_dir(&self.backup) {
                Ok(()) => self.state = PublishState::Complete,
                Err(e) => {
                    warn!(
                        "Leaving {} for inspection: {}",
                        self.backup.display(),
                        e
                    );
                    outcome.cleanup_warnings += 1;
                }
            }
        } else {
            self.state = PublishState::Complete;
        }

        outcome.state = self.state;
        Ok(outcome)
    }
}

impl Drop for PublishTransaction {
    fn drop(&mut self) {
        if self.state.is_published() || !self.staging.exists() {
            return;
        }

        debug!("Removing staging directory {}", self.staging.display());
        if let Err(e) = fs::remove_dir_all(&self.staging) {
            warn!("Failed to remove {}: {}", self.staging.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::manifest::ManifestBuilder;
    use crate::repository::nodes::{FilelistRecord, OtherRecord, PrimaryRecord};
    use crate::repository::writer::CatalogWriter;

    fn stage_empty_set(config: &RepoConfig, dir: &Path) {
        let catalogs = vec![
            CatalogWriter::<PrimaryRecord>::open(dir, 0, false).unwrap().seal().unwrap(),
            CatalogWriter::<FilelistRecord>::open(dir, 0, false).unwrap().seal().unwrap(),
            CatalogWriter::<OtherRecord>::open(dir, 0, false).unwrap().seal().unwrap(),
        ];
        ManifestBuilder::new(config)
            .build(dir, &catalogs)
            .unwrap()
            .write(dir)
            .unwrap();
    }

    fn publish(config: &RepoConfig) -> PublishOutcome {
        let mut tx = PublishTransaction::begin(config).unwrap();
        stage_empty_set(config, tx.staging_dir());
        tx.validate().unwrap();
        tx.commit().unwrap()
    }

    #[test]
    fn test_first_publish() {
        let dir = tempfile::tempdir().unwrap();
        let config = RepoConfig::new(dir.path());

        let outcome = publish(&config);
        assert_eq!(outcome.state, PublishState::Complete);
        assert!(config.final_dir().join("repomd.xml").is_file());
        assert!(!config.staging_dir().exists());
        assert!(!config.backup_dir().exists());
    }

    #[test]
    fn test_republish_carries_forward_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = RepoConfig::new(dir.path());
        publish(&config);
        fs::write(config.final_dir().join("updateinfo.xml"), b"<updates/>").unwrap();

        let outcome = publish(&config);
        assert_eq!(outcome.state, PublishState::Complete);
        assert_eq!(outcome.carried_forward, 1);
        assert_eq!(outcome.cleanup_warnings, 0);
        assert!(config.final_dir().join("updateinfo.xml").is_file());
        assert!(!config.backup_dir().exists());
    }

    #[test]
    fn test_stale_state_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = RepoConfig::new(dir.path());

        fs::create_dir(config.backup_dir()).unwrap();
        assert!(matches!(
            PublishTransaction::begin(&config),
            Err(Error::Config(_))
        ));
        fs::remove_dir(config.backup_dir()).unwrap();

        fs::create_dir(config.staging_dir()).unwrap();
        assert!(matches!(
            PublishTransaction::begin(&config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_dropped_build_keeps_previous_generation() {
        let dir = tempfile::tempdir().unwrap();
        let config = RepoConfig::new(dir.path());
        publish(&config);
        let before = fs::read(config.final_dir().join("repomd.xml")).unwrap();

        let tx = PublishTransaction::begin(&config).unwrap();
        fs::write(tx.staging_dir().join("repomd.xml"), b"partial").unwrap();
        drop(tx);

        assert!(!config.staging_dir().exists());
        assert_eq!(fs::read(config.final_dir().join("repomd.xml")).unwrap(), before);
    }

    #[test]
    fn test_invalid_staging_is_not_published() {
        let dir = tempfile::tempdir().unwrap();
        let config = RepoConfig::new(dir.path());
        publish(&config);

        let mut tx = PublishTransaction::begin(&config).unwrap();
        stage_empty_set(&config, tx.staging_dir());
        fs::remove_file(tx.staging_dir().join("other.xml.gz")).unwrap();

        assert!(matches!(tx.validate(), Err(Error::Integrity(_))));
        assert_eq!(tx.state(), PublishState::Failed);
        assert!(matches!(tx.commit(), Err(Error::Integrity(_))));
        assert!(config.final_dir().join("other.xml.gz").is_file());
        assert!(!config.staging_dir().exists());
    }

    #[test]
    fn test_failed_swap_restores_previous_generation() {
        let dir = tempfile::tempdir().unwrap();
        let config = RepoConfig::new(dir.path());
        publish(&config);
        let before = fs::read(config.final_dir().join("repomd.xml")).unwrap();

        let mut tx = PublishTransaction::begin(&config).unwrap();
        stage_empty_set(&config, tx.staging_dir());
        tx.validate().unwrap();
        // staging vanishes between validation and the swap
        fs::remove_dir_all(config.staging_dir()).unwrap();

        let err = tx.commit().unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
        assert!(err.to_string().contains("restored"));
        assert_eq!(fs::read(config.final_dir().join("repomd.xml")).unwrap(), before);
        assert!(!config.backup_dir().exists());
    }
}
