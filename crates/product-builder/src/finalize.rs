// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Product finalization: completeness, checksum verification, output files.

use crate::checksum::ChecksumAlgorithm;
use crate::config::BuilderConfig;
use crate::metadata::{GroundStatus, ProductMetadata};
use crate::naming::{NamingError, ProductNamer, ReservedProductFiles};
use crate::part::TransactionKey;
use crate::store::PartStore;
use crate::trigger::AssemblyTrigger;
use crate::txlog::{LogError, TransactionEvent, TransactionLog};
use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("transaction log error: {0}")]
    Log(#[from] LogError),

    #[error("naming error: {0}")]
    Naming(#[from] NamingError),

    #[error("failed to write {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// A triggered transaction handed over by the engine.
///
/// Gap and metadata facts are snapshotted from the tracker at trigger time.
#[derive(Debug)]
pub struct PendingProduct {
    pub key: TransactionKey,
    pub dir: PathBuf,
    pub metadata: ProductMetadata,
    pub log: TransactionLog,
    pub trigger: AssemblyTrigger,
    pub has_gaps: bool,
    pub received_metadata: bool,
}

/// A product written to the output tree.
#[derive(Debug, Clone)]
pub struct FinalizedProduct {
    pub key: TransactionKey,
    pub metadata: ProductMetadata,
    pub files: ReservedProductFiles,
}

impl FinalizedProduct {
    pub fn status(&self) -> GroundStatus {
        self.metadata.ground_status
    }

    pub fn is_partial(&self) -> bool {
        self.metadata.is_partial
    }
}

/// Status assignment result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusOutcome {
    pub status: GroundStatus,
    pub is_partial: bool,
    pub actual_checksum: Option<u32>,
}

impl StatusOutcome {
    fn new(status: GroundStatus, is_partial: bool) -> Self {
        Self {
            status,
            is_partial,
            actual_checksum: None,
        }
    }
}

/// Turns triggered transactions into published products.
pub struct Finalizer {
    validate_checksum: bool,
    algorithm: ChecksumAlgorithm,
    archive_active_dirs: bool,
    namer: Arc<dyn ProductNamer>,
}

impl Finalizer {
    pub fn new(namer: Arc<dyn ProductNamer>) -> Self {
        Self {
            validate_checksum: false,
            algorithm: ChecksumAlgorithm::default(),
            archive_active_dirs: false,
            namer,
        }
    }

    pub fn from_config(config: &BuilderConfig, namer: Arc<dyn ProductNamer>) -> Self {
        Self::new(namer)
            .with_checksum(config.validate_checksum, config.checksum_algorithm)
            .with_archive_active_dirs(config.archive_active_dirs)
    }

    pub fn with_checksum(mut self, validate: bool, algorithm: ChecksumAlgorithm) -> Self {
        self.validate_checksum = validate;
        self.algorithm = algorithm;
        self
    }

    pub fn with_archive_active_dirs(mut self, archive: bool) -> Self {
        self.archive_active_dirs = archive;
        self
    }

    /// Finalize one transaction and retire its scratch directory.
    pub fn finalize(&self, pending: PendingProduct) -> Result<FinalizedProduct, FinalizeError> {
        let PendingProduct {
            key,
            dir,
            mut metadata,
            mut log,
            trigger,
            has_gaps,
            received_metadata,
        } = pending;

        log.append(&TransactionEvent::assembly_triggered(trigger))?;
        tracing::info!(transaction = %key, %trigger, has_gaps, received_metadata, "assembling product");

        let is_partial = has_gaps || !received_metadata;

        let scratch = PartStore::scratch_path(&dir);
        let scratch_size = fs::metadata(&scratch).ok().filter(|m| m.is_file()).map(|m| m.len());
        metadata.actual_file_size = scratch_size;

        let outcome = self.assign_status(
            &key,
            is_partial,
            scratch_size.map(|_| scratch.as_path()),
            metadata.checksum,
        );
        metadata.ground_status = outcome.status;
        metadata.is_partial = outcome.is_partial;
        metadata.actual_checksum = outcome.actual_checksum;
        metadata.assembly_trigger = Some(trigger);
        metadata.assembled_at = Some(Utc::now());

        let files =
            self.namer
                .reserve(&metadata.directory_name, &metadata.filename, metadata.is_partial)?;

        let assembled = scratch_size.map(|_| scratch.as_path());
        if let Err(e) = Self::write_outputs(assembled, &metadata, &files) {
            Self::release(&files);
            return Err(e);
        }

        drop(log);
        self.retire(&dir, &metadata.filename, &files.version);

        tracing::info!(
            transaction = %key,
            status = %metadata.ground_status,
            partial = metadata.is_partial,
            path = %files.data_path.display(),
            "product written"
        );

        Ok(FinalizedProduct {
            key,
            metadata,
            files,
        })
    }

    fn write_outputs(
        scratch: Option<&Path>,
        metadata: &ProductMetadata,
        files: &ReservedProductFiles,
    ) -> Result<(), FinalizeError> {
        if let Some(scratch) = scratch {
            fs::copy(scratch, &files.data_path).map_err(|source| FinalizeError::Io {
                path: files.data_path.clone(),
                source,
            })?;
        }
        metadata
            .write_to(&files.metadata_path)
            .map_err(|source| FinalizeError::Io {
                path: files.metadata_path.clone(),
                source,
            })
    }

    /// Give back a reserved version after a failed write.
    fn release(files: &ReservedProductFiles) {
        for path in [&files.data_path, &files.metadata_path] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to release reserved product file");
                }
            }
        }
    }

    /// Assign the ground status from completeness and, when enabled, the
    /// checksum of the assembled scratch file.
    pub fn assign_status(
        &self,
        key: &TransactionKey,
        is_partial: bool,
        scratch: Option<&Path>,
        expected: Option<u32>,
    ) -> StatusOutcome {
        if is_partial {
            return StatusOutcome::new(GroundStatus::Partial, true);
        }
        if !self.validate_checksum {
            return StatusOutcome::new(GroundStatus::CompleteNoChecksum, false);
        }
        let Some(scratch) = scratch else {
            tracing::error!(transaction = %key, "product is complete but has no assembled data");
            return StatusOutcome::new(GroundStatus::Unknown, false);
        };
        let Some(expected) = expected else {
            tracing::warn!(transaction = %key, "no flight checksum reported, cannot verify");
            return StatusOutcome::new(GroundStatus::CompleteNoChecksum, false);
        };

        match self.algorithm.compute_file(scratch) {
            Ok(actual) if actual == expected => StatusOutcome {
                status: GroundStatus::CompleteChecksumPass,
                is_partial: false,
                actual_checksum: Some(actual),
            },
            Ok(actual) => {
                tracing::error!(
                    transaction = %key,
                    algorithm = %self.algorithm,
                    expected = %format!("{:#010x}", expected),
                    computed = %format!("{:#010x}", actual),
                    "checksum mismatch, product downgraded to partial"
                );
                StatusOutcome {
                    status: GroundStatus::PartialChecksumFail,
                    is_partial: true,
                    actual_checksum: Some(actual),
                }
            }
            Err(e) => {
                tracing::error!(transaction = %key, error = %e, "failed to checksum assembled data");
                StatusOutcome::new(GroundStatus::Unknown, false)
            }
        }
    }

    fn retire(&self, dir: &Path, filename: &str, version: &str) {
        let result = if self.archive_active_dirs {
            let target = dir.with_file_name(format!("{}-{}", filename, version));
            tracing::debug!(archive = %target.display(), "archiving transaction directory");
            fs::rename(dir, &target)
        } else {
            fs::remove_dir_all(dir)
        };
        if let Err(e) = result {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to retire transaction directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::VersionedNamer;
    use crate::part::{PacketInfo, ProductPart, TransactionId};
    use crate::pdu::DecodedPdu;

    fn key() -> TransactionKey {
        TransactionKey::new(0, TransactionId::new("Image", 5))
    }

    fn pending(dir: &Path, checksum: Option<u32>, has_gaps: bool) -> PendingProduct {
        let part = ProductPart {
            transaction_id: key().id,
            packet: PacketInfo::new(0, 10),
            pdu: DecodedPdu::data(2, 1, 5, 1, 0, b"ABCD".to_vec()),
            filename: "img_1-1".into(),
            dvt: None,
        };
        let mut metadata = ProductMetadata::new(&part);
        metadata.checksum = checksum;
        fs::create_dir_all(dir).expect("mkdir");
        fs::write(PartStore::scratch_path(dir), b"ABCD").expect("write");
        PendingProduct {
            key: key(),
            dir: dir.to_path_buf(),
            metadata,
            log: TransactionLog::open(dir).expect("log"),
            trigger: AssemblyTrigger::EndPart,
            has_gaps,
            received_metadata: true,
        }
    }

    fn finalizer(out: &Path, validate: bool) -> Finalizer {
        Finalizer::new(Arc::new(VersionedNamer::new(out)))
            .with_checksum(validate, ChecksumAlgorithm::Cfdp)
    }

    #[test]
    fn test_checksum_pass_writes_complete_product() {
        let root = tempfile::tempdir().expect("tempdir");
        let txn = root.path().join("active/5");
        let product = finalizer(&root.path().join("out"), true)
            .finalize(pending(&txn, Some(0x4142_4344), false))
            .expect("finalize");

        assert_eq!(product.status(), GroundStatus::CompleteChecksumPass);
        assert!(!product.is_partial());
        assert_eq!(product.metadata.actual_file_size, Some(4));
        assert_eq!(fs::read(&product.files.data_path).expect("read"), b"ABCD");
        assert!(product.files.data_path.ends_with("Image/img_1-1-1.dat"));
        let written = ProductMetadata::read_from(&product.files.metadata_path).expect("emd");
        assert_eq!(written.ground_status, GroundStatus::CompleteChecksumPass);
        assert!(!txn.exists());
    }

    #[test]
    fn test_checksum_mismatch_downgrades_to_partial() {
        let root = tempfile::tempdir().expect("tempdir");
        let txn = root.path().join("active/5");
        let product = finalizer(&root.path().join("out"), true)
            .finalize(pending(&txn, Some(1), false))
            .expect("finalize");

        assert_eq!(product.status(), GroundStatus::PartialChecksumFail);
        assert!(product.is_partial());
        assert_eq!(product.metadata.actual_checksum, Some(0x4142_4344));
        assert!(product.files.data_path.ends_with("Image/img_1-1_Partial-1.1.pdat"));
    }

    #[test]
    fn test_gaps_win_over_checksum() {
        let root = tempfile::tempdir().expect("tempdir");
        let product = finalizer(&root.path().join("out"), true)
            .finalize(pending(&root.path().join("t"), Some(0x4142_4344), true))
            .expect("finalize");
        assert_eq!(product.status(), GroundStatus::Partial);
    }

    #[test]
    fn test_status_without_scratch_or_validation() {
        let root = tempfile::tempdir().expect("tempdir");
        let f = finalizer(root.path(), true);
        let k = key();
        assert_eq!(
            f.assign_status(&k, false, None, Some(1)).status,
            GroundStatus::Unknown
        );
        let off = finalizer(root.path(), false);
        assert_eq!(
            off.assign_status(&k, false, None, Some(1)).status,
            GroundStatus::CompleteNoChecksum
        );
        assert_eq!(
            f.assign_status(&k, true, None, None),
            StatusOutcome::new(GroundStatus::Partial, true)
        );
    }

    #[test]
    fn test_failed_write_releases_reserved_version() {
        let root = tempfile::tempdir().expect("tempdir");
        let out = root.path().join("out");
        let txn = root.path().join("active/5");
        // a directory squatting on the metadata name makes the write fail
        fs::create_dir_all(out.join("Image/img_1-1-1.emd")).expect("mkdir");

        let result = finalizer(&out, false).finalize(pending(&txn, None, false));
        assert!(matches!(result, Err(FinalizeError::Io { .. })));
        assert!(!out.join("Image/img_1-1-1.dat").exists());
        assert!(txn.join("scratch.dat").exists());
    }

    #[test]
    fn test_archive_renames_directory() {
        let root = tempfile::tempdir().expect("tempdir");
        let txn = root.path().join("active/Image/5");
        let product = finalizer(&root.path().join("out"), false)
            .with_archive_active_dirs(true)
            .finalize(pending(&txn, None, false))
            .expect("finalize");

        assert_eq!(product.status(), GroundStatus::CompleteNoChecksum);
        let archived = root.path().join("active/Image/img_1-1-1");
        assert!(archived.join("events.log").exists());
        assert!(!txn.exists());
        let log = fs::read_to_string(archived.join("events.log")).expect("log");
        assert!(log.contains("assembly_triggered"));
    }
}
