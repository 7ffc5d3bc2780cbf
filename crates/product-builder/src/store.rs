// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Positional part storage into a per-transaction scratch file.

use crate::part::ProductPart;
use crate::pdu::PduVariant;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Scratch file name inside a transaction directory.
pub const SCRATCH_FILE_NAME: &str = "scratch.dat";

/// Storage errors. Each one rejects a single part.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to create transaction directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to open scratch file {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to write {length} bytes at offset {offset} of {path}: {source}")]
    Write {
        path: PathBuf,
        offset: u64,
        length: usize,
        source: io::Error,
    },

    #[error("part offset {offset} exceeds maximum allowed offset {max}")]
    OffsetOutOfRange { offset: u64, max: u64 },
}

/// Where a stored part's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageMetadata {
    pub part_number: u32,
    pub pdu_variant: PduVariant,
    /// Offset in the assembled product.
    pub global_offset: u64,
    /// Offset in the scratch file; `None` when nothing was written.
    pub local_offset: Option<u64>,
    pub length: u64,
    pub ert: DateTime<Utc>,
    pub stored_at: DateTime<Utc>,
}

impl StorageMetadata {
    /// Zero-length record for a part that carries no file bytes.
    pub fn without_data(part: &ProductPart) -> Self {
        Self {
            part_number: part.part_number(),
            pdu_variant: part.variant(),
            global_offset: part.part_offset(),
            local_offset: None,
            length: 0,
            ert: part.packet.ert,
            stored_at: Utc::now(),
        }
    }

    /// Byte range covered in the assembled product.
    pub fn range(&self) -> std::ops::Range<u64> {
        self.global_offset..self.global_offset + self.length
    }
}

/// Writes part payloads into transaction scratch files.
#[derive(Debug, Clone)]
pub struct PartStore {
    max_part_offset: u64,
}

impl PartStore {
    pub fn new(max_part_offset: u64) -> Self {
        Self { max_part_offset }
    }

    pub fn scratch_path(transaction_dir: &Path) -> PathBuf {
        transaction_dir.join(SCRATCH_FILE_NAME)
    }

    /// Store `part` into the scratch file under `transaction_dir`.
    ///
    /// Parts without payload return a zero-length record and leave the disk
    /// untouched. Data parts are written at their product offset, so parts may
    /// arrive in any order and duplicates overwrite identical bytes.
    pub fn store(
        &self,
        transaction_dir: &Path,
        part: &ProductPart,
    ) -> Result<StorageMetadata, StorageError> {
        if !part.variant().carries_data() {
            return Ok(StorageMetadata::without_data(part));
        }

        let offset = part.part_offset();
        if offset > self.max_part_offset {
            return Err(StorageError::OffsetOutOfRange {
                offset,
                max: self.max_part_offset,
            });
        }

        fs::create_dir_all(transaction_dir).map_err(|source| StorageError::CreateDir {
            path: transaction_dir.to_path_buf(),
            source,
        })?;

        let path = Self::scratch_path(transaction_dir);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| StorageError::Open {
                path: path.clone(),
                source,
            })?;

        let data = part.file_data();
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(data))
            .and_then(|_| file.flush())
            .map_err(|source| StorageError::Write {
                path: path.clone(),
                offset,
                length: data.len(),
                source,
            })?;

        tracing::debug!(
            path = %path.display(),
            part = part.part_number(),
            offset,
            length = data.len(),
            "stored product part"
        );

        Ok(StorageMetadata {
            part_number: part.part_number(),
            pdu_variant: part.variant(),
            global_offset: offset,
            local_offset: Some(offset),
            length: data.len() as u64,
            ert: part.packet.ert,
            stored_at: Utc::now(),
        })
    }
}
