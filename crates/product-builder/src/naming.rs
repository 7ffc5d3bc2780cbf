// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Output file naming and version reservation.
//!
//! Complete products are `<name>-<v>.dat` / `.emd`. Partial products are
//! `<name>_Partial-<cv>.<n>.pdat` / `.pemd`, where `cv` is the version the
//! next complete product would get and `n` counts partials under it.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Upper bound on versions probed for one product name.
pub const MAX_VERSIONS: u32 = 100_000;

#[derive(Debug, Error)]
pub enum NamingError {
    #[error("I/O error reserving {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("no free version left for product {0}")]
    Exhausted(String),

    #[error("invalid product filename {0:?}")]
    InvalidName(String),
}

/// Paths reserved for one finalized product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedProductFiles {
    pub data_path: PathBuf,
    pub metadata_path: PathBuf,
    /// `"<v>"` for complete products, `"<cv>.<n>"` for partials.
    pub version: String,
}

/// Naming and versioning collaborator.
pub trait ProductNamer: Send + Sync {
    /// Reserve a unique data/metadata path pair. The data file exists (empty)
    /// when this returns, so no other caller can receive the same name.
    fn reserve(
        &self,
        directory_name: &str,
        filename: &str,
        is_partial: bool,
    ) -> Result<ReservedProductFiles, NamingError>;
}

/// Version-suffix namer rooted at an output directory.
#[derive(Debug, Clone)]
pub struct VersionedNamer {
    output_dir: PathBuf,
}

impl VersionedNamer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn complete_file_name(filename: &str, version: u32, extension: &str) -> String {
        format!("{}-{}.{}", filename, version, extension)
    }

    pub fn partial_file_name(
        filename: &str,
        complete_version: u32,
        partial: u32,
        extension: &str,
    ) -> String {
        format!(
            "{}_Partial-{}.{}.{}",
            filename, complete_version, partial, extension
        )
    }

    /// First complete version whose data file does not exist yet.
    fn next_complete_version(dir: &Path, filename: &str) -> Result<u32, NamingError> {
        (1..=MAX_VERSIONS)
            .find(|v| !dir.join(Self::complete_file_name(filename, *v, "dat")).exists())
            .ok_or_else(|| NamingError::Exhausted(filename.to_string()))
    }

    /// Claim `path` with create-new semantics.
    fn claim(path: &Path) -> Result<bool, NamingError> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(source) => Err(NamingError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

impl ProductNamer for VersionedNamer {
    fn reserve(
        &self,
        directory_name: &str,
        filename: &str,
        is_partial: bool,
    ) -> Result<ReservedProductFiles, NamingError> {
        if filename.is_empty() || filename.contains(['/', '\\']) {
            return Err(NamingError::InvalidName(filename.to_string()));
        }

        let dir = self.output_dir.join(directory_name);
        fs::create_dir_all(&dir).map_err(|source| NamingError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut version = Self::next_complete_version(&dir, filename)?;
        if is_partial {
            for n in 1..=MAX_VERSIONS {
                let data_path = dir.join(Self::partial_file_name(filename, version, n, "pdat"));
                if Self::claim(&data_path)? {
                    return Ok(ReservedProductFiles {
                        metadata_path: dir
                            .join(Self::partial_file_name(filename, version, n, "pemd")),
                        data_path,
                        version: format!("{}.{}", version, n),
                    });
                }
            }
        } else {
            while version <= MAX_VERSIONS {
                let data_path = dir.join(Self::complete_file_name(filename, version, "dat"));
                if Self::claim(&data_path)? {
                    return Ok(ReservedProductFiles {
                        metadata_path: dir
                            .join(Self::complete_file_name(filename, version, "emd")),
                        data_path,
                        version: version.to_string(),
                    });
                }
                // Lost the race for this version; try the next one.
                version += 1;
            }
        }
        Err(NamingError::Exhausted(filename.to_string()))
    }
}
