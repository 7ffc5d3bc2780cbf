// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! File checksums used to verify assembled products.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Checksum algorithm reported in the End PDU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// CFDP modular checksum: sum of big-endian 32-bit words, mod 2^32.
    #[default]
    Cfdp,
    /// IEEE CRC-32.
    Crc32,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cfdp => f.write_str("cfdp"),
            Self::Crc32 => f.write_str("crc32"),
        }
    }
}

impl ChecksumAlgorithm {
    /// Checksum of an in-memory buffer.
    pub fn compute(self, data: &[u8]) -> u32 {
        let mut state = Checksummer::new(self);
        state.update(data);
        state.finish()
    }

    /// Checksum of a file, streamed.
    pub fn compute_file(self, path: &Path) -> io::Result<u32> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut state = Checksummer::new(self);
        let mut chunk = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            state.update(&chunk[..n]);
        }
        Ok(state.finish())
    }
}

/// Incremental checksum state.
pub struct Checksummer {
    inner: Inner,
}

enum Inner {
    Cfdp { sum: u32, position: u64 },
    Crc32(crc32fast::Hasher),
}

impl Checksummer {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        let inner = match algorithm {
            ChecksumAlgorithm::Cfdp => Inner::Cfdp { sum: 0, position: 0 },
            ChecksumAlgorithm::Crc32 => Inner::Crc32(crc32fast::Hasher::new()),
        };
        Self { inner }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.inner {
            Inner::Cfdp { sum, position } => {
                // Each byte lands in the word lane given by its file position,
                // so chunk boundaries need not be word aligned.
                for &byte in data {
                    let shift = 24 - 8 * (*position % 4) as u32;
                    *sum = sum.wrapping_add(u32::from(byte) << shift);
                    *position += 1;
                }
            }
            Inner::Crc32(hasher) => hasher.update(data),
        }
    }

    pub fn finish(self) -> u32 {
        match self.inner {
            Inner::Cfdp { sum, .. } => sum,
            Inner::Crc32(hasher) => hasher.finalize(),
        }
    }
}
