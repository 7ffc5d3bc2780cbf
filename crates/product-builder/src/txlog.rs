// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Append-only transaction event log.
//!
//! One `events.log` per transaction directory, one JSON object per line.
//! Every line names its event, so a log can be replayed after a crash to
//! rebuild the product metadata and the part inventory.

use crate::adaptation::Dvt;
use crate::metadata::ProductMetadata;
use crate::part::{ProductPart, TransactionId};
use crate::pdu::{CommandedHeader, EndOfFile, PduVariant};
use crate::store::StorageMetadata;
use crate::trigger::AssemblyTrigger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Event log file name inside a transaction directory.
pub const LOG_FILE_NAME: &str = "events.log";

#[derive(Debug, Error)]
pub enum LogError {
    #[error("I/O error on transaction log {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("corrupt transaction log {path} at line {line}: {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("transaction log {0} has no Opened event")]
    NotOpened(PathBuf),
}

/// Everything about a received part needed to rebuild its transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    pub storage: StorageMetadata,
    pub total_parts: u32,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dvt: Option<Dvt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_file_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_of_file: Option<EndOfFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commanded: Option<CommandedHeader>,
}

impl PartRecord {
    pub fn new(part: &ProductPart, storage: StorageMetadata) -> Self {
        Self {
            storage,
            total_parts: part.pdu.total_parts,
            filename: part.filename.clone(),
            dvt: part.dvt,
            reported_file_size: part.pdu.reported_file_size(),
            end_of_file: part.pdu.end_of_file(),
            commanded: part.pdu.commanded,
        }
    }

    pub fn variant(&self) -> PduVariant {
        self.storage.pdu_variant
    }

    pub fn is_metadata(&self) -> bool {
        self.variant() == PduVariant::Metadata
    }
}

/// Transaction lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransactionEvent {
    Opened {
        at: DateTime<Utc>,
        metadata: Box<ProductMetadata>,
    },
    PartReceived {
        at: DateTime<Utc>,
        part: PartRecord,
    },
    AssemblyTriggered {
        at: DateTime<Utc>,
        trigger: AssemblyTrigger,
    },
}

impl TransactionEvent {
    pub fn opened(metadata: &ProductMetadata) -> Self {
        Self::Opened {
            at: Utc::now(),
            metadata: Box::new(metadata.clone()),
        }
    }

    pub fn part_received(part: PartRecord) -> Self {
        Self::PartReceived {
            at: Utc::now(),
            part,
        }
    }

    pub fn assembly_triggered(trigger: AssemblyTrigger) -> Self {
        Self::AssemblyTriggered {
            at: Utc::now(),
            trigger,
        }
    }
}

/// Open handle on a transaction's event log.
#[derive(Debug)]
pub struct TransactionLog {
    path: PathBuf,
    file: File,
}

impl TransactionLog {
    /// Open (creating if needed) the log in `transaction_dir`.
    pub fn open(transaction_dir: &Path) -> Result<Self, LogError> {
        let path = transaction_dir.join(LOG_FILE_NAME);
        let io_err = |source| LogError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(transaction_dir).map_err(io_err)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a single line.
    pub fn append(&mut self, event: &TransactionEvent) -> Result<(), LogError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .and_then(|_| self.file.flush())
            .map_err(|source| LogError::Io {
                path: self.path.clone(),
                source,
            })
    }

    /// Read every event in a log file.
    ///
    /// A torn final line (crash mid-append) is dropped with a warning; a bad
    /// line anywhere else is corruption.
    pub fn read_events(path: &Path) -> Result<Vec<TransactionEvent>, LogError> {
        let io_err = |source| LogError::Io {
            path: path.to_path_buf(),
            source,
        };
        let reader = BufReader::new(File::open(path).map_err(io_err)?);
        let lines = reader
            .lines()
            .collect::<Result<Vec<_>, _>>()
            .map_err(io_err)?;

        let last = lines.len();
        let mut events = Vec::with_capacity(last);
        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(event) => events.push(event),
                Err(e) if idx + 1 == last => {
                    tracing::warn!(path = %path.display(), error = %e, "dropping torn final log line");
                }
                Err(source) => {
                    return Err(LogError::Corrupt {
                        path: path.to_path_buf(),
                        line: idx + 1,
                        source,
                    })
                }
            }
        }
        Ok(events)
    }

    /// Rebuild a transaction's state from the log in `transaction_dir`.
    pub fn replay(transaction_dir: &Path) -> Result<ReplayedTransaction, LogError> {
        let path = transaction_dir.join(LOG_FILE_NAME);
        let events = Self::read_events(&path)?;

        let mut replayed: Option<ReplayedTransaction> = None;
        for event in &events {
            match event {
                TransactionEvent::Opened { metadata, .. } => {
                    // A re-opened transaction restarts its state.
                    replayed = Some(ReplayedTransaction::new(metadata.as_ref().clone()));
                }
                TransactionEvent::PartReceived { part, .. } => {
                    let state = replayed
                        .as_mut()
                        .ok_or_else(|| LogError::NotOpened(path.clone()))?;
                    state.apply_part(part);
                }
                TransactionEvent::AssemblyTriggered { trigger, .. } => {
                    let state = replayed
                        .as_mut()
                        .ok_or_else(|| LogError::NotOpened(path.clone()))?;
                    state.last_trigger = Some(*trigger);
                }
            }
        }

        let mut replayed = replayed.ok_or(LogError::NotOpened(path))?;
        replayed.events = events.len();
        Ok(replayed)
    }
}

/// Transaction state rebuilt from its event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayedTransaction {
    pub transaction_id: TransactionId,
    pub metadata: ProductMetadata,
    /// Data-bearing parts in arrival order.
    pub parts: Vec<StorageMetadata>,
    pub received_metadata: bool,
    pub received_end: bool,
    pub last_trigger: Option<AssemblyTrigger>,
    pub events: usize,
    #[serde(skip)]
    end_adjusted: bool,
}

impl ReplayedTransaction {
    fn new(metadata: ProductMetadata) -> Self {
        Self {
            transaction_id: metadata.transaction_id.clone(),
            metadata,
            parts: Vec::new(),
            received_metadata: false,
            received_end: false,
            last_trigger: None,
            events: 0,
            end_adjusted: false,
        }
    }

    fn apply_part(&mut self, part: &PartRecord) {
        self.metadata.absorb(part);
        let variant = part.variant();
        if variant == PduVariant::Metadata {
            self.received_metadata = true;
            // absorb restored the flight total
            if self.end_adjusted {
                self.metadata.total_parts = self.metadata.total_parts.saturating_sub(1);
            }
        }
        if variant.is_end() {
            self.received_end = true;
            // The End PDU counts itself in the flight total, once.
            if !self.end_adjusted {
                self.metadata.total_parts = self.metadata.total_parts.saturating_sub(1);
                self.end_adjusted = true;
            }
        }
        if variant.carries_data() {
            // Inventory positions are global; the scratch layout is not trusted
            // after a restart.
            self.parts.push(StorageMetadata {
                local_offset: None,
                ..part.storage
            });
        }
    }

    /// Bytes covered by received parts, counting overlaps once per part.
    pub fn bytes_received(&self) -> u64 {
        self.parts.iter().map(|p| p.length).sum()
    }

    /// Distinct data part numbers received.
    pub fn part_numbers(&self) -> std::collections::BTreeSet<u32> {
        self.parts.iter().map(|p| p.part_number).collect()
    }
}
