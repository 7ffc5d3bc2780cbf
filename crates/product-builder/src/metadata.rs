// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-transaction product metadata.
//!
//! Created from the first part of a transaction, refined by every later part
//! and by the finalizer, then written next to the product data as JSON.

use crate::adaptation::Dvt;
use crate::part::{ProductPart, Sclk, TransactionId};
use crate::pdu::CommandedHeader;
use crate::trigger::AssemblyTrigger;
use crate::txlog::PartRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

/// Finalize-time classification of a product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroundStatus {
    #[default]
    Unknown,
    Partial,
    CompleteChecksumPass,
    CompleteNoChecksum,
    PartialChecksumFail,
}

impl GroundStatus {
    /// True for the two complete outcomes.
    pub fn is_complete(self) -> bool {
        matches!(self, Self::CompleteChecksumPass | Self::CompleteNoChecksum)
    }
}

impl fmt::Display for GroundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "UNKNOWN",
            Self::Partial => "PARTIAL",
            Self::CompleteChecksumPass => "COMPLETE_CHECKSUM_PASS",
            Self::CompleteNoChecksum => "COMPLETE_NO_CHECKSUM",
            Self::PartialChecksumFail => "PARTIAL_CHECKSUM_FAIL",
        };
        f.write_str(name)
    }
}

/// Accumulated description of one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductMetadata {
    pub transaction_id: TransactionId,
    pub filename: String,
    pub directory_name: String,
    pub dvt: Option<Dvt>,
    pub vcid: u32,
    pub apid: u16,
    pub scid: u16,
    pub relay_scid: u16,
    pub source_entity_id: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commanded: Option<CommandedHeader>,

    /// Flight total minus the metadata PDU, possibly corrected by an End PDU.
    pub total_parts: u32,
    /// Distinct PDUs recorded for the transaction, duplicates included.
    pub parts_received: u32,

    /// Size reported by flight.
    pub file_size: Option<u32>,
    /// Checksum reported by flight in the End PDU.
    pub checksum: Option<u32>,
    pub actual_file_size: Option<u64>,
    pub actual_checksum: Option<u32>,

    pub ground_status: GroundStatus,
    pub is_partial: bool,
    pub assembly_trigger: Option<AssemblyTrigger>,

    pub first_part_ert: DateTime<Utc>,
    pub last_part_ert: DateTime<Utc>,
    pub first_part_scet: Option<DateTime<Utc>>,
    pub first_part_sclk: Sclk,
    pub first_part_lst: Option<String>,
    pub assembled_at: Option<DateTime<Utc>>,
}

impl ProductMetadata {
    /// Fresh metadata for the transaction `part` opens.
    pub fn new(part: &ProductPart) -> Self {
        let packet = &part.packet;
        Self {
            transaction_id: part.transaction_id.clone(),
            filename: part.filename.clone(),
            directory_name: part.transaction_id.scope.clone(),
            dvt: part.dvt,
            vcid: packet.vcid,
            apid: packet.apid,
            scid: packet.scid,
            relay_scid: packet.relay_scid,
            source_entity_id: part.source_entity_id(),
            commanded: part.pdu.commanded,
            total_parts: part.pdu.total_parts,
            parts_received: 0,
            file_size: None,
            checksum: None,
            actual_file_size: None,
            actual_checksum: None,
            ground_status: GroundStatus::Unknown,
            is_partial: false,
            assembly_trigger: None,
            first_part_ert: packet.ert,
            last_part_ert: packet.ert,
            first_part_scet: packet.scet,
            first_part_sclk: packet.sclk,
            first_part_lst: packet.lst.clone(),
            assembled_at: None,
        }
    }

    /// Fold one received part into the metadata.
    pub fn absorb(&mut self, record: &PartRecord) {
        self.parts_received += 1;

        // A parsed name beats a synthesized one; a synthesized one is never
        // allowed to replace a parsed one.
        if record.dvt.is_some() || (self.dvt.is_none() && record.is_metadata()) {
            self.filename = record.filename.clone();
            self.dvt = record.dvt;
        }
        if record.commanded.is_some() {
            self.commanded = record.commanded;
        }
        if record.is_metadata() {
            self.total_parts = record.total_parts;
        }
        if let Some(size) = record.reported_file_size {
            self.file_size = Some(size);
        }
        if let Some(end) = record.end_of_file {
            self.checksum = Some(end.checksum);
        }

        let ert = record.storage.ert;
        if ert < self.first_part_ert {
            self.first_part_ert = ert;
        }
        if ert > self.last_part_ert {
            self.last_part_ert = ert;
        }
    }

    /// Write the metadata as pretty JSON.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> io::Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
