// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Product PDU model.
//!
//! A product part arrives as the user data of a downlink packet, already
//! stripped of the primary and secondary packet headers. The layout is:
//!
//! ```text
//! +-----------------------------------------------------------------+
//! | total parts (2) | part number (2) | [seq id (2) | seq ver (2) |  |
//! |                                      cmd number (2)] commanded  |
//! +-----------------------------------------------------------------+
//! |                    Common PDU header                            |
//! | flags (1) | data length (2) | widths (1) | source entity (1) |  |
//! | transaction seq (1/2/4/8) | destination entity (1)              |
//! +-----------------------------------------------------------------+
//! | Metadata: directive (1) | seg (1) | file size (4) |             |
//! |           src len (1) | src name | dst len (1) | dst name       |
//! | Data:     offset (4) | payload (data length - 4)                |
//! |           [piggy-backed End PDU with its own common header]     |
//! | End:      directive (1) | condition (1) | checksum (4) | size (4)|
//! +-----------------------------------------------------------------+
//! ```
//!
//! All multi-byte fields are big-endian.

pub mod codec;

pub use codec::{DecodeError, EncodeError, PduCodec};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Shape of a decoded product PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PduVariant {
    /// Metadata PDU (always part 0).
    Metadata,
    /// File data PDU.
    Data,
    /// Standalone end-of-file PDU.
    End,
    /// File data PDU with an end-of-file PDU piggy-backed behind it.
    DataAndEnd,
}

impl PduVariant {
    /// True for `End` and `DataAndEnd`.
    pub fn is_end(self) -> bool {
        matches!(self, Self::End | Self::DataAndEnd)
    }

    /// True for variants that carry file bytes.
    pub fn carries_data(self) -> bool {
        matches!(self, Self::Data | Self::DataAndEnd)
    }
}

impl fmt::Display for PduVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Metadata => "METADATA",
            Self::Data => "DATA",
            Self::End => "END",
            Self::DataAndEnd => "DATA_END",
        };
        f.write_str(name)
    }
}

/// PDU type bit of the common header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PduType {
    /// File directive (metadata, end-of-file).
    FileDirective,
    /// File data.
    FileData,
}

impl PduType {
    /// Mask selecting the type bit in the first header byte.
    pub const MASK: u8 = 0x10;

    pub fn from_flags(flags: u8) -> Self {
        if flags & Self::MASK == 0 {
            Self::FileDirective
        } else {
            Self::FileData
        }
    }

    pub fn bit(self) -> u8 {
        match self {
            Self::FileDirective => 0,
            Self::FileData => Self::MASK,
        }
    }
}

/// Width of the transaction sequence number field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceWidth {
    One,
    Two,
    Four,
    Eight,
}

impl SequenceWidth {
    /// Decode from the low 3 bits of the widths byte (value + 1 = bytes).
    pub fn from_code(code: u8) -> Option<Self> {
        match (code & 0x07) + 1 {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            4 => Some(Self::Four),
            8 => Some(Self::Eight),
            _ => None,
        }
    }

    /// Encoded 3-bit code.
    pub fn code(self) -> u8 {
        (self.bytes() - 1) as u8
    }

    /// Field width in bytes.
    pub fn bytes(self) -> usize {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Four => 4,
            Self::Eight => 8,
        }
    }

    /// Largest sequence number representable at this width.
    pub fn max_value(self) -> u64 {
        match self {
            Self::One => u8::MAX as u64,
            Self::Two => u16::MAX as u64,
            Self::Four => u32::MAX as u64,
            Self::Eight => u64::MAX,
        }
    }

    /// Smallest width able to hold `value`.
    pub fn for_value(value: u64) -> Self {
        if value <= u8::MAX as u64 {
            Self::One
        } else if value <= u16::MAX as u64 {
            Self::Two
        } else if value <= u32::MAX as u64 {
            Self::Four
        } else {
            Self::Eight
        }
    }
}

/// Common PDU header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduHeader {
    pub pdu_type: PduType,
    /// PDU data field length in bytes.
    pub data_length: u16,
    pub sequence_width: SequenceWidth,
    pub source_entity_id: u8,
    /// Transaction sequence number (already shifted when the 63-bit quirk is on).
    pub transaction_sequence: u64,
    pub destination_entity_id: u8,
}

/// Extra header words present on commanded (non-streaming) products.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandedHeader {
    pub sequence_id: u16,
    pub sequence_version: u16,
    pub command_number: u16,
}

/// End-of-file values reported by flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndOfFile {
    pub checksum: u32,
    pub file_size: u32,
}

/// Type-specific PDU content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PduBody {
    Metadata {
        file_size: u32,
        source_filename: String,
        destination_filename: String,
    },
    Data {
        offset: u32,
        data: Vec<u8>,
    },
    End(EndOfFile),
    DataAndEnd {
        offset: u32,
        data: Vec<u8>,
        end: EndOfFile,
    },
}

/// One fully decoded product PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPdu {
    /// Flight-reported part count, not counting the metadata PDU.
    pub total_parts: u32,
    /// Part ordinal; the metadata PDU is part 0.
    pub part_number: u32,
    pub commanded: Option<CommandedHeader>,
    pub header: PduHeader,
    pub body: PduBody,
}

impl DecodedPdu {
    /// Build a metadata PDU with a consistent header length.
    pub fn metadata(
        total_parts: u32,
        transaction_sequence: u64,
        source_entity_id: u8,
        file_size: u32,
        source_filename: impl Into<String>,
        destination_filename: impl Into<String>,
    ) -> Self {
        let body = PduBody::Metadata {
            file_size,
            source_filename: source_filename.into(),
            destination_filename: destination_filename.into(),
        };
        Self::with_body(total_parts, 0, transaction_sequence, source_entity_id, body)
    }

    /// Build a data PDU with a consistent header length.
    pub fn data(
        total_parts: u32,
        part_number: u32,
        transaction_sequence: u64,
        source_entity_id: u8,
        offset: u32,
        data: Vec<u8>,
    ) -> Self {
        let body = PduBody::Data { offset, data };
        Self::with_body(
            total_parts,
            part_number,
            transaction_sequence,
            source_entity_id,
            body,
        )
    }

    /// Build a standalone end-of-file PDU.
    pub fn end(
        total_parts: u32,
        part_number: u32,
        transaction_sequence: u64,
        source_entity_id: u8,
        checksum: u32,
        file_size: u32,
    ) -> Self {
        let body = PduBody::End(EndOfFile {
            checksum,
            file_size,
        });
        Self::with_body(
            total_parts,
            part_number,
            transaction_sequence,
            source_entity_id,
            body,
        )
    }

    /// Build a data PDU carrying a piggy-backed end-of-file PDU.
    #[allow(clippy::too_many_arguments)]
    pub fn data_and_end(
        total_parts: u32,
        part_number: u32,
        transaction_sequence: u64,
        source_entity_id: u8,
        offset: u32,
        data: Vec<u8>,
        checksum: u32,
        file_size: u32,
    ) -> Self {
        let body = PduBody::DataAndEnd {
            offset,
            data,
            end: EndOfFile {
                checksum,
                file_size,
            },
        };
        Self::with_body(
            total_parts,
            part_number,
            transaction_sequence,
            source_entity_id,
            body,
        )
    }

    fn with_body(
        total_parts: u32,
        part_number: u32,
        transaction_sequence: u64,
        source_entity_id: u8,
        body: PduBody,
    ) -> Self {
        let pdu_type = match body {
            PduBody::Data { .. } | PduBody::DataAndEnd { .. } => PduType::FileData,
            PduBody::Metadata { .. } | PduBody::End(_) => PduType::FileDirective,
        };
        let header = PduHeader {
            pdu_type,
            data_length: codec::body_data_length(&body),
            sequence_width: SequenceWidth::for_value(transaction_sequence),
            source_entity_id,
            transaction_sequence,
            destination_entity_id: 0,
        };
        Self {
            total_parts,
            part_number,
            commanded: None,
            header,
            body,
        }
    }

    /// Force a particular sequence number width.
    pub fn with_sequence_width(mut self, width: SequenceWidth) -> Self {
        self.header.sequence_width = width;
        self
    }

    /// Attach commanded-product header words.
    pub fn with_commanded(mut self, commanded: CommandedHeader) -> Self {
        self.commanded = Some(commanded);
        self
    }

    pub fn variant(&self) -> PduVariant {
        match self.body {
            PduBody::Metadata { .. } => PduVariant::Metadata,
            PduBody::Data { .. } => PduVariant::Data,
            PduBody::End(_) => PduVariant::End,
            PduBody::DataAndEnd { .. } => PduVariant::DataAndEnd,
        }
    }

    /// Target byte offset in the assembled file (0 for directive PDUs).
    pub fn part_offset(&self) -> u64 {
        match self.body {
            PduBody::Data { offset, .. } | PduBody::DataAndEnd { offset, .. } => offset as u64,
            _ => 0,
        }
    }

    /// File bytes carried by this PDU.
    pub fn file_data(&self) -> &[u8] {
        match &self.body {
            PduBody::Data { data, .. } | PduBody::DataAndEnd { data, .. } => data,
            _ => &[],
        }
    }

    pub fn part_length(&self) -> usize {
        self.file_data().len()
    }

    pub fn end_of_file(&self) -> Option<EndOfFile> {
        match self.body {
            PduBody::End(end) | PduBody::DataAndEnd { end, .. } => Some(end),
            _ => None,
        }
    }

    /// File size as reported by the metadata or end-of-file PDU.
    pub fn reported_file_size(&self) -> Option<u32> {
        match self.body {
            PduBody::Metadata { file_size, .. } => Some(file_size),
            PduBody::End(end) | PduBody::DataAndEnd { end, .. } => Some(end.file_size),
            PduBody::Data { .. } => None,
        }
    }

    pub fn destination_filename(&self) -> Option<&str> {
        match &self.body {
            PduBody::Metadata {
                destination_filename,
                ..
            } => Some(destination_filename),
            _ => None,
        }
    }
}
