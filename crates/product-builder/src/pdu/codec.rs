// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PDU header codec.
//!
//! Pure translation between a packet's user-data bytes and [`DecodedPdu`].
//! Every field read is bounds-checked; a short buffer is a hard decode
//! failure, never a silent default.

use super::{
    CommandedHeader, DecodedPdu, EndOfFile, PduBody, PduHeader, PduType, SequenceWidth,
};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use thiserror::Error;

/// Version bits written into the first header byte (CFDP version 1).
const HEADER_VERSION_BITS: u8 = 0x20;

/// File directive codes.
const DIRECTIVE_METADATA: u8 = 0x07;
const DIRECTIVE_END_OF_FILE: u8 = 0x04;

/// Directive (1) + condition (1) + checksum (4) + file size (4).
const END_OF_FILE_LENGTH: u16 = 10;

/// Offset field in front of file data.
const DATA_OFFSET_LENGTH: usize = 4;

/// Decode failures. All of them reject only the part being decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated PDU: {field} needs {needed} bytes, {available} available")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("invalid transaction sequence number width code {0}")]
    InvalidSequenceWidth(u8),

    #[error("part offset {offset} exceeds maximum allowed offset {max} (probable flight software defect)")]
    OffsetOutOfRange { offset: u64, max: u64 },
}

/// Encode failures.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("{field} value {value} does not fit the wire field")]
    FieldOverflow { field: &'static str, value: u64 },

    #[error("transaction sequence number {value} does not fit a {width}-byte field")]
    SequenceOverflow { value: u64, width: usize },

    #[error("header data length {declared} disagrees with body length {actual}")]
    LengthMismatch { declared: u16, actual: usize },

    #[error("PDU type bit disagrees with a {0} body")]
    TypeMismatch(super::PduVariant),

    #[error("metadata PDU must be part 0, got part {0}")]
    MetadataPartNumber(u32),

    #[error("end-of-file PDU cannot be part 0")]
    EndAsPartZero,

    #[error("filename of {0} bytes exceeds 255")]
    FilenameTooLong(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bounds-checked big-endian reader over a PDU buffer.
struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let available = self.remaining();
        if n > available {
            return Err(DecodeError::Truncated {
                field,
                needed: n,
                available,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn skip(&mut self, n: usize, field: &'static str) -> Result<(), DecodeError> {
        self.take(n, field).map(|_| ())
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(1, field)?[0])
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        Ok(BigEndian::read_u16(self.take(2, field)?))
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        Ok(BigEndian::read_u32(self.take(4, field)?))
    }
}

/// Stateless product PDU codec.
#[derive(Debug, Clone, Copy)]
pub struct PduCodec {
    max_part_offset: u64,
    use_upper_63_tsn_bits: bool,
}

impl PduCodec {
    /// Create a codec rejecting data offsets above `max_part_offset`.
    pub fn new(max_part_offset: u64) -> Self {
        Self {
            max_part_offset,
            use_upper_63_tsn_bits: false,
        }
    }

    /// Interpret 8-byte transaction sequence numbers as their upper 63 bits.
    pub fn with_upper_63_tsn_bits(mut self, enabled: bool) -> Self {
        self.use_upper_63_tsn_bits = enabled;
        self
    }

    pub fn max_part_offset(&self) -> u64 {
        self.max_part_offset
    }

    /// Reject offsets the builder must never allocate for.
    pub fn check_offset(&self, offset: u64) -> Result<(), DecodeError> {
        if offset > self.max_part_offset {
            return Err(DecodeError::OffsetOutOfRange {
                offset,
                max: self.max_part_offset,
            });
        }
        Ok(())
    }

    /// Decode one product PDU starting at `offset` in `buf`.
    ///
    /// `commanded` selects the commanded-product header variant (three
    /// extra 16-bit words after the part counters). Returns the PDU and the
    /// number of bytes consumed.
    pub fn decode(
        &self,
        buf: &[u8],
        offset: usize,
        commanded: bool,
    ) -> Result<(DecodedPdu, usize), DecodeError> {
        let input = buf.get(offset..).ok_or(DecodeError::Truncated {
            field: "PDU start",
            needed: offset,
            available: buf.len(),
        })?;
        let mut r = FieldReader::new(input);

        // The metadata PDU is not counted as a data part and is part 0.
        let total_parts = u32::from(r.u16("total part count")?).saturating_sub(1);
        let part_number = u32::from(r.u16("part number")?).saturating_sub(1);

        let commanded = if commanded {
            Some(CommandedHeader {
                sequence_id: r.u16("sequence id")?,
                sequence_version: r.u16("sequence version")?,
                command_number: r.u16("command number")?,
            })
        } else {
            None
        };

        let header = self.read_common_header(&mut r)?;
        tracing::debug!(
            total_parts,
            part_number,
            pdu_type = ?header.pdu_type,
            data_length = header.data_length,
            transaction = header.transaction_sequence,
            "decoded PDU header"
        );

        let body = match (header.pdu_type, part_number) {
            (PduType::FileDirective, 0) => {
                r.skip(2, "metadata directive and segmentation flags")?;
                let file_size = r.u32("metadata file size")?;
                let source_len = r.u8("source filename length")? as usize;
                let source = r.take(source_len, "source filename")?;
                let dest_len = r.u8("destination filename length")? as usize;
                let dest = r.take(dest_len, "destination filename")?;
                PduBody::Metadata {
                    file_size,
                    source_filename: String::from_utf8_lossy(source).into_owned(),
                    destination_filename: String::from_utf8_lossy(dest).into_owned(),
                }
            }
            (PduType::FileData, _) => {
                let offset = r.u32("data offset")?;
                self.check_offset(offset as u64)?;
                let length = (header.data_length as usize).saturating_sub(DATA_OFFSET_LENGTH);
                let data = r.take(length, "part data")?.to_vec();

                // Anything beyond a trailing pad byte is a piggy-backed EOF PDU.
                if r.remaining() >= 2 {
                    let end = Self::read_piggybacked_end(&mut r)?;
                    PduBody::DataAndEnd { offset, data, end }
                } else {
                    PduBody::Data { offset, data }
                }
            }
            (PduType::FileDirective, _) => PduBody::End(Self::read_end_of_file(&mut r)?),
        };

        let pdu = DecodedPdu {
            total_parts,
            part_number,
            commanded,
            header,
            body,
        };
        Ok((pdu, input.len() - r.remaining()))
    }

    fn read_common_header(&self, r: &mut FieldReader<'_>) -> Result<PduHeader, DecodeError> {
        let pdu_type = PduType::from_flags(r.u8("PDU flags")?);
        let data_length = r.u16("PDU data length")?;
        let code = r.u8("transaction sequence width")?;
        let sequence_width =
            SequenceWidth::from_code(code).ok_or(DecodeError::InvalidSequenceWidth(code & 0x07))?;
        let source_entity_id = r.u8("source entity id")?;
        let raw = r.take(sequence_width.bytes(), "transaction sequence number")?;
        let transaction_sequence = match sequence_width {
            SequenceWidth::One => u64::from(raw[0]),
            SequenceWidth::Two => u64::from(BigEndian::read_u16(raw)),
            SequenceWidth::Four => u64::from(BigEndian::read_u32(raw)),
            SequenceWidth::Eight => {
                let value = BigEndian::read_u64(raw);
                if self.use_upper_63_tsn_bits {
                    value >> 1
                } else {
                    value
                }
            }
        };
        let destination_entity_id = r.u8("destination entity id")?;

        Ok(PduHeader {
            pdu_type,
            data_length,
            sequence_width,
            source_entity_id,
            transaction_sequence,
            destination_entity_id,
        })
    }

    fn read_piggybacked_end(r: &mut FieldReader<'_>) -> Result<EndOfFile, DecodeError> {
        r.skip(3, "EOF PDU flags and data length")?;
        let code = r.u8("EOF PDU transaction sequence width")?;
        let width =
            SequenceWidth::from_code(code).ok_or(DecodeError::InvalidSequenceWidth(code & 0x07))?;
        r.skip(1, "EOF PDU source entity id")?;
        r.skip(width.bytes(), "EOF PDU transaction sequence number")?;
        r.skip(1, "EOF PDU destination entity id")?;
        Self::read_end_of_file(r)
    }

    fn read_end_of_file(r: &mut FieldReader<'_>) -> Result<EndOfFile, DecodeError> {
        r.skip(2, "EOF directive and condition code")?;
        let checksum = r.u32("EOF checksum")?;
        let file_size = r.u32("EOF file size")?;
        Ok(EndOfFile {
            checksum,
            file_size,
        })
    }

    /// Encode a PDU; the exact inverse of [`PduCodec::decode`].
    pub fn encode(&self, pdu: &DecodedPdu) -> Result<Vec<u8>, EncodeError> {
        Self::validate_shape(pdu)?;

        let mut buf = Vec::with_capacity(32 + pdu.part_length());
        buf.write_u16::<BigEndian>(wire_u16("total part count", u64::from(pdu.total_parts) + 1)?)?;
        buf.write_u16::<BigEndian>(wire_u16("part number", u64::from(pdu.part_number) + 1)?)?;

        if let Some(cmd) = pdu.commanded {
            buf.write_u16::<BigEndian>(cmd.sequence_id)?;
            buf.write_u16::<BigEndian>(cmd.sequence_version)?;
            buf.write_u16::<BigEndian>(cmd.command_number)?;
        }

        self.write_common_header(&mut buf, &pdu.header, pdu.header.data_length)?;

        match &pdu.body {
            PduBody::Metadata {
                file_size,
                source_filename,
                destination_filename,
            } => {
                buf.write_u8(DIRECTIVE_METADATA)?;
                buf.write_u8(0)?;
                buf.write_u32::<BigEndian>(*file_size)?;
                write_filename(&mut buf, source_filename)?;
                write_filename(&mut buf, destination_filename)?;
            }
            PduBody::Data { offset, data } => {
                buf.write_u32::<BigEndian>(*offset)?;
                buf.extend_from_slice(data);
            }
            PduBody::End(end) => write_end_of_file(&mut buf, end)?,
            PduBody::DataAndEnd { offset, data, end } => {
                buf.write_u32::<BigEndian>(*offset)?;
                buf.extend_from_slice(data);
                let end_header = PduHeader {
                    pdu_type: PduType::FileDirective,
                    data_length: END_OF_FILE_LENGTH,
                    ..pdu.header.clone()
                };
                self.write_common_header(&mut buf, &end_header, END_OF_FILE_LENGTH)?;
                write_end_of_file(&mut buf, end)?;
            }
        }

        Ok(buf)
    }

    fn validate_shape(pdu: &DecodedPdu) -> Result<(), EncodeError> {
        let variant = pdu.variant();
        let expected_type = if variant.carries_data() {
            PduType::FileData
        } else {
            PduType::FileDirective
        };
        if pdu.header.pdu_type != expected_type {
            return Err(EncodeError::TypeMismatch(variant));
        }

        match pdu.body {
            PduBody::Metadata { .. } if pdu.part_number != 0 => {
                return Err(EncodeError::MetadataPartNumber(pdu.part_number));
            }
            PduBody::End(_) if pdu.part_number == 0 => return Err(EncodeError::EndAsPartZero),
            _ => {}
        }

        let actual = body_length(&pdu.body);
        if actual != pdu.header.data_length as usize {
            return Err(EncodeError::LengthMismatch {
                declared: pdu.header.data_length,
                actual,
            });
        }
        Ok(())
    }

    fn write_common_header(
        &self,
        buf: &mut Vec<u8>,
        header: &PduHeader,
        data_length: u16,
    ) -> Result<(), EncodeError> {
        buf.write_u8(HEADER_VERSION_BITS | header.pdu_type.bit())?;
        buf.write_u16::<BigEndian>(data_length)?;
        buf.write_u8(header.sequence_width.code())?;
        buf.write_u8(header.source_entity_id)?;

        let value = header.transaction_sequence;
        let width = header.sequence_width;
        let overflow = EncodeError::SequenceOverflow {
            value,
            width: width.bytes(),
        };
        match width {
            SequenceWidth::One => buf.write_u8(u8::try_from(value).map_err(|_| overflow)?)?,
            SequenceWidth::Two => {
                buf.write_u16::<BigEndian>(u16::try_from(value).map_err(|_| overflow)?)?
            }
            SequenceWidth::Four => {
                buf.write_u32::<BigEndian>(u32::try_from(value).map_err(|_| overflow)?)?
            }
            SequenceWidth::Eight if self.use_upper_63_tsn_bits => {
                if value > u64::MAX >> 1 {
                    return Err(overflow);
                }
                buf.write_u64::<BigEndian>(value << 1)?
            }
            SequenceWidth::Eight => buf.write_u64::<BigEndian>(value)?,
        }

        buf.write_u8(header.destination_entity_id)?;
        Ok(())
    }
}

impl Default for PduCodec {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_PART_OFFSET)
    }
}

/// PDU data-field length implied by a body, saturated to the wire width.
pub(crate) fn body_data_length(body: &PduBody) -> u16 {
    u16::try_from(body_length(body)).unwrap_or(u16::MAX)
}

fn body_length(body: &PduBody) -> usize {
    match body {
        PduBody::Metadata {
            source_filename,
            destination_filename,
            ..
        } => 2 + 4 + 1 + source_filename.len() + 1 + destination_filename.len(),
        PduBody::Data { data, .. } | PduBody::DataAndEnd { data, .. } => {
            DATA_OFFSET_LENGTH + data.len()
        }
        PduBody::End(_) => END_OF_FILE_LENGTH as usize,
    }
}

fn wire_u16(field: &'static str, value: u64) -> Result<u16, EncodeError> {
    u16::try_from(value).map_err(|_| EncodeError::FieldOverflow { field, value })
}

fn write_filename(buf: &mut Vec<u8>, name: &str) -> Result<(), EncodeError> {
    let len = u8::try_from(name.len()).map_err(|_| EncodeError::FilenameTooLong(name.len()))?;
    buf.write_u8(len)?;
    buf.extend_from_slice(name.as_bytes());
    Ok(())
}

fn write_end_of_file(buf: &mut Vec<u8>, end: &EndOfFile) -> Result<(), EncodeError> {
    buf.write_u8(DIRECTIVE_END_OF_FILE)?;
    buf.write_u8(0)?;
    buf.write_u32::<BigEndian>(end.checksum)?;
    buf.write_u32::<BigEndian>(end.file_size)?;
    Ok(())
}
