// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packet capture files (.tlmcap).
//!
//! A capture holds product packets as handed over by the packet layer:
//! sideband fields plus the user-data payload.
//!
//! ```text
//! +---------------------------------------------------------+
//! | Magic "TLMCAP\0\0" (8) | Version (2)                    |
//! +---------------------------------------------------------+
//! | Record: vcid (4) | apid (2) | scid (2) | relay scid (2) |
//! |   seq (2) | grouping (1) | ert nanos (8) | scet flag (1)|
//! |   [scet nanos (8)] | sclk coarse (4) | sclk fine (4)    |
//! |   type len (1) | type | lst len (1) | lst               |
//! |   payload len (4) | payload                             |
//! +---------------------------------------------------------+
//! | Record ...                                              |
//! +---------------------------------------------------------+
//! ```
//!
//! All integers are big-endian. A zero-length type or LST string means absent.

use crate::part::{PacketInfo, Sclk};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use thiserror::Error;

/// Magic bytes: "TLMCAP\0\0"
pub const MAGIC: [u8; 8] = *b"TLMCAP\0\0";

/// Current format version.
pub const FORMAT_VERSION: u16 = 1;

/// Largest payload accepted in one record.
pub const MAX_PAYLOAD: u32 = 1 << 20;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not a capture file (bad magic)")]
    BadMagic,

    #[error("unsupported capture version {0}")]
    UnsupportedVersion(u16),

    #[error("record payload of {0} bytes exceeds limit")]
    PayloadTooLarge(u32),

    #[error("string field longer than 255 bytes")]
    StringTooLong,

    #[error("timestamp out of range")]
    BadTimestamp,
}

/// One captured packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPacket {
    pub info: PacketInfo,
    pub payload: Vec<u8>,
}

/// Writes capture files.
pub struct CaptureWriter<W: Write> {
    inner: W,
    records: u64,
}

impl CaptureWriter<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write> CaptureWriter<W> {
    pub fn new(mut inner: W) -> Result<Self, CaptureError> {
        inner.write_all(&MAGIC)?;
        inner.write_u16::<BigEndian>(FORMAT_VERSION)?;
        Ok(Self { inner, records: 0 })
    }

    pub fn write_packet(&mut self, info: &PacketInfo, payload: &[u8]) -> Result<(), CaptureError> {
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|n| *n <= MAX_PAYLOAD)
            .ok_or(CaptureError::PayloadTooLarge(payload.len().min(u32::MAX as usize) as u32))?;

        let w = &mut self.inner;
        w.write_u32::<BigEndian>(info.vcid)?;
        w.write_u16::<BigEndian>(info.apid)?;
        w.write_u16::<BigEndian>(info.scid)?;
        w.write_u16::<BigEndian>(info.relay_scid)?;
        w.write_u16::<BigEndian>(info.packet_sequence)?;
        w.write_u8(info.grouping_flags)?;
        w.write_i64::<BigEndian>(to_nanos(info.ert)?)?;
        match info.scet {
            Some(scet) => {
                w.write_u8(1)?;
                w.write_i64::<BigEndian>(to_nanos(scet)?)?;
            }
            None => w.write_u8(0)?,
        }
        w.write_u32::<BigEndian>(info.sclk.coarse)?;
        w.write_u32::<BigEndian>(info.sclk.fine)?;
        write_str(w, info.product_type.as_deref())?;
        write_str(w, info.lst.as_deref())?;
        w.write_u32::<BigEndian>(len)?;
        w.write_all(payload)?;

        self.records += 1;
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    /// Flush and return the underlying writer.
    pub fn finish(mut self) -> Result<W, CaptureError> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Reads capture files.
pub struct CaptureReader<R: Read> {
    inner: R,
}

impl CaptureReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read> CaptureReader<R> {
    pub fn new(mut inner: R) -> Result<Self, CaptureError> {
        let mut magic = [0u8; 8];
        inner.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(CaptureError::BadMagic);
        }
        let version = inner.read_u16::<BigEndian>()?;
        if version != FORMAT_VERSION {
            return Err(CaptureError::UnsupportedVersion(version));
        }
        Ok(Self { inner })
    }

    /// Read the next record; `Ok(None)` at a clean end of file.
    pub fn read_packet(&mut self) -> Result<Option<CapturedPacket>, CaptureError> {
        let vcid = match self.inner.read_u32::<BigEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let r = &mut self.inner;
        let apid = r.read_u16::<BigEndian>()?;
        let scid = r.read_u16::<BigEndian>()?;
        let relay_scid = r.read_u16::<BigEndian>()?;
        let packet_sequence = r.read_u16::<BigEndian>()?;
        let grouping_flags = r.read_u8()?;
        let ert = from_nanos(r.read_i64::<BigEndian>()?);
        let scet = match r.read_u8()? {
            0 => None,
            _ => Some(from_nanos(r.read_i64::<BigEndian>()?)),
        };
        let sclk = Sclk {
            coarse: r.read_u32::<BigEndian>()?,
            fine: r.read_u32::<BigEndian>()?,
        };
        let product_type = read_str(r)?;
        let lst = read_str(r)?;

        let len = r.read_u32::<BigEndian>()?;
        if len > MAX_PAYLOAD {
            return Err(CaptureError::PayloadTooLarge(len));
        }
        let mut payload = vec![0u8; len as usize];
        r.read_exact(&mut payload)?;

        Ok(Some(CapturedPacket {
            info: PacketInfo {
                vcid,
                apid,
                scid,
                relay_scid,
                packet_sequence,
                grouping_flags,
                ert,
                scet,
                sclk,
                lst,
                product_type,
            },
            payload,
        }))
    }

    pub fn packets(self) -> CapturedPackets<R> {
        CapturedPackets { reader: self }
    }
}

/// Iterator over capture records.
pub struct CapturedPackets<R: Read> {
    reader: CaptureReader<R>,
}

impl<R: Read> Iterator for CapturedPackets<R> {
    type Item = Result<CapturedPacket, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_packet().transpose()
    }
}

fn to_nanos(t: DateTime<Utc>) -> Result<i64, CaptureError> {
    t.timestamp_nanos_opt().ok_or(CaptureError::BadTimestamp)
}

fn from_nanos(nanos: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(nanos)
}

fn write_str<W: Write>(w: &mut W, s: Option<&str>) -> Result<(), CaptureError> {
    let s = s.unwrap_or("");
    let len = u8::try_from(s.len()).map_err(|_| CaptureError::StringTooLong)?;
    w.write_u8(len)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn read_str<R: Read>(r: &mut R) -> Result<Option<String>, CaptureError> {
    let len = r.read_u8()? as usize;
    if len == 0 {
        return Ok(None);
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn info() -> PacketInfo {
        PacketInfo {
            vcid: 6,
            apid: 1234,
            scid: 76,
            relay_scid: 0,
            packet_sequence: 42,
            grouping_flags: 3,
            ert: Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap(),
            scet: Some(Utc.with_ymd_and_hms(2026, 3, 4, 4, 0, 0).unwrap()),
            sclk: Sclk {
                coarse: 800_000_000,
                fine: 12,
            },
            lst: Some("SOL-0042M10:00:00".into()),
            product_type: Some("NavImage".into()),
        }
    }

    #[test]
    fn test_write_read_records() {
        let mut writer = CaptureWriter::new(Vec::new()).expect("writer");
        writer.write_packet(&info(), b"first").expect("write");
        let bare = PacketInfo {
            scet: None,
            lst: None,
            product_type: None,
            ..info()
        };
        writer.write_packet(&bare, b"").expect("write");
        assert_eq!(writer.records(), 2);
        let bytes = writer.finish().expect("finish");

        let packets: Vec<_> = CaptureReader::new(Cursor::new(bytes))
            .expect("reader")
            .packets()
            .collect::<Result<_, _>>()
            .expect("read");
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].info, info());
        assert_eq!(packets[0].payload, b"first");
        assert_eq!(packets[1].info, bare);
        assert!(packets[1].payload.is_empty());
    }

    #[test]
    fn test_bad_magic_and_version() {
        assert!(matches!(
            CaptureReader::new(Cursor::new(b"NOTACAP\0\0\x01".to_vec())),
            Err(CaptureError::BadMagic)
        ));

        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[0, 9]);
        assert!(matches!(
            CaptureReader::new(Cursor::new(bytes)),
            Err(CaptureError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_truncated_record_is_error() {
        let mut writer = CaptureWriter::new(Vec::new()).expect("writer");
        writer.write_packet(&info(), b"payload").expect("write");
        let mut bytes = writer.finish().expect("finish");
        bytes.truncate(bytes.len() - 3);

        let mut reader = CaptureReader::new(Cursor::new(bytes)).expect("reader");
        assert!(matches!(reader.read_packet(), Err(CaptureError::Io(_))));
    }

    #[test]
    fn test_capture_file_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pass.tlmcap");

        let mut writer = CaptureWriter::create(&path).expect("create");
        writer.write_packet(&info(), &[1, 2, 3]).expect("write");
        writer.finish().expect("finish");

        let mut reader = CaptureReader::open(&path).expect("open");
        assert_eq!(reader.read_packet().expect("read").expect("record").payload, vec![1, 2, 3]);
        assert!(reader.read_packet().expect("eof").is_none());
    }
}
