// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Product parts and the decoder that builds them from packets.

use crate::adaptation::{fallback_filename, normalize_filename, Dvt, MissionAdaptation, ReferenceAdaptation};
use crate::config::BuilderConfig;
use crate::filename_map::FilenameMap;
use crate::pdu::{DecodeError, DecodedPdu, PduCodec, PduVariant};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Spacecraft clock value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sclk {
    pub coarse: u32,
    pub fine: u32,
}

impl fmt::Display for Sclk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:05}", self.coarse, self.fine)
    }
}

/// Sideband fields supplied with each packet by the upstream packet layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketInfo {
    pub vcid: u32,
    pub apid: u16,
    pub scid: u16,
    pub relay_scid: u16,
    pub packet_sequence: u16,
    pub grouping_flags: u8,
    /// Earth receive time.
    pub ert: DateTime<Utc>,
    /// Spacecraft event time, when the upstream layer could correlate one.
    pub scet: Option<DateTime<Utc>>,
    pub sclk: Sclk,
    /// Local solar time, for landed missions.
    pub lst: Option<String>,
    /// Product type name from the APID dictionary.
    pub product_type: Option<String>,
}

impl PacketInfo {
    /// Minimal sideband record for a packet received now.
    pub fn new(vcid: u32, apid: u16) -> Self {
        Self {
            vcid,
            apid,
            scid: 0,
            relay_scid: 0,
            packet_sequence: 0,
            grouping_flags: 0b11,
            ert: Utc::now(),
            scet: None,
            sclk: Sclk::default(),
            lst: None,
            product_type: None,
        }
    }

    pub fn with_product_type(mut self, name: impl Into<String>) -> Self {
        self.product_type = Some(name.into());
        self
    }

    /// Directory scope for transactions on this packet's APID.
    pub fn directory_name(&self) -> String {
        match &self.product_type {
            Some(name) => name.clone(),
            None => format!("apid{:04}", self.apid),
        }
    }
}

/// Transaction identity: directory scope plus flight transaction number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId {
    pub scope: String,
    pub sequence: u64,
}

impl TransactionId {
    pub fn new(scope: impl Into<String>, sequence: u64) -> Self {
        Self {
            scope: scope.into(),
            sequence,
        }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.sequence)
    }
}

/// A transaction as seen on one virtual channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionKey {
    pub vcid: u32,
    pub id: TransactionId,
}

impl TransactionKey {
    pub fn new(vcid: u32, id: TransactionId) -> Self {
        Self { vcid, id }
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vc{}:{}", self.vcid, self.id)
    }
}

/// One decoded product fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductPart {
    pub transaction_id: TransactionId,
    pub packet: PacketInfo,
    pub pdu: DecodedPdu,
    /// Product filename, parsed or synthesized.
    pub filename: String,
    /// `None` when the filename had to be synthesized.
    pub dvt: Option<Dvt>,
}

impl ProductPart {
    pub fn key(&self) -> TransactionKey {
        TransactionKey::new(self.packet.vcid, self.transaction_id.clone())
    }

    pub fn vcid(&self) -> u32 {
        self.packet.vcid
    }

    pub fn part_number(&self) -> u32 {
        self.pdu.part_number
    }

    pub fn part_offset(&self) -> u64 {
        self.pdu.part_offset()
    }

    pub fn part_length(&self) -> usize {
        self.pdu.part_length()
    }

    pub fn file_data(&self) -> &[u8] {
        self.pdu.file_data()
    }

    pub fn variant(&self) -> PduVariant {
        self.pdu.variant()
    }

    pub fn source_entity_id(&self) -> u8 {
        self.pdu.header.source_entity_id
    }
}

/// Turns packet payloads into [`ProductPart`]s.
pub struct PartDecoder {
    codec: PduCodec,
    adaptation: Arc<dyn MissionAdaptation>,
    filenames: Arc<dyn FilenameMap>,
}

impl PartDecoder {
    pub fn new(
        codec: PduCodec,
        adaptation: Arc<dyn MissionAdaptation>,
        filenames: Arc<dyn FilenameMap>,
    ) -> Self {
        Self {
            codec,
            adaptation,
            filenames,
        }
    }

    /// Decoder using [`ReferenceAdaptation`] over the given config.
    pub fn from_config(config: &BuilderConfig, filenames: Arc<dyn FilenameMap>) -> Self {
        let codec = PduCodec::new(config.max_part_offset)
            .with_upper_63_tsn_bits(config.use_upper_63_tsn_bits);
        Self::new(
            codec,
            Arc::new(ReferenceAdaptation::from_config(config)),
            filenames,
        )
    }

    pub fn codec(&self) -> &PduCodec {
        &self.codec
    }

    /// Decode the product PDU carried by one packet.
    pub fn decode(&self, packet: PacketInfo, payload: &[u8]) -> Result<ProductPart, DecodeError> {
        let commanded = self.adaptation.has_commanded_header(packet.apid);
        let (pdu, consumed) = self.codec.decode(payload, 0, commanded)?;
        if consumed + 1 < payload.len() {
            tracing::debug!(
                apid = packet.apid,
                trailing = payload.len() - consumed,
                "ignoring trailing bytes after product PDU"
            );
        }

        let sequence = pdu.header.transaction_sequence;
        let candidate = match pdu.destination_filename() {
            Some(destination) => {
                let name = normalize_filename(destination).to_string();
                tracing::debug!(transaction = sequence, filename = %name, "metadata PDU filename");
                Some(name)
            }
            None => self.filenames.get(sequence),
        };

        let parsed = candidate.and_then(|name| {
            let dvt = self.adaptation.parse_filename(&name)?;
            Some((name, dvt))
        });

        let (filename, dvt) = match parsed {
            Some((name, dvt)) => {
                // Only good names are published, so later parts retry the fallback.
                if pdu.variant() == PduVariant::Metadata {
                    self.filenames.insert(sequence, name.clone());
                }
                (name, Some(dvt))
            }
            None => {
                let name = fallback_filename(pdu.header.source_entity_id, sequence, Utc::now());
                if let Some(destination) = pdu.destination_filename() {
                    tracing::warn!(
                        destination,
                        fallback = %name,
                        "product filename does not carry a DVT, using synthesized name"
                    );
                } else {
                    tracing::debug!(fallback = %name, "no filename known for transaction yet");
                }
                (name, None)
            }
        };

        Ok(ProductPart {
            transaction_id: TransactionId::new(packet.directory_name(), sequence),
            packet,
            pdu,
            filename,
            dvt,
        })
    }
}
