// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry Data Product Builder
//!
//! Reassembles file-like data products from the PDU fragments carried in
//! downlink packets:
//! - PDU header decode and encode, including the commanded-header variant
//!   and the 63-bit transaction id encoding
//! - Positional storage of parts into per-transaction scratch files
//! - Append-only transaction event logs with crash replay
//! - Assembly triggering per virtual channel, checksum-verified finalize
//!
//! # Quick Start
//!
//! ```bash
//! # Build products from a packet capture
//! product-ingest --input pass.tlmcap --output ./products --validate-checksum
//!
//! # Inspect an interrupted transaction
//! txlog-dump ./products/active/active-6/NavImage/42
//! ```
//!
//! # Ground Status
//!
//! | Status | Meaning |
//! |--------|---------|
//! | `COMPLETE_CHECKSUM_PASS` | all parts, flight checksum verified |
//! | `COMPLETE_NO_CHECKSUM` | all parts, checksum not verified |
//! | `PARTIAL` | gaps or missing metadata |
//! | `PARTIAL_CHECKSUM_FAIL` | all parts, checksum mismatch |
//! | `UNKNOWN` | complete by count but no assembled data |

pub mod adaptation;
pub mod capture;
pub mod checksum;
pub mod config;
pub mod engine;
pub mod filename_map;
pub mod finalize;
pub mod metadata;
pub mod naming;
pub mod notify;
pub mod part;
pub mod pdu;
pub mod store;
pub mod tracker;
pub mod tracking;
pub mod trigger;
pub mod txlog;

pub use adaptation::{Dvt, MissionAdaptation, ReferenceAdaptation};
pub use capture::{CaptureReader, CaptureWriter, CapturedPacket};
pub use checksum::ChecksumAlgorithm;
pub use config::{BuilderConfig, ConfigBuilder, ConfigError};
pub use engine::{BuilderError, ChannelWorker, EngineBuilder, ProcessOutcome, ProductBuilder};
pub use filename_map::{FilenameMap, InMemoryFilenameMap};
pub use finalize::{FinalizeError, FinalizedProduct, Finalizer, PendingProduct};
pub use metadata::{GroundStatus, ProductMetadata};
pub use naming::{ProductNamer, ReservedProductFiles, VersionedNamer};
pub use notify::{ProductEvents, TracingEvents};
pub use part::{PacketInfo, PartDecoder, ProductPart, Sclk, TransactionId, TransactionKey};
pub use pdu::{DecodeError, DecodedPdu, EncodeError, PduCodec, PduVariant};
pub use store::{PartStore, StorageError, StorageMetadata};
pub use tracker::{PartsTracker, ReceivedPartsTracker};
pub use tracking::{TrackingService, TrackingSnapshot};
pub use trigger::{AssemblyTrigger, TriggerPolicy};
pub use txlog::{LogError, ReplayedTransaction, TransactionEvent, TransactionLog};
