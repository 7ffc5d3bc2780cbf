// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end product assembly through the engine.
//!
//! Scenarios:
//! - Complete product with checksum pass, mismatch and validation disabled
//! - Gaps, forced partials and end-of-data flushes
//! - Filename fallback and late metadata
//! - Duplicate parts
//! - Product change on a channel, and no phantom change after assembly
//! - Crash replay from the transaction log
//! - Archived scratch directories
//! - Capture file fed through the engine, channels on separate threads

use parking_lot::Mutex;
use product_builder::{
    AssemblyTrigger, BuilderConfig, CaptureReader, CaptureWriter, ConfigBuilder, DecodedPdu,
    FinalizedProduct, GroundStatus, InMemoryFilenameMap, PacketInfo, PduCodec, ProductBuilder,
    ProductEvents, ProductMetadata, TransactionLog,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const FLIGHT_CHECKSUM: u32 = 0x4142_4344;

#[derive(Default)]
struct RecordingEvents {
    started: Mutex<Vec<String>>,
    assembled: Mutex<Vec<FinalizedProduct>>,
}

impl ProductEvents for RecordingEvents {
    fn product_started(&self, metadata: &ProductMetadata) {
        self.started.lock().push(metadata.filename.clone());
    }

    fn product_assembled(&self, product: &FinalizedProduct) {
        self.assembled.lock().push(product.clone());
    }
}

struct Harness {
    root: tempfile::TempDir,
    engine: ProductBuilder,
    events: Arc<RecordingEvents>,
}

impl Harness {
    fn new(configure: impl FnOnce(ConfigBuilder) -> ConfigBuilder) -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let config = configure(BuilderConfig::builder().root_dir(root.path())).build();
        let events = Arc::new(RecordingEvents::default());
        let engine = ProductBuilder::builder(config)
            .events(events.clone())
            .build()
            .expect("engine");
        Self {
            root,
            engine,
            events,
        }
    }

    fn output(&self) -> PathBuf {
        self.root.path().join("products")
    }

    fn transaction_dir(&self, vcid: u32, sequence: u64) -> PathBuf {
        self.root
            .path()
            .join(format!("active/active-{vcid}/NavImage/{sequence}"))
    }
}

fn encode(pdu: &DecodedPdu) -> Vec<u8> {
    PduCodec::default().encode(pdu).expect("encode")
}

fn packet(vcid: u32) -> PacketInfo {
    PacketInfo::new(vcid, 0x123).with_product_type("NavImage")
}

/// Metadata, one data part "ABCD", End.
fn three_part_product(sequence: u64, checksum: u32) -> Vec<DecodedPdu> {
    vec![
        DecodedPdu::metadata(2, sequence, 1, 4, "src", "img_1-2"),
        DecodedPdu::data(2, 1, sequence, 1, 0, b"ABCD".to_vec()),
        DecodedPdu::end(2, 2, sequence, 1, checksum, 4),
    ]
}

fn feed(engine: &ProductBuilder, vcid: u32, pdus: &[DecodedPdu]) -> Vec<FinalizedProduct> {
    let mut worker = engine.channel(vcid).expect("worker");
    let mut finalized = Vec::new();
    for pdu in pdus {
        let outcome = worker.process(packet(vcid), &encode(pdu)).expect("process");
        finalized.extend(outcome.finalized);
    }
    finalized
}

fn only(mut products: Vec<FinalizedProduct>) -> FinalizedProduct {
    assert_eq!(products.len(), 1, "expected exactly one product");
    products.remove(0)
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).expect("file name")
}

// ---------------------------------------------------------------------------
// Complete products
// ---------------------------------------------------------------------------

#[test]
fn test_complete_product_with_checksum_pass() {
    let h = Harness::new(|c| c.validate_checksum(true));
    let product = only(feed(&h.engine, 1, &three_part_product(7, FLIGHT_CHECKSUM)));

    assert_eq!(product.status(), GroundStatus::CompleteChecksumPass);
    assert!(!product.is_partial());
    assert_eq!(product.metadata.filename, "img_1-2");
    assert_eq!(product.metadata.total_parts, 1);
    assert_eq!(product.metadata.file_size, Some(4));
    assert_eq!(product.metadata.actual_checksum, Some(FLIGHT_CHECKSUM));
    assert_eq!(product.metadata.assembly_trigger, Some(AssemblyTrigger::EndPart));

    assert_eq!(
        product.files.data_path,
        h.output().join("NavImage/img_1-2-1.dat")
    );
    assert_eq!(fs::read(&product.files.data_path).expect("read"), b"ABCD");
    let emd = ProductMetadata::read_from(&product.files.metadata_path).expect("emd");
    assert_eq!(emd.ground_status, GroundStatus::CompleteChecksumPass);

    assert!(!h.transaction_dir(1, 7).exists());
    assert!(h.engine.in_progress().is_empty());
    assert_eq!(h.events.started.lock().as_slice(), ["img_1-2"]);
    assert_eq!(h.events.assembled.lock().len(), 1);

    let stats = h.engine.tracking();
    assert_eq!(stats.parts_stored, 3);
    assert_eq!(stats.bytes_stored, 4);
    assert_eq!(stats.products_complete, 1);
}

#[test]
fn test_checksum_mismatch_is_partial() {
    let h = Harness::new(|c| c.validate_checksum(true));
    let product = only(feed(&h.engine, 1, &three_part_product(7, 0xDEAD_BEEF)));

    assert_eq!(product.status(), GroundStatus::PartialChecksumFail);
    assert!(product.is_partial());
    assert_eq!(product.metadata.checksum, Some(0xDEAD_BEEF));
    assert_eq!(product.metadata.actual_checksum, Some(FLIGHT_CHECKSUM));
    assert_eq!(file_name(&product.files.data_path), "img_1-2_Partial-1.1.pdat");
    assert_eq!(file_name(&product.files.metadata_path), "img_1-2_Partial-1.1.pemd");
    assert_eq!(h.engine.tracking().checksum_failures, 1);
}

#[test]
fn test_checksum_not_validated() {
    let h = Harness::new(|c| c.validate_checksum(false));
    let product = only(feed(&h.engine, 1, &three_part_product(7, 0xDEAD_BEEF)));

    assert_eq!(product.status(), GroundStatus::CompleteNoChecksum);
    assert!(!product.is_partial());
    assert_eq!(product.metadata.actual_checksum, None);
}

#[test]
fn test_second_copy_gets_next_version() {
    let h = Harness::new(|c| c);
    let first = only(feed(&h.engine, 1, &three_part_product(7, FLIGHT_CHECKSUM)));
    let second = only(feed(&h.engine, 1, &three_part_product(8, FLIGHT_CHECKSUM)));

    assert_eq!(file_name(&first.files.data_path), "img_1-2-1.dat");
    assert_eq!(file_name(&second.files.data_path), "img_1-2-2.dat");
}

#[test]
fn test_out_of_order_parts_assemble_positionally() {
    let h = Harness::new(|c| c.validate_checksum(true));
    let pdus = [
        DecodedPdu::end(3, 3, 20, 1, FLIGHT_CHECKSUM, 4),
        DecodedPdu::data(3, 2, 20, 1, 2, b"CD".to_vec()),
        DecodedPdu::metadata(3, 20, 1, 4, "src", "img_1-2"),
        DecodedPdu::data(3, 1, 20, 1, 0, b"AB".to_vec()),
    ];
    let product = only(feed(&h.engine, 1, &pdus));

    assert_eq!(product.status(), GroundStatus::CompleteChecksumPass);
    assert_eq!(fs::read(&product.files.data_path).expect("read"), b"ABCD");
}

#[test]
fn test_duplicate_parts_are_idempotent() {
    let h = Harness::new(|c| c.validate_checksum(true));
    let pdus = [
        DecodedPdu::metadata(3, 30, 1, 4, "src", "img_1-2"),
        DecodedPdu::data(3, 1, 30, 1, 0, b"AB".to_vec()),
        DecodedPdu::data(3, 1, 30, 1, 0, b"AB".to_vec()),
        DecodedPdu::data(3, 2, 30, 1, 2, b"CD".to_vec()),
        DecodedPdu::end(3, 3, 30, 1, FLIGHT_CHECKSUM, 4),
    ];
    let product = only(feed(&h.engine, 1, &pdus));

    assert_eq!(product.status(), GroundStatus::CompleteChecksumPass);
    assert_eq!(product.metadata.parts_received, 5);
    assert_eq!(product.metadata.actual_file_size, Some(4));
    assert_eq!(fs::read(&product.files.data_path).expect("read"), b"ABCD");
}

// ---------------------------------------------------------------------------
// Partials
// ---------------------------------------------------------------------------

#[test]
fn test_gap_waits_then_flushes_as_partial() {
    let h = Harness::new(|c| c.validate_checksum(true));
    let pdus = [
        DecodedPdu::metadata(3, 40, 1, 4, "src", "img_1-2"),
        DecodedPdu::data(3, 1, 40, 1, 0, b"AB".to_vec()),
        DecodedPdu::end(3, 3, 40, 1, FLIGHT_CHECKSUM, 4),
    ];
    assert!(feed(&h.engine, 1, &pdus).is_empty());
    assert_eq!(h.engine.in_progress().len(), 1);

    let product = only(h.engine.force_partials().expect("flush"));
    assert_eq!(product.status(), GroundStatus::Partial);
    assert_eq!(product.metadata.assembly_trigger, Some(AssemblyTrigger::EndOfData));
    assert_eq!(file_name(&product.files.data_path), "img_1-2_Partial-1.1.pdat");
    assert_eq!(fs::read(&product.files.data_path).expect("read"), b"AB");
    assert!(h.engine.in_progress().is_empty());
}

#[test]
fn test_force_partial_on_end() {
    let h = Harness::new(|c| c.force_partial_on_end(true));
    let pdus = [
        DecodedPdu::metadata(3, 41, 1, 4, "src", "img_1-2"),
        DecodedPdu::data(3, 2, 41, 1, 2, b"CD".to_vec()),
        DecodedPdu::end(3, 3, 41, 1, FLIGHT_CHECKSUM, 4),
    ];
    let product = only(feed(&h.engine, 1, &pdus));

    assert_eq!(product.status(), GroundStatus::Partial);
    assert_eq!(product.metadata.assembly_trigger, Some(AssemblyTrigger::EndPart));
    // part 1 never arrived; its bytes are a hole
    assert_eq!(fs::read(&product.files.data_path).expect("read"), b"\0\0CD");
}

#[test]
fn test_missing_metadata_uses_fallback_name() {
    let h = Harness::new(|c| c);
    let pdus = [
        DecodedPdu::data(2, 1, 9, 3, 0, b"ABCD".to_vec()),
        DecodedPdu::end(2, 2, 9, 3, FLIGHT_CHECKSUM, 4),
    ];
    assert!(feed(&h.engine, 1, &pdus).is_empty());

    let product = only(h.engine.force_partials().expect("flush"));
    assert!(product.is_partial());
    assert!(product.metadata.dvt.is_none());
    assert!(
        product.metadata.filename.starts_with("3-9-"),
        "unexpected fallback {}",
        product.metadata.filename
    );
    assert!(product.files.data_path.starts_with(h.output().join("NavImage")));
}

#[test]
fn test_late_metadata_replaces_fallback_name() {
    let h = Harness::new(|c| c);
    let pdus = [
        DecodedPdu::data(2, 1, 10, 1, 0, b"ABCD".to_vec()),
        DecodedPdu::metadata(2, 10, 1, 4, "src", "/flight/img_5-6.dat"),
        DecodedPdu::end(2, 2, 10, 1, FLIGHT_CHECKSUM, 4),
    ];
    let product = only(feed(&h.engine, 1, &pdus));

    assert_eq!(product.status(), GroundStatus::CompleteNoChecksum);
    assert_eq!(product.metadata.filename, "img_5-6");
    assert_eq!(file_name(&product.files.data_path), "img_5-6-1.dat");
}

#[test]
fn test_product_change_forces_previous_partial() {
    let h = Harness::new(|c| c.force_partial_on_change(true));
    let mut worker = h.engine.channel(1).expect("worker");

    let first = worker
        .process(packet(1), &encode(&DecodedPdu::data(3, 1, 50, 1, 0, b"AB".to_vec())))
        .expect("process");
    assert_eq!(first.trigger, AssemblyTrigger::NoTrigger);

    let second = worker
        .process(
            packet(1),
            &encode(&DecodedPdu::metadata(3, 51, 1, 4, "src", "img_7-8")),
        )
        .expect("process");
    assert_eq!(second.trigger, AssemblyTrigger::ProdChange);
    let previous = only(second.finalized);
    assert_eq!(previous.key.id.sequence, 50);
    assert!(previous.is_partial());
    assert_eq!(previous.metadata.assembly_trigger, Some(AssemblyTrigger::ProdChange));

    let open = h.engine.in_progress();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id.sequence, 51);
}

#[test]
fn test_completed_product_is_not_a_product_change() {
    let h = Harness::new(|c| c.force_partial_on_change(true));
    let mut worker = h.engine.channel(1).expect("worker");

    let mut finalized = Vec::new();
    for pdu in three_part_product(7, FLIGHT_CHECKSUM) {
        let outcome = worker.process(packet(1), &encode(&pdu)).expect("process");
        finalized.extend(outcome.finalized);
    }
    assert_eq!(only(finalized).metadata.assembly_trigger, Some(AssemblyTrigger::EndPart));

    let next = worker
        .process(packet(1), &encode(&DecodedPdu::data(3, 1, 8, 1, 0, b"AB".to_vec())))
        .expect("process");
    assert_eq!(next.trigger, AssemblyTrigger::NoTrigger);
    assert!(next.finalized.is_empty());
}

#[test]
fn test_flushed_product_is_not_a_product_change() {
    let h = Harness::new(|c| c.force_partial_on_change(true));
    let mut worker = h.engine.channel(1).expect("worker");

    worker
        .process(packet(1), &encode(&DecodedPdu::data(3, 1, 20, 1, 0, b"AB".to_vec())))
        .expect("process");
    assert_eq!(h.engine.force_partials().expect("flush").len(), 1);

    let next = worker
        .process(packet(1), &encode(&DecodedPdu::data(3, 1, 21, 1, 0, b"CD".to_vec())))
        .expect("process");
    assert_eq!(next.trigger, AssemblyTrigger::NoTrigger);
    assert!(next.finalized.is_empty());
    assert_eq!(h.events.assembled.lock().len(), 1);
}

#[test]
fn test_interleaved_products_without_change_policy() {
    let h = Harness::new(|c| c);
    let mut a = three_part_product(60, FLIGHT_CHECKSUM);
    let mut b = three_part_product(61, FLIGHT_CHECKSUM);
    let mut interleaved = Vec::new();
    for (x, y) in a.drain(..).zip(b.drain(..)) {
        interleaved.push(x);
        interleaved.push(y);
    }

    let products = feed(&h.engine, 1, &interleaved);
    assert_eq!(products.len(), 2);
    assert!(products.iter().all(|p| !p.is_partial()));
}

// ---------------------------------------------------------------------------
// Logs and directories
// ---------------------------------------------------------------------------

#[test]
fn test_transaction_log_replays_interrupted_product() {
    let h = Harness::new(|c| c);
    let pdus = three_part_product(70, FLIGHT_CHECKSUM);
    assert!(feed(&h.engine, 1, &pdus[..2]).is_empty());

    let replayed = TransactionLog::replay(&h.transaction_dir(1, 70)).expect("replay");
    assert_eq!(replayed.transaction_id.sequence, 70);
    assert_eq!(replayed.metadata.filename, "img_1-2");
    assert!(replayed.received_metadata);
    assert!(!replayed.received_end);
    assert_eq!(replayed.events, 3);
    assert_eq!(replayed.bytes_received(), 4);
    assert_eq!(replayed.part_numbers().into_iter().collect::<Vec<_>>(), vec![1]);
    assert_eq!(replayed.last_trigger, None);

    // End arrived, part 2 did not: the End PDU's own slot is not missing.
    let gapped = [
        DecodedPdu::metadata(3, 71, 1, 4, "src", "img_1-2"),
        DecodedPdu::data(3, 1, 71, 1, 0, b"AB".to_vec()),
        DecodedPdu::end(3, 3, 71, 1, FLIGHT_CHECKSUM, 4),
    ];
    assert!(feed(&h.engine, 1, &gapped).is_empty());

    let replayed = TransactionLog::replay(&h.transaction_dir(1, 71)).expect("replay");
    assert!(replayed.received_end);
    assert_eq!(replayed.metadata.total_parts, 2);
    assert_eq!(replayed.metadata.checksum, Some(FLIGHT_CHECKSUM));
    let flushed = h.engine.force_partials().expect("flush");
    let live = flushed
        .iter()
        .find(|p| p.key.id.sequence == 71)
        .expect("flushed product");
    assert_eq!(live.metadata.total_parts, replayed.metadata.total_parts);
}

#[test]
fn test_archive_keeps_scratch_directory() {
    let h = Harness::new(|c| c.archive_active_dirs(true));
    let product = only(feed(&h.engine, 1, &three_part_product(80, FLIGHT_CHECKSUM)));

    let archived = h.root.path().join("active/active-1/NavImage/img_1-2-1");
    assert_eq!(product.files.version, "1");
    assert!(!h.transaction_dir(1, 80).exists());
    assert_eq!(fs::read(archived.join("scratch.dat")).expect("scratch"), b"ABCD");

    let replayed = TransactionLog::replay(&archived).expect("replay");
    assert_eq!(replayed.last_trigger, Some(AssemblyTrigger::EndPart));
}

#[test]
fn test_learned_filenames_are_dropped_after_assembly() {
    let root = tempfile::tempdir().expect("tempdir");
    let config = BuilderConfig::builder().root_dir(root.path()).build();
    let names = Arc::new(InMemoryFilenameMap::new());
    let engine = ProductBuilder::builder(config)
        .filename_map(names.clone())
        .build()
        .expect("engine");

    only(feed(&engine, 1, &three_part_product(85, FLIGHT_CHECKSUM)));
    assert!(names.is_empty());

    // the same sequence still open on another channel keeps its name
    let pdus = three_part_product(86, FLIGHT_CHECKSUM);
    assert!(feed(&engine, 2, &pdus[..1]).is_empty());
    only(feed(&engine, 1, &pdus));
    assert_eq!(names.len(), 1);
    only(engine.force_partials().expect("flush"));
    assert!(names.is_empty());
}

#[test]
fn test_vcid_filter() {
    let h = Harness::new(|c| c.allow_vcid(3));
    assert!(h.engine.channel(1).is_err());
    let product = only(feed(&h.engine, 3, &three_part_product(90, FLIGHT_CHECKSUM)));
    assert_eq!(product.metadata.vcid, 3);
}

// ---------------------------------------------------------------------------
// Capture input
// ---------------------------------------------------------------------------

#[test]
fn test_capture_file_through_engine_on_two_channels() {
    let h = Harness::new(|c| c.validate_checksum(true));
    let capture = h.root.path().join("pass.tlmcap");

    let mut writer = CaptureWriter::create(&capture).expect("create");
    let a = three_part_product(100, FLIGHT_CHECKSUM);
    let b = three_part_product(200, FLIGHT_CHECKSUM);
    for (x, y) in a.iter().zip(&b) {
        writer.write_packet(&packet(4), &encode(x)).expect("write");
        writer.write_packet(&packet(5), &encode(y)).expect("write");
    }
    writer.finish().expect("finish");

    let mut lanes: [Vec<_>; 2] = [Vec::new(), Vec::new()];
    for record in CaptureReader::open(&capture).expect("open").packets() {
        let record = record.expect("record");
        lanes[(record.info.vcid - 4) as usize].push(record);
    }

    std::thread::scope(|s| {
        for (lane, vcid) in lanes.iter().zip([4u32, 5]) {
            let engine = h.engine.clone();
            s.spawn(move || {
                let mut worker = engine.channel(vcid).expect("worker");
                for record in lane {
                    worker
                        .process(record.info.clone(), &record.payload)
                        .expect("process");
                }
            });
        }
    });

    let assembled = h.events.assembled.lock();
    assert_eq!(assembled.len(), 2);
    assert!(assembled
        .iter()
        .all(|p| p.status() == GroundStatus::CompleteChecksumPass));
    let mut versions: Vec<_> = assembled.iter().map(|p| p.files.version.clone()).collect();
    versions.sort();
    assert_eq!(versions, ["1", "2"]);
}
