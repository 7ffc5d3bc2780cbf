// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! txlog-dump - Inspect a transaction event log.
//!
//! Usage:
//!   txlog-dump ./active/active-6/NavImage/42
//!   txlog-dump ./active/active-6/NavImage/42 --events
//!   txlog-dump ./active/active-6/NavImage/42 --json

use anyhow::Context;
use clap::Parser;
use product_builder::txlog::LOG_FILE_NAME;
use product_builder::{ReplayedTransaction, TransactionEvent, TransactionLog};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "txlog-dump")]
#[command(about = "Replay and print a product transaction log")]
#[command(version)]
struct Args {
    /// Transaction directory (the one holding events.log)
    dir: PathBuf,

    /// Print every event instead of a summary
    #[arg(short, long)]
    events: bool,

    /// Emit JSON
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if args.events {
        let path = args.dir.join(LOG_FILE_NAME);
        let events = TransactionLog::read_events(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&events)?);
        } else {
            for event in &events {
                print_event(event);
            }
        }
        return Ok(());
    }

    let replayed = TransactionLog::replay(&args.dir)
        .with_context(|| format!("failed to replay {}", args.dir.display()))?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&replayed)?);
    } else {
        print_summary(&replayed);
    }
    Ok(())
}

fn print_event(event: &TransactionEvent) {
    match event {
        TransactionEvent::Opened { at, metadata } => {
            println!("{}  OPENED     {} ({})", at, metadata.transaction_id, metadata.filename);
        }
        TransactionEvent::PartReceived { at, part } => {
            let storage = &part.storage;
            println!(
                "{}  PART {:>5}  {:<9} offset={} len={}",
                at, storage.part_number, storage.pdu_variant, storage.global_offset, storage.length
            );
        }
        TransactionEvent::AssemblyTriggered { at, trigger } => {
            println!("{}  TRIGGER    {}", at, trigger);
        }
    }
}

fn print_summary(txn: &ReplayedTransaction) {
    let meta = &txn.metadata;
    println!("Transaction: {}", txn.transaction_id);
    println!("Filename:    {}", meta.filename);
    println!("VCID/APID:   {}/{}", meta.vcid, meta.apid);
    println!("Events:      {}", txn.events);
    println!("Metadata:    {}", if txn.received_metadata { "received" } else { "missing" });
    println!("End:         {}", if txn.received_end { "received" } else { "missing" });
    println!("Total parts: {}", meta.total_parts);

    let numbers = txn.part_numbers();
    println!("Data parts:  {} ({} bytes)", numbers.len(), txn.bytes_received());
    if meta.total_parts > 0 {
        let missing: Vec<u32> = (1..=meta.total_parts)
            .filter(|n| !numbers.contains(n))
            .collect();
        if !missing.is_empty() {
            println!("Missing:     {:?}", missing);
        }
    }
    if let Some(size) = meta.file_size {
        println!("File size:   {}", size);
    }
    if let Some(checksum) = meta.checksum {
        println!("Checksum:    {:#010x}", checksum);
    }
    match txn.last_trigger {
        Some(trigger) => println!("Trigger:     {}", trigger),
        None => println!("Trigger:     none (in progress)"),
    }
}
