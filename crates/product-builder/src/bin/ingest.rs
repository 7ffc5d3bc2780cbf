// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! product-ingest - Build data products from a packet capture.
//!
//! Usage:
//!   product-ingest --input pass.tlmcap
//!   product-ingest --input pass.tlmcap --config builder.toml --force-partials
//!   product-ingest gen-config --output builder.toml

use anyhow::Context;
use clap::{Parser, Subcommand};
use product_builder::{BuilderConfig, BuilderError, CaptureReader, ProductBuilder, TrackingSnapshot};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "product-ingest")]
#[command(about = "Reassemble data products from captured downlink packets")]
#[command(version)]
struct Args {
    /// Packet capture file (.tlmcap)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output root for finished products (overrides config)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Root of the scratch areas (overrides config)
    #[arg(long)]
    active: Option<PathBuf>,

    /// Verify flight checksums of complete products
    #[arg(long)]
    validate_checksum: bool,

    /// Write out in-progress products as partials when the capture ends
    #[arg(long)]
    force_partials: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Quiet mode (no summary)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a configuration file with every default spelled out
    GenConfig {
        #[arg(short, long, default_value = "builder.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(cmd) = &args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config = build_config(&args)?;
    let shutdown_flush = config.force_partials_on_shutdown || args.force_partials;
    let engine = ProductBuilder::new(config)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let input = args
        .input
        .as_ref()
        .context("missing --input capture file")?;
    let reader = CaptureReader::open(input)
        .with_context(|| format!("failed to open capture {}", input.display()))?;

    info!("Product Builder v{}", env!("CARGO_PKG_VERSION"));
    info!("Input: {}", input.display());
    info!("Output: {}", engine.config().output_dir.display());

    let mut workers = HashMap::new();
    let mut skipped = 0u64;
    let mut products = 0usize;

    for packet in reader.packets() {
        if !running.load(Ordering::SeqCst) {
            warn!("interrupted, stopping ingest");
            break;
        }
        let packet = packet.context("capture read failed")?;
        let vcid = packet.info.vcid;

        let worker = match workers.entry(vcid) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => match engine.channel(vcid) {
                Ok(worker) => slot.insert(worker),
                Err(BuilderError::VcidNotAllowed(_)) => {
                    debug!(vcid, "packet on unconfigured VCID skipped");
                    skipped += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            },
        };

        match worker.process(packet.info, &packet.payload) {
            Ok(outcome) => products += outcome.finalized.len(),
            // Already logged and counted by the worker.
            Err(e) if e.is_part_local() => {}
            Err(e) => return Err(e.into()),
        }
    }
    drop(workers);

    if shutdown_flush {
        products += engine.force_partials()?.len();
    } else {
        let open = engine.in_progress();
        if !open.is_empty() {
            info!(count = open.len(), "transactions left in progress");
        }
    }

    if !args.quiet {
        print_summary(&engine.tracking(), products, skipped);
    }
    Ok(())
}

fn build_config(args: &Args) -> anyhow::Result<BuilderConfig> {
    let mut config = match &args.config {
        Some(path) => BuilderConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => BuilderConfig::default(),
    };
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    if let Some(active) = &args.active {
        config.active_dir = active.clone();
    }
    if args.validate_checksum {
        config.validate_checksum = true;
    }
    config.validate()?;
    Ok(config)
}

fn cmd_gen_config(output: &Path) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(&BuilderConfig::default())?;
    std::fs::write(output, content)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Generated configuration: {}", output.display());
    Ok(())
}

fn cmd_validate(config: &Path) -> anyhow::Result<()> {
    let loaded = BuilderConfig::from_file(config)?;
    println!("Configuration is valid.");
    println!("  active:  {}", loaded.active_dir.display());
    println!("  output:  {}", loaded.output_dir.display());
    println!("  checksum validation: {}", loaded.validate_checksum);
    if loaded.allowed_vcids.is_empty() {
        println!("  VCIDs: all");
    } else {
        println!("  VCIDs: {:?}", loaded.allowed_vcids);
    }
    Ok(())
}

fn print_summary(stats: &TrackingSnapshot, products: usize, skipped: u64) {
    println!();
    println!("=== Ingest Summary ===");
    println!("Parts stored:      {}", stats.parts_stored);
    println!("Parts rejected:    {}", stats.parts_rejected);
    println!("Packets skipped:   {}", skipped);
    println!("Bytes stored:      {}", stats.bytes_stored);
    println!("Products written:  {}", products);
    println!("  complete:        {}", stats.products_complete);
    println!("  partial:         {}", stats.products_partial);
    println!("  checksum fail:   {}", stats.checksum_failures);
    println!(
        "Throughput:        {:.1} parts/s, {:.1} KB/s",
        stats.parts_per_second(),
        stats.bytes_per_second() / 1024.0
    );
}
