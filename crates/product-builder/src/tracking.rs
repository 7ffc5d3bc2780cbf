// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Passive throughput and product counters.

use crate::metadata::GroundStatus;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters driven by the engine's lifecycle events.
#[derive(Debug)]
pub struct TrackingService {
    /// Parts stored.
    pub parts_stored: AtomicU64,

    /// Payload bytes stored.
    pub bytes_stored: AtomicU64,

    /// Parts rejected (decode, offset or storage failure).
    pub parts_rejected: AtomicU64,

    pub products_started: AtomicU64,
    pub products_complete: AtomicU64,
    pub products_partial: AtomicU64,
    pub checksum_failures: AtomicU64,

    /// Service creation time.
    pub created: Instant,
}

impl TrackingService {
    pub fn new() -> Self {
        Self {
            parts_stored: AtomicU64::new(0),
            bytes_stored: AtomicU64::new(0),
            parts_rejected: AtomicU64::new(0),
            products_started: AtomicU64::new(0),
            products_complete: AtomicU64::new(0),
            products_partial: AtomicU64::new(0),
            checksum_failures: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    pub fn part_stored(&self, bytes: usize) {
        self.parts_stored.fetch_add(1, Ordering::Relaxed);
        self.bytes_stored.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn part_rejected(&self) {
        self.parts_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn product_started(&self) {
        self.products_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn product_finalized(&self, status: GroundStatus) {
        if status.is_complete() {
            self.products_complete.fetch_add(1, Ordering::Relaxed);
        } else {
            self.products_partial.fetch_add(1, Ordering::Relaxed);
        }
        if status == GroundStatus::PartialChecksumFail {
            self.checksum_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get snapshot of current counters.
    pub fn snapshot(&self) -> TrackingSnapshot {
        TrackingSnapshot {
            parts_stored: self.parts_stored.load(Ordering::Relaxed),
            bytes_stored: self.bytes_stored.load(Ordering::Relaxed),
            parts_rejected: self.parts_rejected.load(Ordering::Relaxed),
            products_started: self.products_started.load(Ordering::Relaxed),
            products_complete: self.products_complete.load(Ordering::Relaxed),
            products_partial: self.products_partial.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs_f64(),
        }
    }
}

impl Default for TrackingService {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of tracking counters.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingSnapshot {
    pub parts_stored: u64,
    pub bytes_stored: u64,
    pub parts_rejected: u64,
    pub products_started: u64,
    pub products_complete: u64,
    pub products_partial: u64,
    pub checksum_failures: u64,
    pub uptime_secs: f64,
}

impl TrackingSnapshot {
    pub fn parts_per_second(&self) -> f64 {
        if self.uptime_secs > 0.0 {
            self.parts_stored as f64 / self.uptime_secs
        } else {
            0.0
        }
    }

    pub fn bytes_per_second(&self) -> f64 {
        if self.uptime_secs > 0.0 {
            self.bytes_stored as f64 / self.uptime_secs
        } else {
            0.0
        }
    }

    /// Products that finished, complete or not.
    pub fn products_finalized(&self) -> u64 {
        self.products_complete + self.products_partial
    }
}
