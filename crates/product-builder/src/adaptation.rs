// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Mission-varying behavior.
//!
//! The engine itself is mission-neutral; the few operations that differ
//! between missions (how a product filename carries its data validity time,
//! which products use the commanded header) live behind [`MissionAdaptation`].

use crate::config::BuilderConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Data validity time parsed from a product filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dvt {
    pub coarse: u64,
    pub fine: u64,
}

impl fmt::Display for Dvt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.coarse, self.fine)
    }
}

/// Mission-specific hooks consulted while decoding parts.
pub trait MissionAdaptation: Send + Sync {
    /// Whether parts on `apid` carry the three commanded-header words.
    fn has_commanded_header(&self, apid: u16) -> bool;

    /// Extract the DVT from a normalized product filename, if it has one.
    fn parse_filename(&self, filename: &str) -> Option<Dvt>;
}

/// Default adaptation driven entirely by [`BuilderConfig`] values.
#[derive(Debug, Clone)]
pub struct ReferenceAdaptation {
    use_commanded_header: bool,
    commanded_apids: BTreeSet<u16>,
    marker: String,
    separator: String,
}

impl ReferenceAdaptation {
    pub fn new(marker: impl Into<String>, separator: impl Into<String>) -> Self {
        Self {
            use_commanded_header: false,
            commanded_apids: BTreeSet::new(),
            marker: marker.into(),
            separator: separator.into(),
        }
    }

    pub fn from_config(config: &BuilderConfig) -> Self {
        Self {
            use_commanded_header: config.use_commanded_header,
            commanded_apids: config.commanded_apids.clone(),
            marker: config.filename_dvt_marker.clone(),
            separator: config.filename_dvt_separator.clone(),
        }
    }

    pub fn with_commanded_apids(mut self, apids: impl IntoIterator<Item = u16>) -> Self {
        self.use_commanded_header = true;
        self.commanded_apids.extend(apids);
        self
    }
}

impl MissionAdaptation for ReferenceAdaptation {
    fn has_commanded_header(&self, apid: u16) -> bool {
        self.use_commanded_header && self.commanded_apids.contains(&apid)
    }

    fn parse_filename(&self, filename: &str) -> Option<Dvt> {
        // `<base><marker><coarse><separator><fine>`
        let start = filename.find(self.marker.as_str())?;
        let rest = &filename[start + self.marker.len()..];
        let mut tokens = rest.split(self.separator.as_str());
        let coarse = tokens.next()?.parse().ok()?;
        let fine = tokens.next()?.parse().ok()?;
        if tokens.next().is_some() {
            return None;
        }
        Some(Dvt { coarse, fine })
    }
}

/// Reduce a flight destination path to a product name: final path component,
/// cut at the first `.`.
pub fn normalize_filename(destination: &str) -> &str {
    let base = destination
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(destination);
    match base.find('.') {
        Some(dot) => &base[..dot],
        None => base,
    }
}

/// Name used when no parseable filename is known for a transaction.
pub fn fallback_filename(source_entity_id: u8, transaction: u64, now: DateTime<Utc>) -> String {
    format!(
        "{}-{}-{}",
        source_entity_id,
        transaction,
        now.format("%Y-%jT%H%M%S%.3f")
    )
}
