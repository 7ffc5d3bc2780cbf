// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Received-parts bookkeeping per transaction.

use crate::part::TransactionKey;
use std::collections::{BTreeSet, HashMap};

/// Gap tracker consulted by the assembly trigger and the finalizer.
///
/// Implementations are not synchronized; the engine calls them only while
/// holding its registry lock.
pub trait PartsTracker: Send {
    /// Note that the metadata PDU arrived.
    fn record_metadata(&mut self, key: &TransactionKey);

    /// Note that an End (or Data+End) PDU arrived.
    fn record_end(&mut self, key: &TransactionKey);

    /// Note that data part `part_number` arrived.
    fn record_part(&mut self, key: &TransactionKey, part_number: u32);

    fn total_parts(&self, key: &TransactionKey) -> Option<u32>;

    fn set_total_parts(&mut self, key: &TransactionKey, total: u32);

    /// Apply the End PDU's one-part correction. Returns false when it was
    /// already applied or the total is not yet known.
    fn adjust_total_for_end(&mut self, key: &TransactionKey) -> bool;

    fn all_parts_received(&self, key: &TransactionKey) -> bool;

    fn has_gaps(&self, key: &TransactionKey) -> bool;

    fn received_metadata(&self, key: &TransactionKey) -> bool;

    /// Forget a transaction.
    fn clear(&mut self, key: &TransactionKey);

    fn is_total_known(&self, key: &TransactionKey) -> bool {
        self.total_parts(key).is_some()
    }
}

#[derive(Debug, Default, Clone)]
struct PartsState {
    total: Option<u32>,
    end_adjusted: bool,
    metadata: bool,
    end: bool,
    received: BTreeSet<u32>,
}

impl PartsState {
    fn missing_below(&self, limit: u32) -> bool {
        (1..=limit).any(|n| !self.received.contains(&n))
    }
}

/// In-memory tracker.
#[derive(Debug, Default)]
pub struct ReceivedPartsTracker {
    states: HashMap<TransactionKey, PartsState>,
}

impl ReceivedPartsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Data part numbers received so far.
    pub fn received(&self, key: &TransactionKey) -> Vec<u32> {
        self.states
            .get(key)
            .map(|s| s.received.iter().copied().collect())
            .unwrap_or_default()
    }

    fn state(&mut self, key: &TransactionKey) -> &mut PartsState {
        self.states.entry(key.clone()).or_default()
    }
}

impl PartsTracker for ReceivedPartsTracker {
    fn record_metadata(&mut self, key: &TransactionKey) {
        self.state(key).metadata = true;
    }

    fn record_end(&mut self, key: &TransactionKey) {
        self.state(key).end = true;
    }

    fn record_part(&mut self, key: &TransactionKey, part_number: u32) {
        self.state(key).received.insert(part_number);
    }

    fn total_parts(&self, key: &TransactionKey) -> Option<u32> {
        self.states.get(key).and_then(|s| s.total)
    }

    fn set_total_parts(&mut self, key: &TransactionKey, total: u32) {
        self.state(key).total = Some(total);
    }

    fn adjust_total_for_end(&mut self, key: &TransactionKey) -> bool {
        let state = self.state(key);
        match state.total {
            Some(total) if !state.end_adjusted => {
                state.total = Some(total.saturating_sub(1));
                state.end_adjusted = true;
                true
            }
            _ => false,
        }
    }

    fn all_parts_received(&self, key: &TransactionKey) -> bool {
        let Some(state) = self.states.get(key) else {
            return false;
        };
        match state.total {
            Some(total) if state.metadata && state.end => !state.missing_below(total),
            _ => false,
        }
    }

    fn has_gaps(&self, key: &TransactionKey) -> bool {
        let Some(state) = self.states.get(key) else {
            return false;
        };
        let highest = state.received.iter().next_back().copied().unwrap_or(0);
        let limit = highest.max(state.total.unwrap_or(0));
        state.missing_below(limit)
    }

    fn received_metadata(&self, key: &TransactionKey) -> bool {
        self.states.get(key).is_some_and(|s| s.metadata)
    }

    fn clear(&mut self, key: &TransactionKey) {
        self.states.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::part::TransactionId;

    fn key(seq: u64) -> TransactionKey {
        TransactionKey::new(0, TransactionId::new("Image", seq))
    }

    #[test]
    fn test_complete_needs_metadata_end_and_every_part() {
        let mut tracker = ReceivedPartsTracker::new();
        let k = key(1);
        tracker.set_total_parts(&k, 3);
        tracker.record_part(&k, 2);
        tracker.record_part(&k, 1);
        assert!(!tracker.all_parts_received(&k));

        tracker.record_end(&k);
        assert!(tracker.adjust_total_for_end(&k));
        assert_eq!(tracker.total_parts(&k), Some(2));
        assert!(!tracker.all_parts_received(&k));

        tracker.record_metadata(&k);
        assert!(tracker.all_parts_received(&k));
        assert!(!tracker.has_gaps(&k));
    }

    #[test]
    fn test_end_adjustment_applies_once() {
        let mut tracker = ReceivedPartsTracker::new();
        let k = key(2);
        assert!(!tracker.adjust_total_for_end(&k));
        tracker.set_total_parts(&k, 5);
        assert!(tracker.adjust_total_for_end(&k));
        assert!(!tracker.adjust_total_for_end(&k));
        assert_eq!(tracker.total_parts(&k), Some(4));
    }

    #[test]
    fn test_gaps() {
        let mut tracker = ReceivedPartsTracker::new();
        let k = key(3);
        assert!(!tracker.has_gaps(&k));

        tracker.record_part(&k, 3);
        assert!(tracker.has_gaps(&k));
        tracker.record_part(&k, 1);
        tracker.record_part(&k, 2);
        assert!(!tracker.has_gaps(&k));

        tracker.set_total_parts(&k, 4);
        assert!(tracker.has_gaps(&k));
        assert_eq!(tracker.received(&k), vec![1, 2, 3]);
    }

    #[test]
    fn test_out_of_order_data_end_waits_for_earlier_parts() {
        let mut tracker = ReceivedPartsTracker::new();
        let k = key(4);
        // metadata + data 1 + data/end 2: flight total 3, minus metadata, minus end
        tracker.set_total_parts(&k, 2);
        tracker.record_metadata(&k);
        tracker.record_part(&k, 2);
        tracker.record_end(&k);
        tracker.adjust_total_for_end(&k);
        assert!(!tracker.all_parts_received(&k));

        tracker.record_part(&k, 1);
        assert!(tracker.all_parts_received(&k));
    }

    #[test]
    fn test_clear() {
        let mut tracker = ReceivedPartsTracker::new();
        let k = key(5);
        tracker.record_metadata(&k);
        assert!(tracker.received_metadata(&k));
        tracker.clear(&k);
        assert!(!tracker.received_metadata(&k));
        assert!(!tracker.is_total_known(&k));
        assert!(tracker.is_empty());
    }
}
