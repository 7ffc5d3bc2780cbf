// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Assembly trigger decision.
//!
//! Evaluated once per stored part, with the tracker borrowed from the
//! engine's registry lock for the whole evaluation.

use crate::part::TransactionKey;
use crate::pdu::PduVariant;
use crate::tracker::PartsTracker;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a transaction is (or is not) being finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssemblyTrigger {
    NoTrigger,
    /// The channel moved on to another transaction.
    ProdChange,
    /// The End PDU arrived (forced) or every part is in.
    EndPart,
    /// Explicit flush of in-progress transactions, e.g. at end of input.
    EndOfData,
}

impl fmt::Display for AssemblyTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoTrigger => "NO_TRIGGER",
            Self::ProdChange => "PROD_CHANGE",
            Self::EndPart => "END_PART",
            Self::EndOfData => "END_OF_DATA",
        };
        f.write_str(name)
    }
}

/// Force-partial policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerPolicy {
    pub force_partial_on_change: bool,
    pub force_partial_on_end: bool,
}

impl TriggerPolicy {
    pub fn from_config(config: &crate::config::BuilderConfig) -> Self {
        Self {
            force_partial_on_change: config.force_partial_on_change,
            force_partial_on_end: config.force_partial_on_end,
        }
    }
}

/// Last transaction seen on one virtual channel.
///
/// Owned by the channel's single worker; never shared across threads.
#[derive(Debug, Default, Clone)]
pub struct LastPart {
    last: Option<TransactionKey>,
}

impl LastPart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&TransactionKey> {
        self.last.as_ref()
    }

    pub fn record(&mut self, key: &TransactionKey) {
        if self.last.as_ref() != Some(key) {
            self.last = Some(key.clone());
        }
    }

    /// Forget `key` once its transaction has been assembled.
    pub fn clear(&mut self, key: &TransactionKey) {
        if self.last.as_ref() == Some(key) {
            self.last = None;
        }
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub trigger: AssemblyTrigger,
    /// Transaction to finalize: the previous one for `ProdChange`, the
    /// current one for `EndPart`.
    pub finalize: Option<TransactionKey>,
}

impl Decision {
    fn none() -> Self {
        Self {
            trigger: AssemblyTrigger::NoTrigger,
            finalize: None,
        }
    }
}

/// Decide whether a just-stored part triggers assembly.
///
/// `reported_total` is the part's flight total (minus the metadata PDU). The
/// part becomes the channel's last part whatever the outcome.
pub fn decide(
    policy: &TriggerPolicy,
    tracker: &mut dyn PartsTracker,
    last: &mut LastPart,
    key: &TransactionKey,
    variant: PduVariant,
    reported_total: u32,
) -> Decision {
    if !tracker.is_total_known(key) {
        tracker.set_total_parts(key, reported_total);
    }
    if variant.is_end() && tracker.adjust_total_for_end(key) {
        tracing::debug!(
            transaction = %key,
            total = ?tracker.total_parts(key),
            "End PDU corrected total part count"
        );
    }

    // A previous transaction the tracker has dropped was already assembled,
    // possibly by a flush outside this channel's worker.
    let previous = last
        .get()
        .filter(|prev| *prev != key && tracker.is_total_known(prev))
        .cloned();
    let decision = match previous {
        Some(prev) if policy.force_partial_on_change => Decision {
            trigger: AssemblyTrigger::ProdChange,
            finalize: Some(prev),
        },
        _ if policy.force_partial_on_end && variant.is_end() => Decision {
            trigger: AssemblyTrigger::EndPart,
            finalize: Some(key.clone()),
        },
        _ if tracker.all_parts_received(key) => Decision {
            trigger: AssemblyTrigger::EndPart,
            finalize: Some(key.clone()),
        },
        _ => Decision::none(),
    };

    last.record(key);
    decision
}
