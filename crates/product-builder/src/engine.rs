// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Product reassembly engine.
//!
//! [`ProductBuilder`] owns the state shared across virtual channels: the
//! parts tracker and the open transactions, guarded together by one mutex.
//! Each virtual channel is driven by exactly one [`ChannelWorker`], which
//! owns that channel's last-part state and processes its packets in arrival
//! order. Workers for different channels may run on different threads.
//!
//! Per packet, a worker decodes, stores the payload, then takes the registry
//! lock once to log the part, update the tracker and evaluate the assembly
//! trigger. Finalization runs after the lock is released.

use crate::adaptation::{MissionAdaptation, ReferenceAdaptation};
use crate::config::{BuilderConfig, ConfigError};
use crate::filename_map::{FilenameMap, InMemoryFilenameMap};
use crate::finalize::{FinalizeError, FinalizedProduct, Finalizer, PendingProduct};
use crate::metadata::ProductMetadata;
use crate::naming::{ProductNamer, VersionedNamer};
use crate::notify::{ProductEvents, TracingEvents};
use crate::part::{PacketInfo, PartDecoder, ProductPart, TransactionKey};
use crate::pdu::{DecodeError, PduCodec, PduVariant};
use crate::store::{PartStore, StorageError, StorageMetadata};
use crate::tracker::{PartsTracker, ReceivedPartsTracker};
use crate::tracking::{TrackingService, TrackingSnapshot};
use crate::trigger::{decide, AssemblyTrigger, LastPart, TriggerPolicy};
use crate::txlog::{LogError, PartRecord, TransactionEvent, TransactionLog};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("part rejected: {0}")]
    Decode(#[from] DecodeError),

    #[error("part rejected: {0}")]
    Storage(#[from] StorageError),

    #[error("transaction log error: {0}")]
    Log(#[from] LogError),

    #[error("finalize failed: {0}")]
    Finalize(#[from] FinalizeError),

    #[error("VCID {0} is not accepted by this builder")]
    VcidNotAllowed(u32),

    #[error("VCID {0} already has a worker")]
    ChannelBusy(u32),

    #[error("packet for VCID {actual} handed to the worker for VCID {expected}")]
    WrongChannel { expected: u32, actual: u32 },
}

impl BuilderError {
    /// True when only the offending part was rejected; the engine and the
    /// part's transaction carry on.
    pub fn is_part_local(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::Storage(_) | Self::WrongChannel { .. }
        )
    }
}

/// One in-progress transaction.
struct Transaction {
    dir: PathBuf,
    metadata: ProductMetadata,
    log: TransactionLog,
    parts: Vec<StorageMetadata>,
}

/// State shared by all channels; every access goes through one lock.
struct Registry {
    tracker: Box<dyn PartsTracker>,
    transactions: HashMap<TransactionKey, Transaction>,
}

impl Registry {
    /// True while any open transaction carries `sequence`.
    fn sequence_open(&self, sequence: u64) -> bool {
        self.transactions.keys().any(|k| k.id.sequence == sequence)
    }

    /// Remove a triggered transaction, snapshotting the tracker's facts.
    fn take_pending(
        &mut self,
        key: &TransactionKey,
        trigger: AssemblyTrigger,
    ) -> Option<PendingProduct> {
        let txn = self.transactions.remove(key)?;
        let has_gaps = self.tracker.has_gaps(key);
        let received_metadata = self.tracker.received_metadata(key);
        let mut metadata = txn.metadata;
        if let Some(total) = self.tracker.total_parts(key) {
            metadata.total_parts = total;
        }
        self.tracker.clear(key);

        tracing::debug!(
            transaction = %key,
            %trigger,
            parts = txn.parts.len(),
            "transaction triggered"
        );
        Some(PendingProduct {
            key: key.clone(),
            dir: txn.dir,
            metadata,
            log: txn.log,
            trigger,
            has_gaps,
            received_metadata,
        })
    }
}

struct Shared {
    config: BuilderConfig,
    policy: TriggerPolicy,
    decoder: PartDecoder,
    filenames: Arc<dyn FilenameMap>,
    store: PartStore,
    finalizer: Finalizer,
    events: Arc<dyn ProductEvents>,
    tracking: TrackingService,
    registry: Mutex<Registry>,
    claimed: Mutex<HashSet<u32>>,
}

/// Result of processing one packet.
#[derive(Debug)]
pub struct ProcessOutcome {
    pub transaction: TransactionKey,
    pub variant: PduVariant,
    pub storage: StorageMetadata,
    /// Trigger emitted for this part (`ProdChange` wins over a following
    /// `EndPart` for the same part).
    pub trigger: AssemblyTrigger,
    /// Products finalized as a consequence of this part.
    pub finalized: Vec<FinalizedProduct>,
}

/// Product reassembly engine.
#[derive(Clone)]
pub struct ProductBuilder {
    shared: Arc<Shared>,
}

impl ProductBuilder {
    /// Engine with the default collaborators.
    pub fn new(config: BuilderConfig) -> Result<Self, BuilderError> {
        EngineBuilder::new(config).build()
    }

    pub fn builder(config: BuilderConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.shared.config
    }

    /// Claim the single worker for `vcid`.
    pub fn channel(&self, vcid: u32) -> Result<ChannelWorker, BuilderError> {
        if !self.shared.config.accepts_vcid(vcid) {
            return Err(BuilderError::VcidNotAllowed(vcid));
        }
        if !self.shared.claimed.lock().insert(vcid) {
            return Err(BuilderError::ChannelBusy(vcid));
        }
        Ok(ChannelWorker {
            vcid,
            shared: Arc::clone(&self.shared),
            last: LastPart::new(),
        })
    }

    /// Transactions currently accumulating parts.
    pub fn in_progress(&self) -> Vec<TransactionKey> {
        let mut keys: Vec<_> = self
            .shared
            .registry
            .lock()
            .transactions
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Finalize every in-progress transaction with trigger `EndOfData`.
    pub fn force_partials(&self) -> Result<Vec<FinalizedProduct>, BuilderError> {
        let pending: Vec<_> = {
            let mut registry = self.shared.registry.lock();
            let mut keys: Vec<_> = registry.transactions.keys().cloned().collect();
            keys.sort();
            let pending: Vec<_> = keys
                .iter()
                .filter_map(|key| registry.take_pending(key, AssemblyTrigger::EndOfData))
                .collect();
            self.shared.forget_filenames(&registry, &pending);
            pending
        };
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "forcing out in-progress products");
        }
        self.shared.finalize_all(pending)
    }

    pub fn tracking(&self) -> TrackingSnapshot {
        self.shared.tracking.snapshot()
    }
}

impl Shared {
    /// Drop learned filenames no open transaction still needs.
    fn forget_filenames(&self, registry: &Registry, pending: &[PendingProduct]) {
        for product in pending {
            let sequence = product.key.id.sequence;
            if !registry.sequence_open(sequence) {
                self.filenames.remove(sequence);
            }
        }
    }

    fn transaction_dir(&self, part: &ProductPart) -> PathBuf {
        self.config
            .channel_dir(part.vcid())
            .join(&part.transaction_id.scope)
            .join(part.transaction_id.sequence.to_string())
    }

    fn finalize_all(
        &self,
        pending: Vec<PendingProduct>,
    ) -> Result<Vec<FinalizedProduct>, BuilderError> {
        let mut finalized = Vec::with_capacity(pending.len());
        let mut first_error = None;
        for product in pending {
            let key = product.key.clone();
            match self.finalizer.finalize(product) {
                Ok(done) => {
                    self.tracking.product_finalized(done.status());
                    self.events.product_assembled(&done);
                    finalized.push(done);
                }
                Err(e) => {
                    tracing::error!(transaction = %key, error = %e, "finalize failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(finalized),
        }
    }
}

/// Single-writer lane for one virtual channel.
pub struct ChannelWorker {
    vcid: u32,
    shared: Arc<Shared>,
    last: LastPart,
}

impl ChannelWorker {
    pub fn vcid(&self) -> u32 {
        self.vcid
    }

    /// Process one packet carrying a product PDU.
    pub fn process(
        &mut self,
        packet: PacketInfo,
        payload: &[u8],
    ) -> Result<ProcessOutcome, BuilderError> {
        let result = self.process_inner(packet, payload);
        if let Err(e) = &result {
            if e.is_part_local() {
                self.shared.tracking.part_rejected();
                tracing::error!(vcid = self.vcid, error = %e, "product part rejected");
            }
        }
        result
    }

    fn process_inner(
        &mut self,
        packet: PacketInfo,
        payload: &[u8],
    ) -> Result<ProcessOutcome, BuilderError> {
        if packet.vcid != self.vcid {
            return Err(BuilderError::WrongChannel {
                expected: self.vcid,
                actual: packet.vcid,
            });
        }

        let shared = Arc::clone(&self.shared);
        let part = shared.decoder.decode(packet, payload)?;
        let key = part.key();
        let variant = part.variant();
        let dir = shared.transaction_dir(&part);

        let storage = shared.store.store(&dir, &part)?;

        let mut started = None;
        let mut pending = Vec::new();
        let trigger = {
            let mut guard = shared.registry.lock();
            let registry = &mut *guard;

            if !registry.transactions.contains_key(&key) {
                let metadata = ProductMetadata::new(&part);
                let mut log = TransactionLog::open(&dir)?;
                log.append(&TransactionEvent::opened(&metadata))?;
                tracing::info!(transaction = %key, filename = %metadata.filename, "transaction opened");
                started = Some(metadata.clone());
                registry.transactions.insert(
                    key.clone(),
                    Transaction {
                        dir: dir.clone(),
                        metadata,
                        log,
                        parts: Vec::new(),
                    },
                );
            }

            let record = PartRecord::new(&part, storage);
            if let Some(txn) = registry.transactions.get_mut(&key) {
                txn.log
                    .append(&TransactionEvent::part_received(record.clone()))?;
                txn.metadata.absorb(&record);
                if variant.carries_data() {
                    txn.parts.push(storage);
                }
            }

            let tracker = registry.tracker.as_mut();
            match variant {
                PduVariant::Metadata => tracker.record_metadata(&key),
                PduVariant::Data => tracker.record_part(&key, part.part_number()),
                PduVariant::End => tracker.record_end(&key),
                PduVariant::DataAndEnd => {
                    tracker.record_part(&key, part.part_number());
                    tracker.record_end(&key);
                }
            }

            let total = part.pdu.total_parts;
            let mut decision = decide(
                &shared.policy,
                registry.tracker.as_mut(),
                &mut self.last,
                &key,
                variant,
                total,
            );
            let trigger = decision.trigger;

            if decision.trigger == AssemblyTrigger::ProdChange {
                if let Some(prev) = decision.finalize.take() {
                    pending.extend(registry.take_pending(&prev, AssemblyTrigger::ProdChange));
                }
                // The current part may complete its own product too.
                decision = decide(
                    &shared.policy,
                    registry.tracker.as_mut(),
                    &mut self.last,
                    &key,
                    variant,
                    total,
                );
            }
            if decision.trigger == AssemblyTrigger::EndPart {
                pending.extend(registry.take_pending(&key, AssemblyTrigger::EndPart));
                self.last.clear(&key);
            }
            shared.forget_filenames(registry, &pending);
            trigger
        };

        if let Some(metadata) = started {
            shared.tracking.product_started();
            shared.events.product_started(&metadata);
        }
        shared.tracking.part_stored(storage.length as usize);

        let finalized = shared.finalize_all(pending)?;
        Ok(ProcessOutcome {
            transaction: key,
            variant,
            storage,
            trigger,
            finalized,
        })
    }
}

impl Drop for ChannelWorker {
    fn drop(&mut self) {
        self.shared.claimed.lock().remove(&self.vcid);
    }
}

/// Assembles a [`ProductBuilder`] with injectable collaborators.
pub struct EngineBuilder {
    config: BuilderConfig,
    adaptation: Option<Arc<dyn MissionAdaptation>>,
    filenames: Option<Arc<dyn FilenameMap>>,
    tracker: Option<Box<dyn PartsTracker>>,
    namer: Option<Arc<dyn ProductNamer>>,
    events: Option<Arc<dyn ProductEvents>>,
}

impl EngineBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        Self {
            config,
            adaptation: None,
            filenames: None,
            tracker: None,
            namer: None,
            events: None,
        }
    }

    pub fn adaptation(mut self, adaptation: Arc<dyn MissionAdaptation>) -> Self {
        self.adaptation = Some(adaptation);
        self
    }

    pub fn filename_map(mut self, filenames: Arc<dyn FilenameMap>) -> Self {
        self.filenames = Some(filenames);
        self
    }

    pub fn tracker(mut self, tracker: Box<dyn PartsTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn namer(mut self, namer: Arc<dyn ProductNamer>) -> Self {
        self.namer = Some(namer);
        self
    }

    pub fn events(mut self, events: Arc<dyn ProductEvents>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<ProductBuilder, BuilderError> {
        let config = self.config;
        config.validate()?;

        let codec = PduCodec::new(config.max_part_offset)
            .with_upper_63_tsn_bits(config.use_upper_63_tsn_bits);
        let adaptation = self
            .adaptation
            .unwrap_or_else(|| Arc::new(ReferenceAdaptation::from_config(&config)));
        let filenames = self
            .filenames
            .unwrap_or_else(|| Arc::new(InMemoryFilenameMap::new()));
        let namer = self
            .namer
            .unwrap_or_else(|| Arc::new(VersionedNamer::new(&config.output_dir)));

        let shared = Shared {
            policy: TriggerPolicy::from_config(&config),
            decoder: PartDecoder::new(codec, adaptation, Arc::clone(&filenames)),
            filenames,
            store: PartStore::new(config.max_part_offset),
            finalizer: Finalizer::from_config(&config, namer),
            events: self.events.unwrap_or_else(|| Arc::new(TracingEvents)),
            tracking: TrackingService::new(),
            registry: Mutex::new(Registry {
                tracker: self
                    .tracker
                    .unwrap_or_else(|| Box::new(ReceivedPartsTracker::new())),
                transactions: HashMap::new(),
            }),
            claimed: Mutex::new(HashSet::new()),
            config,
        };
        tracing::debug!(
            active = %shared.config.active_dir.display(),
            output = %shared.config.output_dir.display(),
            "product builder ready"
        );
        Ok(ProductBuilder {
            shared: Arc::new(shared),
        })
    }
}
