// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fire-and-forget product lifecycle notifications.

use crate::finalize::FinalizedProduct;
use crate::metadata::ProductMetadata;

/// Receiver of product lifecycle notifications.
pub trait ProductEvents: Send + Sync {
    /// Called once per transaction, after its Opened event is logged.
    fn product_started(&self, metadata: &ProductMetadata);

    /// Called once per successful finalize.
    fn product_assembled(&self, product: &FinalizedProduct);
}

/// Emits notifications as structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEvents;

impl ProductEvents for TracingEvents {
    fn product_started(&self, metadata: &ProductMetadata) {
        tracing::info!(
            transaction = %metadata.transaction_id,
            vcid = metadata.vcid,
            apid = metadata.apid,
            filename = %metadata.filename,
            "product started"
        );
    }

    fn product_assembled(&self, product: &FinalizedProduct) {
        let metadata = &product.metadata;
        if metadata.is_partial {
            tracing::info!(
                transaction = %product.key,
                status = %metadata.ground_status,
                version = %product.files.version,
                "partial product"
            );
        } else {
            tracing::info!(
                transaction = %product.key,
                status = %metadata.ground_status,
                version = %product.files.version,
                "product assembled"
            );
        }
    }
}
