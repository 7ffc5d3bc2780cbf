// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transaction sequence number to product filename association.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Shared lookup of filenames learned from metadata PDUs.
pub trait FilenameMap: Send + Sync {
    fn get(&self, transaction: u64) -> Option<String>;

    fn insert(&self, transaction: u64, filename: String);

    fn remove(&self, transaction: u64) -> Option<String>;
}

/// Process-local map.
#[derive(Debug, Default)]
pub struct InMemoryFilenameMap {
    names: RwLock<HashMap<u64, String>>,
}

impl InMemoryFilenameMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.read().is_empty()
    }
}

impl FilenameMap for InMemoryFilenameMap {
    fn get(&self, transaction: u64) -> Option<String> {
        self.names.read().get(&transaction).cloned()
    }

    fn insert(&self, transaction: u64, filename: String) {
        self.names.write().insert(transaction, filename);
    }

    fn remove(&self, transaction: u64) -> Option<String> {
        self.names.write().remove(&transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let map = InMemoryFilenameMap::new();
        assert!(map.is_empty());

        map.insert(7, "img_1-2".into());
        map.insert(7, "img_3-4".into());
        assert_eq!(map.get(7).as_deref(), Some("img_3-4"));
        assert_eq!(map.len(), 1);

        assert_eq!(map.remove(7).as_deref(), Some("img_3-4"));
        assert_eq!(map.get(7), None);
    }
}
