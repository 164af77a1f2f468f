use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::models::Collection;

/// Counters for one collection
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectionStats {
    /// Coalesced writes sent to the remote store
    pub writes_issued: u64,
    /// Coalesced writes the remote store rejected
    pub writes_failed: u64,
    /// Create/delete/rename operations submitted directly
    pub immediate_operations: u64,
    /// Push events handed to a store
    pub events_delivered: u64,
    /// Push events dropped (wrong scope or undecodable)
    pub events_discarded: u64,
}

#[derive(Debug, Default, Clone)]
pub struct SyncStats {
    pub by_collection: HashMap<Collection, CollectionStats>,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection(&self, collection: Collection) -> CollectionStats {
        self.by_collection
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Sum across all collections
    pub fn total(&self) -> CollectionStats {
        self.by_collection
            .values()
            .fold(CollectionStats::default(), |mut acc, s| {
                acc.writes_issued += s.writes_issued;
                acc.writes_failed += s.writes_failed;
                acc.immediate_operations += s.immediate_operations;
                acc.events_delivered += s.events_delivered;
                acc.events_discarded += s.events_discarded;
                acc
            })
    }

    fn entry(&mut self, collection: Collection) -> &mut CollectionStats {
        self.by_collection.entry(collection).or_default()
    }
}

/// Thread-safe wrapper for sync stats
#[derive(Debug, Clone)]
pub struct SharedSyncStats {
    inner: Arc<RwLock<SyncStats>>,
}

impl Default for SharedSyncStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedSyncStats {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(SyncStats::new())),
        }
    }

    fn with(&self, collection: Collection, f: impl FnOnce(&mut CollectionStats)) {
        if let Ok(mut stats) = self.inner.write() {
            f(stats.entry(collection));
        }
    }

    pub fn record_write(&self, collection: Collection) {
        self.with(collection, |s| s.writes_issued += 1);
    }

    pub fn record_write_failure(&self, collection: Collection) {
        self.with(collection, |s| s.writes_failed += 1);
    }

    pub fn record_immediate(&self, collection: Collection) {
        self.with(collection, |s| s.immediate_operations += 1);
    }

    pub fn record_delivered(&self, collection: Collection) {
        self.with(collection, |s| s.events_delivered += 1);
    }

    pub fn record_discarded(&self, collection: Collection) {
        self.with(collection, |s| s.events_discarded += 1);
    }

    pub fn snapshot(&self) -> SyncStats {
        self.inner.read().map(|s| s.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_per_collection() {
        let stats = SharedSyncStats::new();
        stats.record_write(Collection::Files);
        stats.record_write(Collection::Files);
        stats.record_write_failure(Collection::Files);
        stats.record_discarded(Collection::Messages);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.collection(Collection::Files).writes_issued, 2);
        assert_eq!(snapshot.collection(Collection::Files).writes_failed, 1);
        assert_eq!(snapshot.collection(Collection::Projects), CollectionStats::default());
        assert_eq!(snapshot.total().events_discarded, 1);
    }
}
