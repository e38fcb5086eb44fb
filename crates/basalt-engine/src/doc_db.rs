use std::time::Instant;

use basalt_store::{KeyValueStore, MemoryStore};

use crate::hybrid_time::HybridTime;
use crate::intent_iter::IntentAwareIterator;
use crate::txn::TransactionContext;

/// The two stores every reader and writer operates on: committed versioned
/// records, and provisional transactional records with their reverse index.
pub struct DocDb<S> {
    pub regular: S,
    pub intents: S,
}

impl<S: KeyValueStore> DocDb<S> {
    pub fn new(regular: S, intents: S) -> Self {
        Self { regular, intents }
    }

    /// Builds a merged iterator over this pair at `read_time`.
    ///
    /// The intents snapshot is taken before the regular snapshot. The other
    /// order can lose a write: a transaction applied between the two
    /// snapshots would be missing from an older regular snapshot while its
    /// already-deleted intents are missing from a newer intents snapshot.
    pub fn intent_aware_iter(
        &self,
        read_time: HybridTime,
        txn: Option<TransactionContext>,
        deadline: Instant,
    ) -> IntentAwareIterator<S::Iter> {
        let intents_iter = txn.as_ref().map(|_| self.intents.snapshot_iter());
        let regular_iter = self.regular.snapshot_iter();
        IntentAwareIterator::new(regular_iter, intents_iter, read_time, txn, deadline)
    }
}

impl DocDb<MemoryStore> {
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new(), MemoryStore::new())
    }
}
