use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use imbl::OrdMap;

use crate::error::StoreError;
use crate::store::{KeyValueStore, KvIterator, WriteBatch, WriteOp};

type Map = OrdMap<Vec<u8>, Vec<u8>>;

/// In-memory ordered store.
///
/// The full map lives behind an `ArcSwap`; snapshots are O(1) structural
/// shares thanks to `imbl`. Writers serialize on a mutex and publish a new
/// map atomically, so readers never observe a partial batch.
pub struct MemoryStore {
    data: ArcSwap<Map>,
    write_lock: Mutex<()>,
    seeks: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: ArcSwap::new(Arc::new(Map::new())),
            write_lock: Mutex::new(()),
            seeks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Total number of `seek` calls issued by iterators of this store.
    /// Test instrumentation for callers that promise to skip seeks.
    pub fn seek_count(&self) -> u64 {
        self.seeks.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.data.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.load().is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    type Iter = MemoryIterator;

    fn snapshot_iter(&self) -> MemoryIterator {
        MemoryIterator {
            data: (**self.data.load()).clone(),
            seeks: Arc::clone(&self.seeks),
            entry: None,
        }
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| StoreError::Storage(format!("write lock poisoned: {e}")))?;
        let mut data = (**self.data.load()).clone();
        for op in batch.into_ops() {
            match op {
                WriteOp::Put(key, value) => {
                    data.insert(key, value);
                }
                WriteOp::Delete(key) => {
                    data.remove(&key);
                }
            }
        }
        self.data.store(Arc::new(data));
        Ok(())
    }
}

/// Owning snapshot iterator over a [`MemoryStore`].
///
/// Holds its own clone of the map, so it stays valid regardless of later
/// writes to the store.
pub struct MemoryIterator {
    data: Map,
    seeks: Arc<AtomicU64>,
    entry: Option<(Vec<u8>, Vec<u8>)>,
}

impl KvIterator for MemoryIterator {
    fn seek(&mut self, key: &[u8]) {
        self.seeks.fetch_add(1, Ordering::Relaxed);
        let range: (Bound<&[u8]>, Bound<&[u8]>) = (Bound::Included(key), Bound::Unbounded);
        self.entry = self
            .data
            .range::<_, [u8]>(range)
            .next()
            .map(|(k, v)| (k.clone(), v.clone()));
    }

    fn valid(&self) -> bool {
        self.entry.is_some()
    }

    fn key(&self) -> &[u8] {
        &self.entry.as_ref().expect("iterator not valid").0
    }

    fn value(&self) -> &[u8] {
        &self.entry.as_ref().expect("iterator not valid").1
    }

    fn next(&mut self) {
        let Some((current, _)) = self.entry.take() else {
            return;
        };
        let range: (Bound<&[u8]>, Bound<&[u8]>) =
            (Bound::Excluded(current.as_slice()), Bound::Unbounded);
        self.entry = self
            .data
            .range::<_, [u8]>(range)
            .next()
            .map(|(k, v)| (k.clone(), v.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(entries: &[(&[u8], &[u8])]) -> MemoryStore {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        for (k, v) in entries {
            batch.put(k.to_vec(), v.to_vec());
        }
        store.apply(batch).unwrap();
        store
    }

    #[test]
    fn seek_positions_at_first_ge_key() {
        let store = store_with(&[(b"a", b"1"), (b"c", b"2"), (b"e", b"3")]);
        let mut iter = store.snapshot_iter();
        iter.seek(b"b");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"c");
        assert_eq!(iter.value(), b"2");
    }

    #[test]
    fn next_walks_in_order() {
        let store = store_with(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]);
        let mut iter = store.snapshot_iter();
        iter.seek(b"");
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn seek_past_end_is_invalid() {
        let store = store_with(&[(b"a", b"1")]);
        let mut iter = store.snapshot_iter();
        iter.seek(b"z");
        assert!(!iter.valid());
    }

    #[test]
    fn snapshot_does_not_see_later_writes() {
        let store = store_with(&[(b"a", b"1")]);
        let mut iter = store.snapshot_iter();

        let mut batch = WriteBatch::new();
        batch.put(b"b".to_vec(), b"2".to_vec());
        store.apply(batch).unwrap();

        iter.seek(b"b");
        assert!(!iter.valid());

        let mut fresh = store.snapshot_iter();
        fresh.seek(b"b");
        assert!(fresh.valid());
    }

    #[test]
    fn batch_is_atomic_and_last_write_wins() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"old".to_vec());
        batch.put(b"k".to_vec(), b"new".to_vec());
        store.apply(batch).unwrap();

        let mut iter = store.snapshot_iter();
        iter.seek(b"k");
        assert_eq!(iter.value(), b"new");
    }

    #[test]
    fn delete_removes_key() {
        let store = store_with(&[(b"a", b"1"), (b"b", b"2")]);
        let mut batch = WriteBatch::new();
        batch.delete(b"a".to_vec());
        store.apply(batch).unwrap();

        let mut iter = store.snapshot_iter();
        iter.seek(b"");
        assert_eq!(iter.key(), b"b");
    }

    #[test]
    fn seek_counter_tracks_iterator_seeks() {
        let store = store_with(&[(b"a", b"1")]);
        assert_eq!(store.seek_count(), 0);
        let mut iter = store.snapshot_iter();
        iter.seek(b"");
        iter.seek(b"a");
        iter.next();
        assert_eq!(store.seek_count(), 2);
    }
}
