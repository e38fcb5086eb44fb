use crate::error::StoreError;

/// A single mutation in a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// An ordered group of mutations applied as one atomic append.
///
/// Later entries for the same key win, which gives batches map semantics
/// when a caller emits duplicate keys on purpose.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(WriteOp::Put(key, value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(WriteOp::Delete(key));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Forward cursor over unique byte keys in ascending order.
///
/// `key`/`value` must only be called while `valid()` is true.
pub trait KvIterator {
    /// Position at the first entry with key >= `key`.
    fn seek(&mut self, key: &[u8]);
    fn valid(&self) -> bool;
    fn key(&self) -> &[u8];
    fn value(&self) -> &[u8];
    fn next(&mut self);
}

/// An ordered byte key-value store supporting snapshot reads and atomic
/// batch writes.
pub trait KeyValueStore {
    type Iter: KvIterator;

    /// Returns an iterator over an independent point-in-time snapshot.
    /// Snapshots taken by concurrent readers never observe partial batches.
    fn snapshot_iter(&self) -> Self::Iter;

    /// Applies all mutations in `batch` as one atomic append.
    fn apply(&self, batch: WriteBatch) -> Result<(), StoreError>;
}
