use std::collections::HashMap;
use std::time::{Duration, Instant};

use basalt_store::{KeyValueStore, WriteBatch};
use tracing::debug;

use crate::doc_db::DocDb;
use crate::encoding::doc_key::{DocKey, append_doc_ht};
use crate::encoding::primitive::PrimitiveValue;
use crate::error::EngineError;
use crate::hybrid_time::{DocHybridTime, HybridTime};
use crate::intent::{
    IntentStrength, ancestor_prefixes, encode_intent_key, encode_intent_value,
    encode_reverse_key,
};
use crate::txn::TransactionId;
use crate::value::Value;

/// Logical path of one write: an encoded doc key plus subkeys leading to
/// the target. An empty subkey list addresses the document root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocPath {
    encoded_doc_key: Vec<u8>,
    subkeys: Vec<PrimitiveValue>,
}

impl DocPath {
    pub fn root(encoded_doc_key: impl Into<Vec<u8>>) -> Self {
        DocPath {
            encoded_doc_key: encoded_doc_key.into(),
            subkeys: Vec::new(),
        }
    }

    pub fn new(encoded_doc_key: impl Into<Vec<u8>>, subkeys: Vec<PrimitiveValue>) -> Self {
        DocPath {
            encoded_doc_key: encoded_doc_key.into(),
            subkeys,
        }
    }

    pub fn encoded_doc_key(&self) -> &[u8] {
        &self.encoded_doc_key
    }

    pub fn subkeys(&self) -> &[PrimitiveValue] {
        &self.subkeys
    }

    /// Encoded doc key plus all subkeys; the storage key without its
    /// version marker.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.encoded_doc_key.clone();
        for subkey in &self.subkeys {
            subkey.append_to(&mut out);
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    doc_ht: DocHybridTime,
    is_tombstone: bool,
}

/// Collects logical document mutations and flushes them as one atomic
/// append stamped with a single hybrid time.
///
/// The batch keeps a cache of every path it has read or written, so a
/// second touch of a path or of anything under an already-touched ancestor
/// never seeks into the engine again. The cache belongs to this batch alone
/// and dies at flush.
///
/// Single-writer: a batch is not thread-safe.
pub struct DocWriteBatch<'a, S: KeyValueStore> {
    doc_db: &'a DocDb<S>,
    transaction: Option<TransactionId>,
    ops: Vec<(DocPath, Value)>,
    cache: HashMap<Vec<u8>, CacheEntry>,
    deadline: Instant,
}

impl<'a, S: KeyValueStore> DocWriteBatch<'a, S> {
    pub fn new(doc_db: &'a DocDb<S>) -> Self {
        Self {
            doc_db,
            transaction: None,
            ops: Vec::new(),
            cache: HashMap::new(),
            deadline: Instant::now() + Duration::from_secs(60),
        }
    }

    /// Makes the batch provisional: flushing emits intent records owned by
    /// `txn` instead of committed versions.
    pub fn with_transaction(mut self, txn: TransactionId) -> Self {
        self.transaction = Some(txn);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Writes a primitive (or tombstone) at `path`.
    ///
    /// Overwriting a leaf needs no engine read; the path is only recorded
    /// in the batch cache.
    pub fn set_primitive(&mut self, path: &DocPath, value: Value) -> Result<(), EngineError> {
        if self.ops.len() == u32::MAX as usize {
            return Err(EngineError::IllegalState(
                "write batch exceeds the per-batch write id space".into(),
            ));
        }
        let encoded = path.encode();
        debug!(key_len = encoded.len(), "set_primitive");
        let is_tombstone = value.is_tombstone();
        self.record_write(encoded, is_tombstone);
        self.ops.push((path.clone(), value));
        Ok(())
    }

    /// Writes a tombstone at `path`, hiding every older and less specific
    /// write at or below it.
    ///
    /// Deletions look the target up first (callers get to report whether
    /// something was there), but the lookup is skipped when this batch
    /// already touched the path or one of its ancestors.
    pub fn delete_sub_doc(&mut self, path: &DocPath) -> Result<(), EngineError> {
        let encoded = path.encode();
        match self.cached_entry(&encoded, path) {
            Some(entry) => {
                debug!(
                    doc_ht = %entry.doc_ht,
                    tombstone = entry.is_tombstone,
                    "delete hit batch cache, skipping seek"
                );
            }
            None => self.seek_to_key_prefix(&encoded)?,
        }
        self.set_primitive(path, Value::tombstone())
    }

    /// What this batch already knows about `encoded` or its closest
    /// already-touched ancestor path.
    fn cached_entry(&self, encoded: &[u8], path: &DocPath) -> Option<CacheEntry> {
        if let Some(entry) = self.cache.get(encoded) {
            return Some(*entry);
        }
        let mut prefix = path.encoded_doc_key().to_vec();
        if let Some(entry) = self.cache.get(&prefix) {
            return Some(*entry);
        }
        for subkey in path.subkeys() {
            subkey.append_to(&mut prefix);
            if let Some(entry) = self.cache.get(&prefix) {
                return Some(*entry);
            }
        }
        None
    }

    /// One engine seek to learn whether anything lives at `encoded`; the
    /// answer lands in the batch cache.
    fn seek_to_key_prefix(&mut self, encoded: &[u8]) -> Result<(), EngineError> {
        let mut iter = self
            .doc_db
            .intent_aware_iter(HybridTime::MAX, None, self.deadline);
        iter.seek(encoded)?;
        if !iter.valid() {
            return Ok(());
        }
        let fetched = iter.fetch_key()?;
        if !fetched.key.starts_with(encoded) {
            return Ok(());
        }
        let is_tombstone = if fetched.key == encoded {
            Value::decode(iter.value())?.is_tombstone()
        } else {
            // Only a descendant exists; the path itself holds no record.
            false
        };
        self.cache.insert(
            fetched.key,
            CacheEntry {
                doc_ht: fetched.write_time,
                is_tombstone,
            },
        );
        Ok(())
    }

    fn record_write(&mut self, encoded: Vec<u8>, is_tombstone: bool) {
        // Flush assigns the real time; within the batch only relative write
        // order matters.
        let doc_ht = DocHybridTime::new(HybridTime::MAX, self.ops.len() as u32);
        self.cache.insert(
            encoded,
            CacheEntry {
                doc_ht,
                is_tombstone,
            },
        );
    }

    /// Stamps every collected op with `hybrid_time` and applies them as one
    /// atomic append, then resets the batch (write ids restart at zero).
    ///
    /// Non-transactional batches write committed versions to the regular
    /// store. Transactional batches write forward intents plus the reverse
    /// index to the intents store.
    pub fn flush(&mut self, hybrid_time: HybridTime) -> Result<(), EngineError> {
        let ops = std::mem::take(&mut self.ops);
        self.cache.clear();
        if ops.is_empty() {
            return Ok(());
        }
        match self.transaction {
            None => {
                let mut batch = WriteBatch::new();
                for (write_id, (path, value)) in ops.iter().enumerate() {
                    let mut key = path.encode();
                    append_doc_ht(
                        DocHybridTime::new(hybrid_time, write_id as u32),
                        &mut key,
                    );
                    batch.put(key, value.encode());
                }
                self.doc_db.regular.apply(batch)?;
            }
            Some(txn) => {
                let batch = build_intent_batch(&ops, txn, hybrid_time)?;
                self.doc_db.intents.apply(batch)?;
            }
        }
        Ok(())
    }
}

/// Expands logical ops into forward intent records plus the reverse index.
///
/// One write-id counter runs through the whole batch: op `i` takes a strong
/// intent on its exact path carrying write id `i` both in the value and in
/// the key's version marker; afterwards every distinct strict ancestor
/// takes one weak intent, in byte order, continuing the counter. Each
/// physical intent gets exactly one reverse-index record keyed by its
/// version marker, so per-batch reverse keys never collide.
fn build_intent_batch(
    ops: &[(DocPath, Value)],
    txn: TransactionId,
    hybrid_time: HybridTime,
) -> Result<WriteBatch, EngineError> {
    let mut batch = WriteBatch::new();
    let mut write_id = 0u32;
    let mut weak_paths = std::collections::BTreeSet::new();

    for (path, value) in ops {
        let doc_key = DocKey::decode(path.encoded_doc_key())?;
        let strong_ht = DocHybridTime::new(hybrid_time, write_id);
        let strong_key = encode_intent_key(&path.encode(), IntentStrength::Strong, strong_ht);
        batch.put(encode_reverse_key(txn, strong_ht), strong_key.clone());
        batch.put(
            strong_key,
            encode_intent_value(txn, Some(write_id), &value.encode()),
        );
        write_id += 1;
        weak_paths.extend(ancestor_prefixes(&doc_key, path.subkeys()));
    }

    for ancestor in weak_paths {
        let weak_ht = DocHybridTime::new(hybrid_time, write_id);
        let weak_key = encode_intent_key(&ancestor, IntentStrength::Weak, weak_ht);
        batch.put(encode_reverse_key(txn, weak_ht), weak_key.clone());
        batch.put(weak_key, encode_intent_value(txn, None, &[]));
        write_id += 1;
    }
    Ok(batch)
}
