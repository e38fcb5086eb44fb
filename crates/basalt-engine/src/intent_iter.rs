use std::time::Instant;

use basalt_store::KvIterator;
use tracing::trace;

use crate::encoding::doc_key::{append_doc_ht, split_doc_ht};
use crate::encoding::tags;
use crate::error::EngineError;
use crate::hybrid_time::{DocHybridTime, HybridTime};
use crate::intent::{
    IntentStrength, decode_intent_key, decode_intent_value, is_intent_for_same_key,
    is_reverse_key,
};
use crate::txn::{StatusCache, TransactionContext};

/// The winning entry at the iterator's current position.
#[derive(Debug, Clone)]
pub struct FetchedKey {
    /// Encoded subdoc key without the version marker.
    pub key: Vec<u8>,
    /// Resolved write time: the commit time for another transaction's
    /// intent, the local write time otherwise.
    pub write_time: DocHybridTime,
    pub same_transaction: bool,
}

/// An intent resolved to a concrete visible version.
struct ResolvedIntent {
    /// Encoded subdoc key without version marker.
    key_prefix: Vec<u8>,
    /// Time used to order the intent against regular records and other
    /// intents. Own-transaction intents order at the read time so they
    /// shadow every other visible write of the cell.
    sort_ht: DocHybridTime,
    /// Time reported to callers via [`FetchedKey`].
    report_ht: DocHybridTime,
    same_transaction: bool,
    /// Local write time when this is the reading transaction's own intent,
    /// `DocHybridTime::MIN` otherwise. Own intents of one cell compare on
    /// this, since they all share the shadowing `sort_ht`.
    own_local_ht: DocHybridTime,
    txn_id: crate::txn::TransactionId,
    /// Encoded [`crate::value::Value`] bytes.
    value: Vec<u8>,
}

impl ResolvedIntent {
    /// Full ordering key: prefix + version marker, comparable byte-wise
    /// with regular store keys.
    fn encoded_sub_doc_key(&self) -> Vec<u8> {
        let mut out = self.key_prefix.clone();
        append_doc_ht(self.sort_ht, &mut out);
        out
    }
}

/// Merges the regular versioned-record stream with the visible subset of
/// the intent stream, surfacing for each path the most recent version at or
/// below the read time.
///
/// An explicit two-cursor state machine: after every repositioning, the
/// regular cursor is advanced past future versions and the intent cursor is
/// resolved to the first path with a visible strong intent. `fetch_key`
/// then reports whichever cursor holds the smaller position.
///
/// Not internally synchronized; callers serialize access to one instance.
pub struct IntentAwareIterator<I: KvIterator> {
    regular: I,
    intents: Option<I>,
    read_time: HybridTime,
    txn: Option<TransactionContext>,
    status_cache: StatusCache,
    deadline: Instant,
    regular_valid: bool,
    resolved_intent: Option<ResolvedIntent>,
}

impl<I: KvIterator> IntentAwareIterator<I> {
    pub fn new(
        regular: I,
        intents: Option<I>,
        read_time: HybridTime,
        txn: Option<TransactionContext>,
        deadline: Instant,
    ) -> Self {
        Self {
            regular,
            intents,
            read_time,
            txn,
            status_cache: StatusCache::new(read_time, deadline),
            deadline,
            regular_valid: false,
            resolved_intent: None,
        }
    }

    pub fn read_time(&self) -> HybridTime {
        self.read_time
    }

    fn check_deadline(&self) -> Result<(), EngineError> {
        if Instant::now() >= self.deadline {
            return Err(EngineError::TimedOut("iterator deadline exceeded".into()));
        }
        Ok(())
    }

    /// Positions both streams at the first visible entry with subdoc key
    /// >= `key` (encoded without a version marker). Re-seeking to the same
    /// key yields the same state.
    pub fn seek(&mut self, key: &[u8]) -> Result<(), EngineError> {
        self.check_deadline()?;
        trace!(key_len = key.len(), "seek");
        self.regular.seek(key);
        self.skip_future_regular()?;
        if self.intents.is_some() {
            self.intents.as_mut().unwrap().seek(key);
            self.seek_to_suitable_intent()?;
        }
        Ok(())
    }

    /// Skips every remaining version of exactly the path `key_without_ht`,
    /// landing on its first child path or the next sibling.
    pub fn seek_past_sub_key(&mut self, key_without_ht: &[u8]) -> Result<(), EngineError> {
        self.check_deadline()?;
        let mut target = Vec::with_capacity(key_without_ht.len() + 1);
        target.extend_from_slice(key_without_ht);
        target.push(tags::HYBRID_TIME + 1);
        self.regular.seek(&target);
        self.skip_future_regular()?;

        if self.intents.is_some() {
            let keep = self
                .resolved_intent
                .as_ref()
                .is_some_and(|ri| ri.key_prefix.as_slice() > key_without_ht);
            if !keep {
                *target.last_mut().unwrap() = tags::INTENT_TYPE + 1;
                self.intents.as_mut().unwrap().seek(&target);
                self.seek_to_suitable_intent()?;
            }
        }
        Ok(())
    }

    /// Skips the whole subtree under `key_without_ht`: its versions, its
    /// descendants, and all of their intents.
    pub fn seek_out_of_sub_doc(&mut self, key_without_ht: &[u8]) -> Result<(), EngineError> {
        self.check_deadline()?;
        let mut target = Vec::with_capacity(key_without_ht.len() + 1);
        target.extend_from_slice(key_without_ht);
        target.push(tags::MAX_BYTE);
        self.regular.seek(&target);
        self.skip_future_regular()?;

        if self.intents.is_some() {
            let keep = self.resolved_intent.as_ref().is_some_and(|ri| {
                !ri.key_prefix.starts_with(key_without_ht)
                    && ri.key_prefix.as_slice() > key_without_ht
            });
            if !keep {
                self.intents.as_mut().unwrap().seek(&target);
                self.seek_to_suitable_intent()?;
            }
        }
        Ok(())
    }

    pub fn valid(&self) -> bool {
        self.regular_valid || self.resolved_intent.is_some()
    }

    fn entry_is_regular(&self) -> bool {
        match (&self.resolved_intent, self.regular_valid) {
            (_, false) => false,
            (None, true) => true,
            (Some(intent), true) => self.regular.key() < intent.encoded_sub_doc_key().as_slice(),
        }
    }

    /// The winning subdoc key at the current position with its resolved
    /// write time.
    pub fn fetch_key(&self) -> Result<FetchedKey, EngineError> {
        if self.entry_is_regular() {
            let (prefix, write_time) = split_doc_ht(self.regular.key())?;
            Ok(FetchedKey {
                key: prefix.to_vec(),
                write_time,
                same_transaction: false,
            })
        } else {
            let intent = self
                .resolved_intent
                .as_ref()
                .ok_or_else(|| EngineError::IllegalState("fetch_key on invalid iterator".into()))?;
            Ok(FetchedKey {
                key: intent.key_prefix.clone(),
                write_time: intent.report_ht,
                same_transaction: intent.same_transaction,
            })
        }
    }

    /// Encoded value bytes of the winning entry.
    pub fn value(&self) -> &[u8] {
        if self.entry_is_regular() {
            self.regular.value()
        } else {
            self.resolved_intent
                .as_ref()
                .map(|ri| ri.value.as_slice())
                .unwrap_or(&[])
        }
    }

    /// Advances the regular cursor until its entry is visible at the read
    /// time. Invisible means a version marker above the read time.
    fn skip_future_regular(&mut self) -> Result<(), EngineError> {
        while self.regular.valid() {
            let (_, doc_ht) = split_doc_ht(self.regular.key())?;
            if doc_ht.hybrid_time() <= self.read_time {
                self.regular_valid = true;
                return Ok(());
            }
            trace!(%doc_ht, "skipping future record");
            self.regular.next();
        }
        self.regular_valid = false;
        Ok(())
    }

    /// Scans forward from the intent cursor's position and resolves the
    /// first subdoc key that has a visible strong write intent, keeping the
    /// newest visible intent for it.
    fn seek_to_suitable_intent(&mut self) -> Result<(), EngineError> {
        self.resolved_intent = None;
        loop {
            let Some(intents) = self.intents.as_ref() else {
                return Ok(());
            };
            if !intents.valid() || is_reverse_key(intents.key()) {
                return Ok(());
            }
            if let Some(resolved) = &self.resolved_intent {
                // Only collect versions of the first path that resolved.
                if !is_intent_for_same_key(intents.key(), &resolved.key_prefix) {
                    return Ok(());
                }
            }
            let key = intents.key().to_vec();
            let value = intents.value().to_vec();
            self.process_intent(&key, &value)?;
            self.intents.as_mut().unwrap().next();
        }
    }

    /// Folds one forward intent record into the resolved-intent slot if it
    /// is a visible strong write newer than what is already there.
    fn process_intent(&mut self, key: &[u8], raw_value: &[u8]) -> Result<(), EngineError> {
        let decoded_key = decode_intent_key(key)?;
        if decoded_key.strength != IntentStrength::Strong {
            return Ok(());
        }
        let intent_value = decode_intent_value(raw_value)?;
        let txn_ctx = self.txn.as_ref().ok_or_else(|| {
            EngineError::IllegalState("intent stream without transaction context".into())
        })?;
        let same_transaction = intent_value.txn_id == txn_ctx.txn_id;
        let write_id = intent_value.write_id.ok_or_else(|| {
            EngineError::Corruption("strong intent without write id".into())
        })?;

        let (sort_ht, report_ht) = if same_transaction {
            if decoded_key.doc_ht.hybrid_time() > self.read_time {
                return Ok(());
            }
            // Own writes shadow every other transaction's visible write of
            // the cell, while their relative order keeps the local time.
            (
                DocHybridTime::new(self.read_time, u32::MAX),
                decoded_key.doc_ht,
            )
        } else {
            let commit_ht = self
                .status_cache
                .commit_time(txn_ctx.provider.as_ref(), intent_value.txn_id)?;
            if commit_ht == HybridTime::MIN {
                return Ok(());
            }
            let resolved = DocHybridTime::new(commit_ht, write_id);
            (resolved, resolved)
        };

        match &self.resolved_intent {
            Some(current) if current.key_prefix.as_slice() == decoded_key.prefix => {
                let replace = if same_transaction && current.same_transaction {
                    // Own intents of the cell share sort_ht; order them by
                    // their local write times.
                    decoded_key.doc_ht > current.own_local_ht
                } else {
                    // Newest wins; equal resolved times tie-break on the
                    // owning transaction id so the outcome never depends on
                    // scan order.
                    (sort_ht, intent_value.txn_id) > (current.sort_ht, current.txn_id)
                };
                if !replace {
                    return Ok(());
                }
            }
            Some(_) => return Ok(()),
            None => {}
        }
        trace!(txn = %intent_value.txn_id, %sort_ht, "resolved intent");
        self.resolved_intent = Some(ResolvedIntent {
            key_prefix: decoded_key.prefix.to_vec(),
            sort_ht,
            report_ht,
            same_transaction,
            own_local_ht: if same_transaction {
                decoded_key.doc_ht
            } else {
                DocHybridTime::MIN
            },
            txn_id: intent_value.txn_id,
            value: intent_value.body,
        });
        Ok(())
    }

    /// Smallest version time of exactly `subkey_without_ht` strictly above
    /// `min_ht`, across both streams; `HybridTime::INVALID` if none.
    ///
    /// Walks version history without read-time filtering, so callers can
    /// pick a stable backfill time. Leaves the iterator unpositioned; seek
    /// again before reading through it.
    pub fn find_oldest_record(
        &mut self,
        subkey_without_ht: &[u8],
        min_ht: HybridTime,
    ) -> Result<HybridTime, EngineError> {
        self.check_deadline()?;
        let mut oldest = HybridTime::INVALID;
        let mut consider = |ht: HybridTime| {
            if ht > min_ht && (oldest == HybridTime::INVALID || ht < oldest) {
                oldest = ht;
            }
        };

        self.regular.seek(subkey_without_ht);
        while self.regular.valid() {
            let key = self.regular.key();
            if !key.starts_with(subkey_without_ht) {
                break;
            }
            let (prefix, doc_ht) = split_doc_ht(key)?;
            if prefix != subkey_without_ht {
                break;
            }
            consider(doc_ht.hybrid_time());
            self.regular.next();
        }
        self.regular_valid = false;

        if let Some(intents) = self.intents.as_mut() {
            intents.seek(subkey_without_ht);
            let mut visible_times = Vec::new();
            while intents.valid() && is_intent_for_same_key(intents.key(), subkey_without_ht) {
                let decoded_key = decode_intent_key(intents.key())?;
                if decoded_key.strength == IntentStrength::Strong {
                    let intent_value = decode_intent_value(intents.value())?;
                    visible_times.push((intent_value.txn_id, decoded_key.doc_ht));
                }
                intents.next();
            }
            let txn_ctx = self.txn.clone();
            for (txn_id, doc_ht) in visible_times {
                let Some(ctx) = txn_ctx.as_ref() else { continue };
                if txn_id == ctx.txn_id {
                    consider(doc_ht.hybrid_time());
                } else {
                    let commit_ht = self
                        .status_cache
                        .commit_time(ctx.provider.as_ref(), txn_id)?;
                    if commit_ht != HybridTime::MIN {
                        consider(commit_ht);
                    }
                }
            }
            self.resolved_intent = None;
        }

        Ok(oldest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::doc_key::DocKey;
    use crate::encoding::primitive::PrimitiveValue;
    use crate::value::Value;
    use basalt_store::{KeyValueStore, MemoryStore, WriteBatch};
    use std::time::Duration;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn put_regular(store: &MemoryStore, key_prefix: &[u8], micros: u64, w: u32, value: &Value) {
        let mut key = key_prefix.to_vec();
        append_doc_ht(
            DocHybridTime::new(HybridTime::from_micros(micros), w),
            &mut key,
        );
        let mut batch = WriteBatch::new();
        batch.put(key, value.encode());
        store.apply(batch).unwrap();
    }

    fn row1_col(column: u32) -> Vec<u8> {
        let mut key = DocKey::new(vec![
            PrimitiveValue::from("row1"),
            PrimitiveValue::from(11111i64),
        ])
        .encode();
        PrimitiveValue::ColumnId(crate::schema::ColumnId(column)).append_to(&mut key);
        key
    }

    #[test]
    fn seek_skips_versions_above_read_time() {
        let store = MemoryStore::new();
        let key = row1_col(40);
        put_regular(&store, &key, 3000, 0, &Value::new(PrimitiveValue::from(30000i64)));
        put_regular(&store, &key, 2000, 0, &Value::new(PrimitiveValue::from(20000i64)));

        let mut iter = IntentAwareIterator::new(
            store.snapshot_iter(),
            None,
            HybridTime::from_micros(2500),
            None,
            far_deadline(),
        );
        iter.seek(&key).unwrap();
        assert!(iter.valid());
        let fetched = iter.fetch_key().unwrap();
        assert_eq!(fetched.key, key);
        assert_eq!(
            fetched.write_time.hybrid_time(),
            HybridTime::from_micros(2000)
        );
        let value = Value::decode(iter.value()).unwrap();
        assert_eq!(value.primitive(), &PrimitiveValue::from(20000i64));
    }

    #[test]
    fn reseek_is_idempotent() {
        let store = MemoryStore::new();
        let key = row1_col(40);
        put_regular(&store, &key, 1000, 0, &Value::new(PrimitiveValue::from(1i64)));

        let mut iter = IntentAwareIterator::new(
            store.snapshot_iter(),
            None,
            HybridTime::from_micros(2000),
            None,
            far_deadline(),
        );
        iter.seek(&key).unwrap();
        let first = iter.fetch_key().unwrap();
        iter.seek(&key).unwrap();
        let second = iter.fetch_key().unwrap();
        assert_eq!(first.key, second.key);
        assert_eq!(first.write_time, second.write_time);
    }

    #[test]
    fn seek_past_sub_key_moves_to_next_column() {
        let store = MemoryStore::new();
        let col40 = row1_col(40);
        let col50 = row1_col(50);
        put_regular(&store, &col40, 1000, 0, &Value::new(PrimitiveValue::from(1i64)));
        put_regular(&store, &col40, 900, 0, &Value::new(PrimitiveValue::from(2i64)));
        put_regular(&store, &col50, 1000, 0, &Value::new(PrimitiveValue::from("e")));

        let mut iter = IntentAwareIterator::new(
            store.snapshot_iter(),
            None,
            HybridTime::from_micros(2000),
            None,
            far_deadline(),
        );
        iter.seek(&col40).unwrap();
        iter.seek_past_sub_key(&col40).unwrap();
        assert_eq!(iter.fetch_key().unwrap().key, col50);
    }

    #[test]
    fn expired_deadline_fails_seek() {
        let store = MemoryStore::new();
        let mut iter = IntentAwareIterator::new(
            store.snapshot_iter(),
            None,
            HybridTime::MAX,
            None,
            Instant::now() - Duration::from_secs(1),
        );
        assert!(matches!(
            iter.seek(b"!"),
            Err(EngineError::TimedOut(_))
        ));
    }

    #[test]
    fn corrupt_regular_key_is_reported() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(b"garbage-without-marker".to_vec(), b"v".to_vec());
        store.apply(batch).unwrap();

        let mut iter = IntentAwareIterator::new(
            store.snapshot_iter(),
            None,
            HybridTime::MAX,
            None,
            far_deadline(),
        );
        assert!(matches!(
            iter.seek(b""),
            Err(EngineError::Corruption(_))
        ));
    }
}
