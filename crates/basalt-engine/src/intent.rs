use std::fmt;

use basalt_store::{KeyValueStore, KvIterator, WriteBatch};

use crate::doc_db::DocDb;
use crate::encoding::doc_key::{DocKey, append_doc_ht};
use crate::encoding::primitive::PrimitiveValue;
use crate::encoding::tags;
use crate::error::EngineError;
use crate::hybrid_time::{DocHybridTime, ENCODED_DOC_HT_LEN};
use crate::txn::TransactionId;

/// Lock strength of a provisional record.
///
/// A write takes a strong intent on the exact path and weak intents on
/// every strict ancestor, so whole-document operations conflict with leaf
/// writes and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentStrength {
    Weak,
    Strong,
}

impl IntentStrength {
    fn as_byte(self) -> u8 {
        match self {
            IntentStrength::Weak => 1,
            IntentStrength::Strong => 2,
        }
    }

    fn from_byte(b: u8) -> Result<Self, EngineError> {
        match b {
            1 => Ok(IntentStrength::Weak),
            2 => Ok(IntentStrength::Strong),
            other => Err(EngineError::Corruption(format!(
                "unknown intent strength byte: {other}"
            ))),
        }
    }
}

impl fmt::Display for IntentStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntentStrength::Weak => write!(f, "[kWeakRead, kWeakWrite]"),
            IntentStrength::Strong => write!(f, "[kStrongRead, kStrongWrite]"),
        }
    }
}

/// Number of bytes an intent key adds after the subdoc-key prefix:
/// intent tag, strength byte, hybrid time tag, encoded version marker.
pub(crate) const INTENT_KEY_SUFFIX_LEN: usize = 3 + ENCODED_DOC_HT_LEN;

/// Forward intent key: `prefix` is the encoded subdoc key without a
/// version marker.
pub fn encode_intent_key(
    prefix: &[u8],
    strength: IntentStrength,
    doc_ht: DocHybridTime,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + INTENT_KEY_SUFFIX_LEN);
    out.extend_from_slice(prefix);
    out.push(tags::INTENT_TYPE);
    out.push(strength.as_byte());
    append_doc_ht(doc_ht, &mut out);
    out
}

pub struct DecodedIntentKey<'a> {
    pub prefix: &'a [u8],
    pub strength: IntentStrength,
    pub doc_ht: DocHybridTime,
}

pub fn decode_intent_key(key: &[u8]) -> Result<DecodedIntentKey<'_>, EngineError> {
    if key.len() < INTENT_KEY_SUFFIX_LEN {
        return Err(EngineError::Corruption(format!(
            "intent key too short: {} bytes",
            key.len()
        )));
    }
    let split = key.len() - INTENT_KEY_SUFFIX_LEN;
    let (prefix, suffix) = key.split_at(split);
    if suffix[0] != tags::INTENT_TYPE {
        return Err(EngineError::Corruption(
            "intent key missing intent type tag".into(),
        ));
    }
    let strength = IntentStrength::from_byte(suffix[1])?;
    if suffix[2] != tags::HYBRID_TIME {
        return Err(EngineError::Corruption(
            "intent key missing version marker".into(),
        ));
    }
    let doc_ht = DocHybridTime::decode_desc(&suffix[3..])?;
    Ok(DecodedIntentKey {
        prefix,
        strength,
        doc_ht,
    })
}

/// True when `key` is an intent record for exactly the path `prefix`.
pub(crate) fn is_intent_for_same_key(key: &[u8], prefix: &[u8]) -> bool {
    key.starts_with(prefix) && key.get(prefix.len()) == Some(&tags::INTENT_TYPE)
}

/// Decoded forward intent value. Weak intents carry only the owner id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentValue {
    pub txn_id: TransactionId,
    pub write_id: Option<u32>,
    pub body: Vec<u8>,
}

pub fn encode_intent_value(txn_id: TransactionId, write_id: Option<u32>, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(17 + 5 + body.len());
    out.push(tags::TRANSACTION_ID);
    out.extend_from_slice(txn_id.as_bytes());
    if let Some(write_id) = write_id {
        out.push(tags::WRITE_ID);
        out.extend_from_slice(&write_id.to_be_bytes());
        out.extend_from_slice(body);
    }
    out
}

pub fn decode_intent_value(bytes: &[u8]) -> Result<IntentValue, EngineError> {
    if bytes.len() < 17 || bytes[0] != tags::TRANSACTION_ID {
        return Err(EngineError::Corruption(
            "intent value missing transaction id".into(),
        ));
    }
    let txn_id = TransactionId::from_bytes(bytes[1..17].try_into().unwrap());
    let rest = &bytes[17..];
    if rest.is_empty() {
        return Ok(IntentValue {
            txn_id,
            write_id: None,
            body: Vec::new(),
        });
    }
    if rest[0] != tags::WRITE_ID || rest.len() < 5 {
        return Err(EngineError::Corruption(
            "intent value missing write id".into(),
        ));
    }
    let write_id = u32::from_be_bytes(rest[1..5].try_into().unwrap());
    Ok(IntentValue {
        txn_id,
        write_id: Some(write_id),
        body: rest[5..].to_vec(),
    })
}

/// Reverse-index key: owner id plus the forward record's version marker,
/// ascending so a transaction's intents scan oldest-first. The value is the
/// forward key, which lets cleanup touch exactly k records for k intents.
pub fn encode_reverse_key(txn_id: TransactionId, doc_ht: DocHybridTime) -> Vec<u8> {
    let mut out = Vec::with_capacity(18 + ENCODED_DOC_HT_LEN);
    out.push(tags::TRANSACTION_ID);
    out.extend_from_slice(txn_id.as_bytes());
    out.push(tags::HYBRID_TIME);
    doc_ht.encode_asc(&mut out);
    out
}

pub fn decode_reverse_key(key: &[u8]) -> Result<(TransactionId, DocHybridTime), EngineError> {
    if key.len() != 18 + ENCODED_DOC_HT_LEN
        || key[0] != tags::TRANSACTION_ID
        || key[17] != tags::HYBRID_TIME
    {
        return Err(EngineError::Corruption("malformed reverse intent key".into()));
    }
    let txn_id = TransactionId::from_bytes(key[1..17].try_into().unwrap());
    let doc_ht = DocHybridTime::decode_asc(&key[18..])?;
    Ok((txn_id, doc_ht))
}

/// Whether this intents-store key belongs to the reverse-index region.
pub(crate) fn is_reverse_key(key: &[u8]) -> bool {
    key.first() == Some(&tags::TRANSACTION_ID)
}

/// Encoded strict-ancestor paths of (`doc_key`, `subkeys`), outermost
/// first: the empty doc key, the hashed group (as one unit), each range
/// prefix, then each proper subkey prefix. The exact path itself is not
/// included; it takes the strong lock.
pub fn ancestor_prefixes(doc_key: &DocKey, subkeys: &[PrimitiveValue]) -> Vec<Vec<u8>> {
    let mut chain = vec![DocKey::empty().encode()];
    if let Some(hash) = doc_key.hash() {
        chain.push(DocKey::with_hash(hash, doc_key.hashed_group().to_vec(), vec![]).encode());
    }
    for end in 1..=doc_key.range_group().len() {
        let range = doc_key.range_group()[..end].to_vec();
        let prefix = match doc_key.hash() {
            Some(hash) => DocKey::with_hash(hash, doc_key.hashed_group().to_vec(), range),
            None => DocKey::new(range),
        };
        chain.push(prefix.encode());
    }
    let mut path = chain.last().cloned().expect("at least the empty doc key");
    for subkey in subkeys {
        subkey.append_to(&mut path);
        chain.push(path.clone());
    }
    chain.pop();
    chain
}

/// All live intents of `txn`, as (forward key, version marker) pairs, in
/// write order. Costs one seek plus k steps for k intents.
pub fn transaction_intents<I: KvIterator>(
    mut intents_iter: I,
    txn: TransactionId,
) -> Result<Vec<(Vec<u8>, DocHybridTime)>, EngineError> {
    let mut region = Vec::with_capacity(17);
    region.push(tags::TRANSACTION_ID);
    region.extend_from_slice(txn.as_bytes());

    let mut result = Vec::new();
    intents_iter.seek(&region);
    while intents_iter.valid() && intents_iter.key().starts_with(&region) {
        let (_, doc_ht) = decode_reverse_key(intents_iter.key())?;
        result.push((intents_iter.value().to_vec(), doc_ht));
        intents_iter.next();
    }
    Ok(result)
}

/// Applies a committed transaction's strong intents to the regular store at
/// `commit_ht`, then removes every forward and reverse record. Weak intents
/// are dropped without producing data.
pub fn apply_transaction_intents<S: KeyValueStore>(
    doc_db: &DocDb<S>,
    txn: TransactionId,
    commit_ht: crate::hybrid_time::HybridTime,
) -> Result<(), EngineError> {
    let entries = transaction_intents(doc_db.intents.snapshot_iter(), txn)?;
    let mut regular_batch = WriteBatch::new();
    let mut intents_batch = WriteBatch::new();

    let mut lookup = doc_db.intents.snapshot_iter();
    for (forward_key, doc_ht) in entries {
        lookup.seek(&forward_key);
        if lookup.valid() && lookup.key() == forward_key.as_slice() {
            let decoded_key = decode_intent_key(&forward_key)?;
            let value = decode_intent_value(lookup.value())?;
            if decoded_key.strength == IntentStrength::Strong {
                let write_id = value.write_id.ok_or_else(|| {
                    EngineError::Corruption("strong intent without write id".into())
                })?;
                let mut key = decoded_key.prefix.to_vec();
                append_doc_ht(DocHybridTime::new(commit_ht, write_id), &mut key);
                regular_batch.put(key, value.body);
            }
            intents_batch.delete(forward_key.clone());
        }
        intents_batch.delete(encode_reverse_key(txn, doc_ht));
    }

    if !regular_batch.is_empty() {
        doc_db.regular.apply(regular_batch)?;
    }
    doc_db.intents.apply(intents_batch)?;
    Ok(())
}

/// Drops all of an aborted transaction's intents.
pub fn abort_transaction_intents<S: KeyValueStore>(
    doc_db: &DocDb<S>,
    txn: TransactionId,
) -> Result<(), EngineError> {
    let entries = transaction_intents(doc_db.intents.snapshot_iter(), txn)?;
    let mut batch = WriteBatch::new();
    for (forward_key, doc_ht) in entries {
        batch.delete(forward_key);
        batch.delete(encode_reverse_key(txn, doc_ht));
    }
    doc_db.intents.apply(batch)?;
    Ok(())
}

/// Renders a forward intent key the way debug dumps and reverse-index
/// values print it.
pub(crate) fn format_intent_key(key: &[u8]) -> Result<String, EngineError> {
    let decoded = decode_intent_key(key)?;
    let sub_doc_key = crate::encoding::doc_key::SubDocKey::decode(decoded.prefix)?;
    Ok(format!(
        "{} {} {}",
        sub_doc_key, decoded.strength, decoded.doc_ht
    ))
}
