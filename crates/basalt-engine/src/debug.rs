use std::fmt::Write as _;

use basalt_store::{KeyValueStore, KvIterator};

use crate::doc_db::DocDb;
use crate::encoding::doc_key::SubDocKey;
use crate::error::EngineError;
use crate::intent::{
    decode_intent_value, decode_reverse_key, format_intent_key, is_reverse_key,
};
use crate::value::Value;

/// Renders every physical entry of both stores, one line each: committed
/// records first, then forward intents, then the reverse index. The output
/// is bit-reproducible and doubles as the test oracle.
///
/// Grammar per line:
/// - regular:  `SubDocKey(...) -> value[; ttl: Ds]`
/// - intent:   `SubDocKey(...) [kStrongRead, kStrongWrite] HT{...} ->
///   TransactionId(...) WriteId(n) value` (weak intents end in `none`)
/// - reverse:  `TXN REV <txn-id> HT{...} -> <forward key>`
pub fn dump_doc_db<S: KeyValueStore>(doc_db: &DocDb<S>) -> Result<String, EngineError> {
    let mut out = String::new();

    let mut regular = doc_db.regular.snapshot_iter();
    regular.seek(b"");
    while regular.valid() {
        let sub_doc_key = SubDocKey::decode(regular.key())?;
        let value = Value::decode(regular.value())?;
        writeln!(out, "{sub_doc_key} -> {value}").expect("write to string");
        regular.next();
    }

    let mut intents = doc_db.intents.snapshot_iter();
    intents.seek(b"");
    while intents.valid() {
        if is_reverse_key(intents.key()) {
            let (txn_id, doc_ht) = decode_reverse_key(intents.key())?;
            let forward = format_intent_key(intents.value())?;
            writeln!(out, "TXN REV {txn_id} {doc_ht} -> {forward}").expect("write to string");
        } else {
            let value = decode_intent_value(intents.value())?;
            let rendered = format_intent_key(intents.key())?;
            match value.write_id {
                Some(write_id) => {
                    let body = Value::decode(&value.body)?;
                    writeln!(
                        out,
                        "{rendered} -> TransactionId({}) WriteId({write_id}) {body}",
                        value.txn_id
                    )
                    .expect("write to string");
                }
                None => {
                    writeln!(out, "{rendered} -> TransactionId({}) none", value.txn_id)
                        .expect("write to string");
                }
            }
        }
        intents.next();
    }

    Ok(out)
}
