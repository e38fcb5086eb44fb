use basalt_store::KvIterator;

use crate::encoding::primitive::PrimitiveValue;
use crate::error::EngineError;
use crate::hybrid_time::DocHybridTime;
use crate::intent_iter::IntentAwareIterator;
use crate::value::Value;

/// Newest version of exactly `key_without_ht` visible at the iterator's
/// read time, or `None` when the path has no visible record of its own.
///
/// Feeds both the root-tombstone check and per-column resolution: the
/// returned time is the overwrite floor a tombstone imposes on everything
/// below its path.
pub fn find_last_write_time<I: KvIterator>(
    iter: &mut IntentAwareIterator<I>,
    key_without_ht: &[u8],
) -> Result<Option<(DocHybridTime, Value)>, EngineError> {
    iter.seek(key_without_ht)?;
    if !iter.valid() {
        return Ok(None);
    }
    let fetched = iter.fetch_key()?;
    if fetched.key != key_without_ht {
        // The nearest record belongs to a descendant or a later path; this
        // exact path was never written.
        return Ok(None);
    }
    let value = Value::decode(iter.value())?;
    Ok(Some((fetched.write_time, value)))
}

/// Resolves one cell at the iterator's read time.
///
/// In order: versions above the read time are invisible (the iterator
/// already dropped them); a value at or below the dominating ancestor
/// tombstone's time is absent; a tombstone is absent; a value whose TTL has
/// elapsed by the read time is absent; anything else is the live value.
pub fn resolve_cell<I: KvIterator>(
    iter: &mut IntentAwareIterator<I>,
    cell_key_without_ht: &[u8],
    overwrite_floor: DocHybridTime,
) -> Result<Option<(PrimitiveValue, DocHybridTime)>, EngineError> {
    let Some((write_time, value)) = find_last_write_time(iter, cell_key_without_ht)? else {
        return Ok(None);
    };
    Ok(live_cell_value(write_time, value, overwrite_floor, iter.read_time()))
}

/// The tombstone/TTL precedence ladder shared by row scans and point
/// lookups.
pub(crate) fn live_cell_value(
    write_time: DocHybridTime,
    value: Value,
    overwrite_floor: DocHybridTime,
    read_time: crate::hybrid_time::HybridTime,
) -> Option<(PrimitiveValue, DocHybridTime)> {
    if write_time <= overwrite_floor {
        return None;
    }
    if value.is_tombstone() {
        return None;
    }
    if value.has_expired(write_time.hybrid_time(), read_time) {
        return None;
    }
    Some((value.into_primitive(), write_time))
}
