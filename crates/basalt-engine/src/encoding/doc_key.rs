use std::fmt;

use crate::encoding::primitive::PrimitiveValue;
use crate::encoding::tags;
use crate::error::EngineError;
use crate::hybrid_time::{DocHybridTime, ENCODED_DOC_HT_LEN};

/// Key of one logical row: an optional 16-bit hash bucket with its hashed
/// components, then range components.
///
/// Encoding layout:
/// - hash section, when present: `UINT16_HASH` tag + 2 bucket bytes +
///   hashed components + `GROUP_END`;
/// - range components + `GROUP_END`.
///
/// Byte order of encodings equals (bucket, hashed, range) order, and a doc
/// key with fewer range components sorts before any extension of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocKey {
    hash: Option<u16>,
    hashed: Vec<PrimitiveValue>,
    range: Vec<PrimitiveValue>,
}

impl DocKey {
    pub fn empty() -> Self {
        DocKey {
            hash: None,
            hashed: Vec::new(),
            range: Vec::new(),
        }
    }

    /// A doc key with only range components.
    pub fn new(range: Vec<PrimitiveValue>) -> Self {
        DocKey {
            hash: None,
            hashed: Vec::new(),
            range,
        }
    }

    pub fn with_hash(hash: u16, hashed: Vec<PrimitiveValue>, range: Vec<PrimitiveValue>) -> Self {
        DocKey {
            hash: Some(hash),
            hashed,
            range,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hash.is_none() && self.range.is_empty()
    }

    pub fn hash(&self) -> Option<u16> {
        self.hash
    }

    pub fn hashed_group(&self) -> &[PrimitiveValue] {
        &self.hashed
    }

    pub fn range_group(&self) -> &[PrimitiveValue] {
        &self.range
    }

    /// All key components in storage order: hashed components, then range.
    pub fn components(&self) -> impl Iterator<Item = &PrimitiveValue> {
        self.hashed.iter().chain(self.range.iter())
    }

    pub fn append_to(&self, out: &mut Vec<u8>) {
        if let Some(hash) = self.hash {
            out.push(tags::UINT16_HASH);
            out.extend_from_slice(&hash.to_be_bytes());
            for item in &self.hashed {
                item.append_to(out);
            }
            out.push(tags::GROUP_END);
        }
        for item in &self.range {
            item.append_to(out);
        }
        out.push(tags::GROUP_END);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.append_to(&mut out);
        out
    }

    /// Decodes a doc key from the front of `input`, consuming it.
    pub fn consume_from(input: &mut &[u8]) -> Result<DocKey, EngineError> {
        let mut key = DocKey::empty();
        if input.first() == Some(&tags::UINT16_HASH) {
            *input = &input[1..];
            if input.len() < 2 {
                return Err(EngineError::Corruption("truncated hash bucket".into()));
            }
            key.hash = Some(u16::from_be_bytes(input[..2].try_into().unwrap()));
            *input = &input[2..];
            key.hashed = consume_group(input)?;
        }
        key.range = consume_group(input)?;
        Ok(key)
    }

    pub fn decode(bytes: &[u8]) -> Result<DocKey, EngineError> {
        let mut input = bytes;
        let key = Self::consume_from(&mut input)?;
        if !input.is_empty() {
            return Err(EngineError::Corruption(format!(
                "{} trailing bytes after doc key",
                input.len()
            )));
        }
        Ok(key)
    }

    /// Length of the encoded doc key at the front of `bytes`.
    pub fn encoded_size(bytes: &[u8]) -> Result<usize, EngineError> {
        let mut input = bytes;
        Self::consume_from(&mut input)?;
        Ok(bytes.len() - input.len())
    }
}

fn consume_group(input: &mut &[u8]) -> Result<Vec<PrimitiveValue>, EngineError> {
    let mut items = Vec::new();
    loop {
        match input.first() {
            None => {
                return Err(EngineError::Corruption(
                    "unterminated doc key component group".into(),
                ));
            }
            Some(&tags::GROUP_END) => {
                *input = &input[1..];
                return Ok(items);
            }
            Some(_) => items.push(PrimitiveValue::consume_from(input)?),
        }
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocKey(")?;
        if let Some(hash) = self.hash {
            write!(f, "0x{hash:04x}, ")?;
        }
        write!(f, "{:?}, {:?})", self.hashed, self.range)
    }
}

/// A doc key extended with a subkey path and, optionally, the version
/// marker. Keys stored in the regular store always carry the marker; seek
/// prefixes omit it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubDocKey {
    pub doc_key: DocKey,
    pub subkeys: Vec<PrimitiveValue>,
    pub doc_ht: Option<DocHybridTime>,
}

impl SubDocKey {
    pub fn new(doc_key: DocKey, subkeys: Vec<PrimitiveValue>) -> Self {
        SubDocKey {
            doc_key,
            subkeys,
            doc_ht: None,
        }
    }

    pub fn with_ht(doc_key: DocKey, subkeys: Vec<PrimitiveValue>, doc_ht: DocHybridTime) -> Self {
        SubDocKey {
            doc_key,
            subkeys,
            doc_ht: Some(doc_ht),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.doc_key.append_to(&mut out);
        for subkey in &self.subkeys {
            subkey.append_to(&mut out);
        }
        if let Some(doc_ht) = self.doc_ht {
            append_doc_ht(doc_ht, &mut out);
        }
        out
    }

    pub fn encode_without_ht(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.doc_key.append_to(&mut out);
        for subkey in &self.subkeys {
            subkey.append_to(&mut out);
        }
        out
    }

    /// Full decode of an encoded subdoc key, with or without the trailing
    /// version marker.
    pub fn decode(bytes: &[u8]) -> Result<SubDocKey, EngineError> {
        let mut input = bytes;
        let doc_key = DocKey::consume_from(&mut input)?;
        let mut subkeys = Vec::new();
        let mut doc_ht = None;
        while !input.is_empty() {
            if input[0] == tags::HYBRID_TIME {
                input = &input[1..];
                doc_ht = Some(DocHybridTime::decode_desc(input)?);
                input = &input[ENCODED_DOC_HT_LEN..];
                if !input.is_empty() {
                    return Err(EngineError::Corruption(
                        "trailing bytes after version marker".into(),
                    ));
                }
                break;
            }
            subkeys.push(PrimitiveValue::consume_from(&mut input)?);
        }
        Ok(SubDocKey {
            doc_key,
            subkeys,
            doc_ht,
        })
    }
}

impl fmt::Display for SubDocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubDocKey({}, [", self.doc_key)?;
        for (i, subkey) in self.subkeys.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{subkey}")?;
        }
        if let Some(doc_ht) = self.doc_ht {
            if !self.subkeys.is_empty() {
                write!(f, "; ")?;
            }
            write!(f, "{doc_ht}")?;
        }
        write!(f, "])")
    }
}

/// Appends the `HYBRID_TIME` tag plus the descending-encoded version
/// marker; the result is a complete storage key.
pub fn append_doc_ht(doc_ht: DocHybridTime, out: &mut Vec<u8>) {
    out.push(tags::HYBRID_TIME);
    doc_ht.encode_desc(out);
}

/// Splits a storage key into its subdoc-key prefix and version marker.
/// Fails with `Corruption` if the key does not end in a marker.
pub fn split_doc_ht(key: &[u8]) -> Result<(&[u8], DocHybridTime), EngineError> {
    if key.len() < ENCODED_DOC_HT_LEN + 1 {
        return Err(EngineError::Corruption(format!(
            "key too short for version marker: {} bytes",
            key.len()
        )));
    }
    let split = key.len() - ENCODED_DOC_HT_LEN - 1;
    if key[split] != tags::HYBRID_TIME {
        return Err(EngineError::Corruption(
            "key does not end in a version marker".into(),
        ));
    }
    let doc_ht = DocHybridTime::decode_desc(&key[split + 1..])?;
    Ok((&key[..split], doc_ht))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hybrid_time::HybridTime;
    use crate::schema::ColumnId;

    fn row_key(name: &str, id: i64) -> DocKey {
        DocKey::new(vec![PrimitiveValue::from(name), PrimitiveValue::from(id)])
    }

    #[test]
    fn doc_key_roundtrip() {
        let key = row_key("row1", 11111);
        let encoded = key.encode();
        assert_eq!(DocKey::decode(&encoded).unwrap(), key);
    }

    #[test]
    fn empty_doc_key_roundtrip() {
        let key = DocKey::empty();
        let encoded = key.encode();
        assert_eq!(encoded, vec![tags::GROUP_END]);
        assert_eq!(DocKey::decode(&encoded).unwrap(), key);
    }

    #[test]
    fn hashed_doc_key_roundtrip() {
        let key = DocKey::with_hash(
            0x1234,
            vec![PrimitiveValue::from("a"), PrimitiveValue::from("b")],
            vec![PrimitiveValue::from("c")],
        );
        let encoded = key.encode();
        assert_eq!(DocKey::decode(&encoded).unwrap(), key);
    }

    #[test]
    fn doc_key_order_matches_logical_order() {
        let keys = [
            DocKey::empty(),
            DocKey::new(vec![PrimitiveValue::from("row1")]),
            DocKey::new(vec![PrimitiveValue::from("row1"), PrimitiveValue::from(11111)]),
            DocKey::new(vec![PrimitiveValue::from("row1"), PrimitiveValue::from(22222)]),
            DocKey::new(vec![PrimitiveValue::from("row2"), PrimitiveValue::from(11111)]),
        ];
        for pair in keys.windows(2) {
            assert!(
                pair[0].encode() < pair[1].encode(),
                "{} should sort before {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn hash_buckets_order_before_components() {
        let a = DocKey::with_hash(0x0001, vec![PrimitiveValue::from("z")], vec![]);
        let b = DocKey::with_hash(0x0002, vec![PrimitiveValue::from("a")], vec![]);
        assert!(a.encode() < b.encode());
    }

    #[test]
    fn sub_doc_key_roundtrip() {
        let key = SubDocKey::with_ht(
            row_key("row1", 11111),
            vec![PrimitiveValue::ColumnId(ColumnId(30))],
            DocHybridTime::new(HybridTime::from_micros(1000), 2),
        );
        let encoded = key.encode();
        assert_eq!(SubDocKey::decode(&encoded).unwrap(), key);
    }

    #[test]
    fn sub_doc_key_without_ht_roundtrip() {
        let key = SubDocKey::new(row_key("row1", 11111), vec![]);
        let encoded = key.encode_without_ht();
        assert_eq!(SubDocKey::decode(&encoded).unwrap(), key);
    }

    #[test]
    fn versions_sort_newest_first() {
        let doc_key = row_key("row1", 11111);
        let newer = SubDocKey::with_ht(
            doc_key.clone(),
            vec![PrimitiveValue::ColumnId(ColumnId(40))],
            DocHybridTime::from(HybridTime::from_micros(3000)),
        );
        let older = SubDocKey::with_ht(
            doc_key,
            vec![PrimitiveValue::ColumnId(ColumnId(40))],
            DocHybridTime::from(HybridTime::from_micros(2500)),
        );
        assert!(newer.encode() < older.encode());
    }

    #[test]
    fn row_marker_sorts_before_columns() {
        let doc_key = row_key("row1", 11111);
        let row_marker = SubDocKey::with_ht(
            doc_key.clone(),
            vec![],
            DocHybridTime::from(HybridTime::from_micros(2500)),
        );
        let column = SubDocKey::with_ht(
            doc_key,
            vec![PrimitiveValue::ColumnId(ColumnId(30))],
            DocHybridTime::from(HybridTime::from_micros(1000)),
        );
        assert!(row_marker.encode() < column.encode());
    }

    #[test]
    fn same_time_orders_by_write_id_desc() {
        let doc_key = row_key("row1", 11111);
        let ht = HybridTime::from_micros(1000);
        let w1 = SubDocKey::with_ht(
            doc_key.clone(),
            vec![PrimitiveValue::ColumnId(ColumnId(40))],
            DocHybridTime::new(ht, 1),
        );
        let w0 = SubDocKey::with_ht(
            doc_key,
            vec![PrimitiveValue::ColumnId(ColumnId(40))],
            DocHybridTime::new(ht, 0),
        );
        assert!(w1.encode() < w0.encode());
    }

    #[test]
    fn split_doc_ht_roundtrip() {
        let doc_ht = DocHybridTime::new(HybridTime::from_micros(2500), 1);
        let key = SubDocKey::with_ht(
            row_key("row2", 22222),
            vec![PrimitiveValue::ColumnId(ColumnId(40))],
            doc_ht,
        );
        let encoded = key.encode();
        let (prefix, decoded_ht) = split_doc_ht(&encoded).unwrap();
        assert_eq!(decoded_ht, doc_ht);
        assert_eq!(
            prefix,
            SubDocKey::new(
                row_key("row2", 22222),
                vec![PrimitiveValue::ColumnId(ColumnId(40))]
            )
            .encode_without_ht()
            .as_slice()
        );
    }

    #[test]
    fn encoded_size_finds_doc_key_boundary() {
        let doc_key = row_key("row1", 11111);
        let full = SubDocKey::with_ht(
            doc_key.clone(),
            vec![PrimitiveValue::ColumnId(ColumnId(30))],
            DocHybridTime::from(HybridTime::from_micros(1000)),
        )
        .encode();
        let size = DocKey::encoded_size(&full).unwrap();
        assert_eq!(&full[..size], doc_key.encode().as_slice());
    }

    #[test]
    fn decode_truncated_fails() {
        let encoded = row_key("row1", 11111).encode();
        assert!(matches!(
            DocKey::decode(&encoded[..encoded.len() - 1]),
            Err(EngineError::Corruption(_))
        ));
        assert!(DocKey::decode(&[]).is_err());
    }

    #[test]
    fn display_matches_dump_grammar() {
        let key = SubDocKey::with_ht(
            row_key("row1", 11111),
            vec![PrimitiveValue::ColumnId(ColumnId(30))],
            DocHybridTime::from(HybridTime::from_micros(1000)),
        );
        assert_eq!(
            key.to_string(),
            "SubDocKey(DocKey([], [\"row1\", 11111]), [ColumnId(30); HT{ physical: 1000 }])"
        );
        let root = SubDocKey::with_ht(
            row_key("row1", 11111),
            vec![],
            DocHybridTime::from(HybridTime::from_micros(2500)),
        );
        assert_eq!(
            root.to_string(),
            "SubDocKey(DocKey([], [\"row1\", 11111]), [HT{ physical: 2500 }])"
        );
    }
}
