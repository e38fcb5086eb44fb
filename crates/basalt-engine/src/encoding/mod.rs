pub mod doc_key;
pub mod primitive;

use crate::error::EngineError;

/// Single-byte type tags. Byte order between tags defines cross-type key
/// order, so the relative values here are load-bearing:
/// - `GROUP_END` terminates a component group and must sort below every
///   component tag, so shorter doc keys sort before their extensions.
/// - `INTENT_TYPE` sorts below `HYBRID_TIME`, keeping a path's provisional
///   records directly after the path itself in the intents store, in the
///   same position its committed versions occupy in the regular store.
/// - `HYBRID_TIME` sorts below every subkey tag, so a path's own versions
///   come before any child path.
/// - `TRANSACTION_ID` sorts above every key-component tag, placing the
///   reverse intent index after all forward intent records.
pub(crate) mod tags {
    pub const GROUP_END: u8 = b'!';
    pub const INTENT_TYPE: u8 = b'"';
    pub const HYBRID_TIME: u8 = b'#';
    pub const NULL: u8 = b'$';
    pub const BINARY: u8 = b'B';
    pub const DOUBLE: u8 = b'D';
    pub const UINT16_HASH: u8 = b'G';
    pub const INT64: u8 = b'I';
    pub const COLUMN_ID: u8 = b'K';
    pub const STRING: u8 = b'S';
    pub const TTL: u8 = b'T';
    pub const TOMBSTONE: u8 = b'X';
    pub const WRITE_ID: u8 = b'w';
    pub const TRANSACTION_ID: u8 = b'~';
    pub const MAX_BYTE: u8 = 0xFF;
}

/// Appends `bytes` with embedded zeros escaped (`\x00` -> `\x00\x01`),
/// then the `\x00\x00` terminator. Keeps byte order equal to logical order
/// for variable-length components.
pub(crate) fn append_escaped(bytes: &[u8], out: &mut Vec<u8>) {
    for &b in bytes {
        out.push(b);
        if b == 0 {
            out.push(1);
        }
    }
    out.push(0);
    out.push(0);
}

/// Inverse of [`append_escaped`]: consumes up to and including the
/// terminator, returning the unescaped bytes.
pub(crate) fn consume_escaped(input: &mut &[u8]) -> Result<Vec<u8>, EngineError> {
    let mut result = Vec::new();
    let mut i = 0;
    loop {
        let Some(&b) = input.get(i) else {
            return Err(EngineError::Corruption(
                "unterminated escaped component".into(),
            ));
        };
        if b != 0 {
            result.push(b);
            i += 1;
            continue;
        }
        match input.get(i + 1) {
            Some(0) => {
                *input = &input[i + 2..];
                return Ok(result);
            }
            Some(1) => {
                result.push(0);
                i += 2;
            }
            _ => {
                return Err(EngineError::Corruption(
                    "bad escape sequence in component".into(),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escaped_roundtrip() {
        for input in [
            b"".as_slice(),
            b"plain",
            b"\x00",
            b"a\x00b",
            b"\x00\x00tail",
        ] {
            let mut buf = Vec::new();
            append_escaped(input, &mut buf);
            let mut slice = buf.as_slice();
            assert_eq!(consume_escaped(&mut slice).unwrap(), input);
            assert!(slice.is_empty());
        }
    }

    #[test]
    fn escaped_preserves_order() {
        // Prefix sorts before its extension; embedded zero sorts after
        // the terminator of the shorter string.
        let mut ab = Vec::new();
        let mut abc = Vec::new();
        let mut a0 = Vec::new();
        let mut a = Vec::new();
        append_escaped(b"ab", &mut ab);
        append_escaped(b"abc", &mut abc);
        append_escaped(b"a\x00", &mut a0);
        append_escaped(b"a", &mut a);
        assert!(ab < abc);
        assert!(a < a0);
    }

    #[test]
    fn truncated_escape_fails() {
        let mut input: &[u8] = b"abc";
        assert!(consume_escaped(&mut input).is_err());
        let mut input: &[u8] = b"ab\x00";
        assert!(consume_escaped(&mut input).is_err());
    }
}
