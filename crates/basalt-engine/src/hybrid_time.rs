use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::EngineError;

const LOGICAL_BITS: u32 = 12;
const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

/// MVCC version stamp: physical microseconds plus a 12-bit logical counter
/// packed into one `u64`, totally ordered.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HybridTime(u64);

impl HybridTime {
    pub const MIN: HybridTime = HybridTime(0);
    pub const MAX: HybridTime = HybridTime(u64::MAX - 1);
    pub const INVALID: HybridTime = HybridTime(u64::MAX);

    pub fn from_micros(micros: u64) -> Self {
        HybridTime(micros << LOGICAL_BITS)
    }

    pub fn new(micros: u64, logical: u16) -> Self {
        HybridTime((micros << LOGICAL_BITS) | (u64::from(logical) & LOGICAL_MASK))
    }

    pub fn physical_micros(&self) -> u64 {
        self.0 >> LOGICAL_BITS
    }

    pub fn logical(&self) -> u16 {
        (self.0 & LOGICAL_MASK) as u16
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// The time at which a value written at `self` with the given TTL
    /// stops being visible.
    pub fn expiry_after(&self, ttl: std::time::Duration) -> HybridTime {
        HybridTime::from_micros(self.physical_micros().saturating_add(ttl.as_micros() as u64))
    }

    pub(crate) fn to_raw(self) -> u64 {
        self.0
    }

    pub(crate) fn from_raw(raw: u64) -> Self {
        HybridTime(raw)
    }
}

impl fmt::Display for HybridTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "HT{{ <invalid> }}");
        }
        write!(f, "HT{{ physical: {}", self.physical_micros())?;
        if self.logical() != 0 {
            write!(f, " logical: {}", self.logical())?;
        }
        write!(f, " }}")
    }
}

impl fmt::Debug for HybridTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A [`HybridTime`] extended with the write index inside its batch, so that
/// several writes committed at one hybrid time stay uniquely ordered.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocHybridTime {
    ht: HybridTime,
    write_id: u32,
}

/// Encoded byte length of a [`DocHybridTime`] key suffix.
pub(crate) const ENCODED_DOC_HT_LEN: usize = 12;

impl DocHybridTime {
    pub const MIN: DocHybridTime = DocHybridTime {
        ht: HybridTime::MIN,
        write_id: 0,
    };
    pub const MAX: DocHybridTime = DocHybridTime {
        ht: HybridTime::MAX,
        write_id: u32::MAX,
    };

    pub fn new(ht: HybridTime, write_id: u32) -> Self {
        DocHybridTime { ht, write_id }
    }

    pub fn hybrid_time(&self) -> HybridTime {
        self.ht
    }

    pub fn write_id(&self) -> u32 {
        self.write_id
    }

    /// Key-suffix encoding. Bytes are complemented so that byte order is
    /// descending in (hybrid time, write id): newer versions sort first.
    pub fn encode_desc(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(!self.ht.to_raw()).to_be_bytes());
        out.extend_from_slice(&(!self.write_id).to_be_bytes());
    }

    pub fn decode_desc(bytes: &[u8]) -> Result<DocHybridTime, EngineError> {
        if bytes.len() < ENCODED_DOC_HT_LEN {
            return Err(EngineError::Corruption(format!(
                "truncated hybrid time suffix: {} bytes",
                bytes.len()
            )));
        }
        let raw = !u64::from_be_bytes(bytes[0..8].try_into().unwrap());
        let write_id = !u32::from_be_bytes(bytes[8..12].try_into().unwrap());
        Ok(DocHybridTime {
            ht: HybridTime::from_raw(raw),
            write_id,
        })
    }

    /// Plain big-endian encoding, ascending. Used by the reverse intent
    /// index where cleanup scans run oldest-first.
    pub fn encode_asc(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.ht.to_raw().to_be_bytes());
        out.extend_from_slice(&self.write_id.to_be_bytes());
    }

    pub fn decode_asc(bytes: &[u8]) -> Result<DocHybridTime, EngineError> {
        if bytes.len() < ENCODED_DOC_HT_LEN {
            return Err(EngineError::Corruption(format!(
                "truncated hybrid time suffix: {} bytes",
                bytes.len()
            )));
        }
        let raw = u64::from_be_bytes(bytes[0..8].try_into().unwrap());
        let write_id = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
        Ok(DocHybridTime {
            ht: HybridTime::from_raw(raw),
            write_id,
        })
    }
}

impl From<HybridTime> for DocHybridTime {
    fn from(ht: HybridTime) -> Self {
        DocHybridTime { ht, write_id: 0 }
    }
}

impl fmt::Display for DocHybridTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.ht.is_valid() {
            return write!(f, "HT{{ <invalid> }}");
        }
        write!(f, "HT{{ physical: {}", self.ht.physical_micros())?;
        if self.ht.logical() != 0 {
            write!(f, " logical: {}", self.ht.logical())?;
        }
        if self.write_id != 0 {
            write!(f, " w: {}", self.write_id)?;
        }
        write!(f, " }}")
    }
}

impl fmt::Debug for DocHybridTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Monotonic clock combining wall time with a logical counter. Each call to
/// `now` returns a stamp strictly greater than every previous one, even
/// under concurrent access.
pub struct HybridClock {
    last: AtomicU64,
}

impl HybridClock {
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    fn physical_now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }

    pub fn now(&self) -> HybridTime {
        loop {
            let physical = HybridTime::from_micros(Self::physical_now()).to_raw();
            let last = self.last.load(Ordering::Acquire);
            let next = physical.max(last.saturating_add(1));
            match self
                .last
                .compare_exchange(last, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return HybridTime::from_raw(next),
                Err(_) => continue,
            }
        }
    }
}

impl Default for HybridClock {
    fn default() -> Self {
        Self::new()
    }
}
