use std::fmt;
use std::time::Duration;

use crate::encoding::primitive::PrimitiveValue;
use crate::encoding::tags;
use crate::error::EngineError;
use crate::hybrid_time::HybridTime;

/// A stored datum: tagged primitive plus optional relative expiry.
///
/// Wire layout: optional TTL header (`TTL` tag + big-endian u64
/// milliseconds) followed by the primitive body. A tombstone is the
/// `Tombstone` primitive variant, versioned like any other write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    primitive: PrimitiveValue,
    ttl: Option<Duration>,
}

impl Value {
    pub fn new(primitive: PrimitiveValue) -> Self {
        Value {
            primitive,
            ttl: None,
        }
    }

    pub fn with_ttl(primitive: PrimitiveValue, ttl: Duration) -> Self {
        Value {
            primitive,
            ttl: Some(ttl),
        }
    }

    pub fn tombstone() -> Self {
        Value::new(PrimitiveValue::Tombstone)
    }

    pub fn primitive(&self) -> &PrimitiveValue {
        &self.primitive
    }

    pub fn into_primitive(self) -> PrimitiveValue {
        self.primitive
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn is_tombstone(&self) -> bool {
        self.primitive.is_tombstone()
    }

    /// Whether a value written at `write_time` is expired at `read_time`:
    /// absent once `write_time + ttl <= read_time`.
    pub fn has_expired(&self, write_time: HybridTime, read_time: HybridTime) -> bool {
        match self.ttl {
            None => false,
            Some(ttl) => read_time >= write_time.expiry_after(ttl),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(ttl) = self.ttl {
            out.push(tags::TTL);
            out.extend_from_slice(&(ttl.as_millis() as u64).to_be_bytes());
        }
        self.primitive.append_to(&mut out);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Value, EngineError> {
        let mut input = bytes;
        let mut ttl = None;
        if input.first() == Some(&tags::TTL) {
            input = &input[1..];
            if input.len() < 8 {
                return Err(EngineError::Corruption("truncated TTL header".into()));
            }
            let millis = u64::from_be_bytes(input[..8].try_into().unwrap());
            ttl = Some(Duration::from_millis(millis));
            input = &input[8..];
        }
        let primitive = PrimitiveValue::consume_from(&mut input)?;
        if !input.is_empty() {
            return Err(EngineError::Corruption(format!(
                "{} trailing bytes after value",
                input.len()
            )));
        }
        Ok(Value { primitive, ttl })
    }
}

impl From<PrimitiveValue> for Value {
    fn from(primitive: PrimitiveValue) -> Self {
        Value::new(primitive)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primitive)?;
        if let Some(ttl) = self.ttl {
            write!(f, "; ttl: {}s", ttl.as_millis() as f64 / 1000.0)?;
        }
        Ok(())
    }
}
