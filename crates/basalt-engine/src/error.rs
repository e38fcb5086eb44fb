use std::fmt;

use basalt_store::StoreError;

/// Errors surfaced by the document engine.
///
/// A missing document is not an error: lookups return `None` and iterators
/// simply exhaust. Every variant here means the current call failed and the
/// caller owns any retry policy.
#[derive(Debug)]
pub enum EngineError {
    /// Malformed key or value bytes. Fatal to the current call.
    Corruption(String),
    /// Caller supplied an unknown column, malformed path, or the like.
    InvalidArgument(String),
    /// API misuse: call-order violation on a stateful object.
    IllegalState(String),
    /// Deadline exceeded while waiting on an external collaborator.
    TimedOut(String),
    /// Underlying key-value store failure.
    Store(StoreError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::IllegalState(msg) => write!(f, "illegal state: {msg}"),
            Self::TimedOut(msg) => write!(f, "timed out: {msg}"),
            Self::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
