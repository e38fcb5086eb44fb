use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use uuid::Uuid;

use crate::error::EngineError;
use crate::hybrid_time::HybridTime;

/// Identifier of a distributed transaction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new_random() -> Self {
        TransactionId(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        TransactionId(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.0.hyphenated())
    }
}

/// Commit state reported by the external transaction-status collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    NotCommitted,
    Committed(HybridTime),
    Aborted,
}

/// External transaction-status service. Lookups may block; callers bound
/// them with a deadline and convert overruns into `TimedOut`.
pub trait TransactionStatusProvider: Send + Sync {
    fn status(&self, id: TransactionId) -> Result<TransactionStatus, EngineError>;
}

/// The reading transaction's identity plus its status collaborator.
#[derive(Clone)]
pub struct TransactionContext {
    pub txn_id: TransactionId,
    pub provider: Arc<dyn TransactionStatusProvider>,
}

impl TransactionContext {
    pub fn new(txn_id: TransactionId, provider: Arc<dyn TransactionStatusProvider>) -> Self {
        Self { txn_id, provider }
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("txn_id", &self.txn_id)
            .finish_non_exhaustive()
    }
}

/// Per-iterator memo of resolved commit times.
///
/// Stores the commit time usable at this iterator's read time, or
/// `HybridTime::MIN` for transactions that are not visible (uncommitted,
/// aborted, or committed past the read time). Provider failures are never
/// cached and never downgraded to "not committed".
pub(crate) struct StatusCache {
    read_time: HybridTime,
    deadline: Instant,
    cache: HashMap<TransactionId, HybridTime>,
}

impl StatusCache {
    pub(crate) fn new(read_time: HybridTime, deadline: Instant) -> Self {
        Self {
            read_time,
            deadline,
            cache: HashMap::new(),
        }
    }

    /// Commit time of `id` visible at the read time, `HybridTime::MIN` when
    /// the transaction's writes must stay invisible.
    pub(crate) fn commit_time(
        &mut self,
        provider: &dyn TransactionStatusProvider,
        id: TransactionId,
    ) -> Result<HybridTime, EngineError> {
        if let Some(&cached) = self.cache.get(&id) {
            return Ok(cached);
        }
        if Instant::now() >= self.deadline {
            return Err(EngineError::TimedOut(format!(
                "deadline exceeded awaiting status of {id}"
            )));
        }
        let resolved = match provider.status(id)? {
            TransactionStatus::Committed(commit_ht) if commit_ht <= self.read_time => commit_ht,
            TransactionStatus::Committed(_)
            | TransactionStatus::NotCommitted
            | TransactionStatus::Aborted => HybridTime::MIN,
        };
        self.cache.insert(id, resolved);
        Ok(resolved)
    }
}

/// In-process status provider for tests and single-node embedding.
#[derive(Default)]
pub struct MockStatusProvider {
    state: Mutex<HashMap<TransactionId, TransactionStatus>>,
}

impl MockStatusProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit(&self, id: TransactionId, commit_ht: HybridTime) {
        self.state
            .lock()
            .unwrap()
            .insert(id, TransactionStatus::Committed(commit_ht));
    }

    pub fn abort(&self, id: TransactionId) {
        self.state
            .lock()
            .unwrap()
            .insert(id, TransactionStatus::Aborted);
    }
}

impl TransactionStatusProvider for MockStatusProvider {
    fn status(&self, id: TransactionId) -> Result<TransactionStatus, EngineError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .get(&id)
            .copied()
            .unwrap_or(TransactionStatus::NotCommitted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn transaction_id_display_is_hyphenated() {
        let id = TransactionId::from_bytes(*b"0000000000000001");
        assert_eq!(id.to_string(), "30303030-3030-3030-3030-303030303031");
    }

    #[test]
    fn commit_time_visible_only_at_or_before_read_time() {
        let provider = MockStatusProvider::new();
        let id = TransactionId::new_random();
        provider.commit(id, HybridTime::from_micros(3500));

        let mut early = StatusCache::new(HybridTime::from_micros(2000), far_deadline());
        assert_eq!(early.commit_time(&provider, id).unwrap(), HybridTime::MIN);

        let mut late = StatusCache::new(HybridTime::from_micros(5000), far_deadline());
        assert_eq!(
            late.commit_time(&provider, id).unwrap(),
            HybridTime::from_micros(3500)
        );
    }

    #[test]
    fn uncommitted_and_aborted_are_invisible() {
        let provider = MockStatusProvider::new();
        let pending = TransactionId::new_random();
        let aborted = TransactionId::new_random();
        provider.abort(aborted);

        let mut cache = StatusCache::new(HybridTime::from_micros(5000), far_deadline());
        assert_eq!(cache.commit_time(&provider, pending).unwrap(), HybridTime::MIN);
        assert_eq!(cache.commit_time(&provider, aborted).unwrap(), HybridTime::MIN);
    }

    #[test]
    fn provider_failure_propagates() {
        struct Failing;
        impl TransactionStatusProvider for Failing {
            fn status(&self, _: TransactionId) -> Result<TransactionStatus, EngineError> {
                Err(EngineError::TimedOut("status service unreachable".into()))
            }
        }

        let mut cache = StatusCache::new(HybridTime::MAX, far_deadline());
        let err = cache
            .commit_time(&Failing, TransactionId::new_random())
            .unwrap_err();
        assert!(matches!(err, EngineError::TimedOut(_)));
    }

    #[test]
    fn expired_deadline_is_timed_out() {
        let provider = MockStatusProvider::new();
        let mut cache = StatusCache::new(HybridTime::MAX, Instant::now() - Duration::from_secs(1));
        let err = cache
            .commit_time(&provider, TransactionId::new_random())
            .unwrap_err();
        assert!(matches!(err, EngineError::TimedOut(_)));
    }

    #[test]
    fn lookups_are_cached() {
        struct Counting(Mutex<u32>);
        impl TransactionStatusProvider for Counting {
            fn status(&self, _: TransactionId) -> Result<TransactionStatus, EngineError> {
                *self.0.lock().unwrap() += 1;
                Ok(TransactionStatus::Committed(HybridTime::from_micros(100)))
            }
        }

        let provider = Counting(Mutex::new(0));
        let id = TransactionId::new_random();
        let mut cache = StatusCache::new(HybridTime::MAX, far_deadline());
        cache.commit_time(&provider, id).unwrap();
        cache.commit_time(&provider, id).unwrap();
        assert_eq!(*provider.0.lock().unwrap(), 1);
    }
}
