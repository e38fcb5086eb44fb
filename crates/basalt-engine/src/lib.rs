//! Document-oriented MVCC storage core over a generic ordered key-value
//! store: hierarchical key encoding, multi-version timestamped values,
//! tombstones and per-value TTL expiry, provisional transactional writes
//! with commit-time resolution, and a row-wise cursor for query layers.

mod debug;
mod doc_db;
mod encoding;
mod error;
mod hybrid_time;
mod intent;
mod intent_iter;
mod reader;
mod row_iter;
mod schema;
mod txn;
mod value;
mod write_batch;

pub use debug::dump_doc_db;
pub use doc_db::DocDb;
pub use encoding::doc_key::{DocKey, SubDocKey};
pub use encoding::primitive::PrimitiveValue;
pub use error::EngineError;
pub use hybrid_time::{DocHybridTime, HybridClock, HybridTime};
pub use intent::{
    IntentStrength, abort_transaction_intents, ancestor_prefixes, apply_transaction_intents,
    transaction_intents,
};
pub use intent_iter::{FetchedKey, IntentAwareIterator};
pub use reader::{find_last_write_time, resolve_cell};
pub use row_iter::{DocRowwiseIterator, doc_rowwise_iterator};
pub use schema::{ColumnId, ColumnSchema, DataType, Projection, Row, Schema};
pub use txn::{
    MockStatusProvider, TransactionContext, TransactionId, TransactionStatus,
    TransactionStatusProvider,
};
pub use value::Value;
pub use write_batch::{DocPath, DocWriteBatch};
