mod error;
mod memory;
mod store;

pub use error::StoreError;
pub use memory::{MemoryIterator, MemoryStore};
pub use store::{KeyValueStore, KvIterator, WriteBatch, WriteOp};
