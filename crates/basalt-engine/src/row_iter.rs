use std::time::Instant;

use basalt_store::KvIterator;
use tracing::debug;

use crate::encoding::doc_key::DocKey;
use crate::encoding::primitive::PrimitiveValue;
use crate::error::EngineError;
use crate::hybrid_time::{DocHybridTime, HybridTime};
use crate::intent_iter::IntentAwareIterator;
use crate::reader::{find_last_write_time, live_cell_value};
use crate::schema::{Projection, Row, Schema};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IterState {
    Uninitialized,
    Ready,
    Exhausted,
}

/// Per-row cursor over the documents of one table: a lazy, finite,
/// forward-only sequence of projected rows in ascending doc-key byte
/// order, all resolved against one fixed read time.
///
/// `has_next` peeks (and materializes) the next live row and is idempotent;
/// `next_row` hands the peeked row out and advances. Restart only by
/// building a fresh iterator with a new read time or start key.
///
/// Instances are not internally synchronized; callers serialize all calls.
pub struct DocRowwiseIterator<I: KvIterator> {
    projection_names: Vec<String>,
    schema: Schema,
    iter: IntentAwareIterator<I>,
    deadline: Instant,
    projection: Option<Projection>,
    state: IterState,
    row: Row,
    row_ready: bool,
}

impl<I: KvIterator> DocRowwiseIterator<I> {
    pub fn new(
        projection_names: &[&str],
        schema: Schema,
        iter: IntentAwareIterator<I>,
        deadline: Instant,
    ) -> Self {
        Self {
            projection_names: projection_names.iter().map(|s| s.to_string()).collect(),
            schema,
            iter,
            deadline,
            projection: None,
            state: IterState::Uninitialized,
            row: Row::new(),
            row_ready: false,
        }
    }

    /// Validates the projection against the schema and positions at the
    /// first doc key. Fails `InvalidArgument` when the projection names a
    /// column the schema does not have.
    pub fn init(&mut self) -> Result<(), EngineError> {
        self.init_from(&[])
    }

    /// As [`init`](Self::init), but starts at the first doc key >=
    /// `start_key` (an encoded doc key).
    pub fn init_from(&mut self, start_key: &[u8]) -> Result<(), EngineError> {
        let names: Vec<&str> = self.projection_names.iter().map(String::as_str).collect();
        self.projection = Some(self.schema.projection_by_names(&names)?);
        self.iter.seek(start_key)?;
        self.state = IterState::Ready;
        self.row_ready = false;
        Ok(())
    }

    /// Whether another live row exists. Idempotent: repeated calls without
    /// `next_row` neither advance the cursor nor change the answer.
    pub fn has_next(&mut self) -> Result<bool, EngineError> {
        match self.state {
            IterState::Uninitialized => {
                return Err(EngineError::IllegalState(
                    "has_next called before init".into(),
                ));
            }
            IterState::Exhausted => return Ok(false),
            IterState::Ready => {}
        }
        if self.row_ready {
            return Ok(true);
        }
        loop {
            if Instant::now() >= self.deadline {
                return Err(EngineError::TimedOut("row scan deadline exceeded".into()));
            }
            if !self.iter.valid() {
                self.state = IterState::Exhausted;
                return Ok(false);
            }
            let fetched = self.iter.fetch_key()?;
            let doc_key_size = DocKey::encoded_size(&fetched.key)?;
            let row_key = fetched.key[..doc_key_size].to_vec();

            if self.scan_document(&row_key)? {
                self.fill_key_columns(&row_key)?;
                self.row_ready = true;
                return Ok(true);
            }
            debug!("document dead at read time, skipping row");
            // One seek lands on the next document, however much history
            // the dead one has.
            self.iter.seek_out_of_sub_doc(&row_key)?;
        }
    }

    /// Copies the peeked row into `row` and advances the cursor.
    pub fn next_row(&mut self, row: &mut Row) -> Result<(), EngineError> {
        match self.state {
            IterState::Uninitialized => {
                return Err(EngineError::IllegalState(
                    "next_row called before init".into(),
                ));
            }
            IterState::Exhausted => {
                return Err(EngineError::IllegalState(
                    "next_row called on exhausted iterator".into(),
                ));
            }
            IterState::Ready => {}
        }
        if !self.row_ready {
            return Err(EngineError::IllegalState(
                "next_row called without a preceding has_next".into(),
            ));
        }
        row.clone_from(&self.row);
        self.row_ready = false;
        Ok(())
    }

    /// Resolves the document at `row_key` into `self.row`. Returns whether
    /// the document has any live cell at the read time — projected or not.
    /// On a false return the iterator may be anywhere inside the document.
    fn scan_document(&mut self, row_key: &[u8]) -> Result<bool, EngineError> {
        self.row.clear();
        let projection = self
            .projection
            .clone()
            .expect("scan_document runs only after init");

        // Row-level tombstone; its time is the floor every cell must beat.
        let overwrite_floor = match find_last_write_time(&mut self.iter, row_key)? {
            Some((write_time, value)) if value.is_tombstone() => write_time,
            _ => DocHybridTime::MIN,
        };

        let mut any_live = false;
        self.iter.seek_past_sub_key(row_key)?;
        while self.iter.valid() {
            let fetched = self.iter.fetch_key()?;
            if !fetched.key.starts_with(row_key) {
                break;
            }
            let mut subkey_bytes = &fetched.key[row_key.len()..];
            let subkey = PrimitiveValue::consume_from(&mut subkey_bytes)?;
            let cell_key_len = fetched.key.len() - subkey_bytes.len();
            let cell_key = fetched.key[..cell_key_len].to_vec();

            // The merged stream surfaces the newest visible version first,
            // so the current entry decides the whole cell when it sits at
            // the cell path itself (not below it).
            if subkey_bytes.is_empty() && fetched.write_time > overwrite_floor {
                let value = Value::decode(self.iter.value())?;
                if let Some((primitive, _)) = live_cell_value(
                    fetched.write_time,
                    value,
                    overwrite_floor,
                    self.iter.read_time(),
                ) {
                    any_live = true;
                    if let PrimitiveValue::ColumnId(id) = subkey {
                        if projection.contains(id) {
                            self.row.set(id, primitive);
                        }
                    }
                }
            }
            self.iter.seek_out_of_sub_doc(&cell_key)?;
        }
        Ok(any_live)
    }

    /// Projected key columns come straight from the doc key components.
    fn fill_key_columns(&mut self, row_key: &[u8]) -> Result<(), EngineError> {
        let projection = self
            .projection
            .as_ref()
            .expect("fill_key_columns runs only after init");
        if projection.columns().iter().all(|c| c.key_index().is_none()) {
            return Ok(());
        }
        let doc_key = DocKey::decode(row_key)?;
        let components: Vec<&PrimitiveValue> = doc_key.components().collect();
        for column in projection.columns() {
            if let Some(key_index) = column.key_index() {
                if let Some(component) = components.get(key_index) {
                    self.row.set(column.id(), (*component).clone());
                }
            }
        }
        Ok(())
    }
}

/// Convenience constructor mirroring how statement executors build row
/// cursors: a doc-db pair, a projection, and one read point.
pub fn doc_rowwise_iterator<S: basalt_store::KeyValueStore>(
    doc_db: &crate::doc_db::DocDb<S>,
    projection_names: &[&str],
    schema: Schema,
    txn: Option<crate::txn::TransactionContext>,
    deadline: Instant,
    read_time: HybridTime,
) -> DocRowwiseIterator<S::Iter> {
    let iter = doc_db.intent_aware_iter(read_time, txn, deadline);
    DocRowwiseIterator::new(projection_names, schema, iter, deadline)
}
