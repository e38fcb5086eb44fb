use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::encoding::primitive::PrimitiveValue;
use crate::error::EngineError;

/// Stable numeric id of a column, used as the subkey under a row.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ColumnId(pub u32);

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ColumnId({})", self.0)
    }
}

impl fmt::Debug for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    String,
    Int64,
    Double,
    Binary,
}

/// Per-column metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    name: String,
    data_type: DataType,
    nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }
}

/// Physical table schema: key columns first (they map onto the doc key's
/// hashed and range components in order), then value columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<ColumnSchema>,
    ids: Vec<ColumnId>,
    num_key_columns: usize,
}

impl Schema {
    pub fn new(columns: Vec<ColumnSchema>, ids: Vec<ColumnId>, num_key_columns: usize) -> Self {
        assert_eq!(columns.len(), ids.len());
        assert!(num_key_columns <= columns.len());
        Self {
            columns,
            ids,
            num_key_columns,
        }
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_key_columns(&self) -> usize {
        self.num_key_columns
    }

    pub fn column(&self, index: usize) -> &ColumnSchema {
        &self.columns[index]
    }

    pub fn column_id(&self, index: usize) -> ColumnId {
        self.ids[index]
    }

    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// Builds a projection over the named columns, preserving request order.
    /// Unknown names fail with `InvalidArgument`.
    pub fn projection_by_names(&self, names: &[&str]) -> Result<Projection, EngineError> {
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let index = self.find_column(name).ok_or_else(|| {
                EngineError::InvalidArgument(format!("unknown projected column: {name}"))
            })?;
            columns.push(ProjectedColumn {
                id: self.ids[index],
                key_index: (index < self.num_key_columns).then_some(index),
            });
        }
        Ok(Projection { columns })
    }
}

/// One column requested by a projection. Key columns record their position
/// among the doc key components so readers can fill them without a store
/// lookup.
#[derive(Debug, Clone, Copy)]
pub struct ProjectedColumn {
    id: ColumnId,
    key_index: Option<usize>,
}

impl ProjectedColumn {
    pub fn id(&self) -> ColumnId {
        self.id
    }

    pub fn key_index(&self) -> Option<usize> {
        self.key_index
    }
}

/// Ordered subset of a schema's columns requested for row reconstruction.
#[derive(Debug, Clone)]
pub struct Projection {
    columns: Vec<ProjectedColumn>,
}

impl Projection {
    pub fn columns(&self) -> &[ProjectedColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_id(&self, index: usize) -> ColumnId {
        self.columns[index].id
    }

    pub fn contains(&self, id: ColumnId) -> bool {
        self.columns.iter().any(|c| c.id == id)
    }
}

/// One materialized row. Columns missing from the map are null/absent.
#[derive(Debug, Clone, Default)]
pub struct Row {
    values: BTreeMap<ColumnId, PrimitiveValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// The column's value, or `None` when it is absent at the read time.
    pub fn get(&self, id: ColumnId) -> Option<&PrimitiveValue> {
        self.values.get(&id)
    }

    pub fn is_null(&self, id: ColumnId) -> bool {
        matches!(self.get(id), None | Some(PrimitiveValue::Null))
    }

    pub(crate) fn set(&mut self, id: ColumnId, value: PrimitiveValue) {
        self.values.insert(id, value);
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_schema() -> Schema {
        Schema::new(
            vec![
                ColumnSchema::new("a", DataType::String, false),
                ColumnSchema::new("b", DataType::Int64, false),
                ColumnSchema::new("c", DataType::String, true),
                ColumnSchema::new("d", DataType::Int64, true),
                ColumnSchema::new("e", DataType::String, true),
            ],
            vec![
                ColumnId(10),
                ColumnId(20),
                ColumnId(30),
                ColumnId(40),
                ColumnId(50),
            ],
            2,
        )
    }

    #[test]
    fn projection_preserves_request_order() {
        let schema = test_schema();
        let projection = schema.projection_by_names(&["e", "c"]).unwrap();
        assert_eq!(projection.column_id(0), ColumnId(50));
        assert_eq!(projection.column_id(1), ColumnId(30));
    }

    #[test]
    fn projection_unknown_column_fails() {
        let schema = test_schema();
        let err = schema.projection_by_names(&["c", "nope"]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn projection_marks_key_columns() {
        let schema = test_schema();
        let projection = schema.projection_by_names(&["a", "b", "c"]).unwrap();
        assert_eq!(projection.columns()[0].key_index(), Some(0));
        assert_eq!(projection.columns()[1].key_index(), Some(1));
        assert_eq!(projection.columns()[2].key_index(), None);
    }

    #[test]
    fn row_absent_columns_are_null() {
        let mut row = Row::new();
        assert!(row.is_null(ColumnId(30)));
        row.set(ColumnId(30), PrimitiveValue::Int64(7));
        assert!(!row.is_null(ColumnId(30)));
        row.clear();
        assert!(row.is_null(ColumnId(30)));
    }
}
