//! Column batches.
//!
//! A [`DataChunk`] is an ordered list of equal-cardinality vectors plus
//! a `row_ids` column of `BIGINT`, the unit operators pass between one
//! another.

use serde::{Deserialize, Serialize};

use tessera_error::{Result, TesseraError};

use crate::logical_type::ComplexLogicalType;
use crate::value::Value;
use crate::vector::Vector;

/// Default number of rows a chunk (and a version slot) holds.
pub const VECTOR_CAPACITY: usize = 1024;

/// An aligned column-batch snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataChunk {
    vectors: Vec<Vector>,
    row_ids: Vec<i64>,
    cardinality: usize,
    capacity: usize,
}

impl DataChunk {
    /// An empty chunk with one flat vector per type.
    #[must_use]
    pub fn new(types: &[ComplexLogicalType], capacity: usize) -> Self {
        Self {
            vectors: types
                .iter()
                .map(|t| Vector::new(t.clone(), capacity))
                .collect(),
            row_ids: Vec::new(),
            cardinality: 0,
            capacity,
        }
    }

    /// A chunk assembled from prebuilt columns; cardinality is the
    /// shortest column length.
    #[must_use]
    pub fn from_vectors(vectors: Vec<Vector>) -> Self {
        let cardinality = vectors.iter().map(Vector::len).min().unwrap_or(0);
        let capacity = cardinality.max(VECTOR_CAPACITY);
        Self {
            vectors,
            row_ids: Vec::new(),
            cardinality,
            capacity,
        }
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.vectors.len()
    }

    #[must_use]
    pub const fn cardinality(&self) -> usize {
        self.cardinality
    }

    pub fn set_cardinality(&mut self, n: usize) {
        debug_assert!(n <= self.capacity);
        self.cardinality = n;
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cardinality == 0
    }

    #[must_use]
    pub fn column(&self, idx: usize) -> &Vector {
        &self.vectors[idx]
    }

    pub fn column_mut(&mut self, idx: usize) -> &mut Vector {
        &mut self.vectors[idx]
    }

    #[must_use]
    pub fn columns(&self) -> &[Vector] {
        &self.vectors
    }

    /// Index of the column whose alias is `name`.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.vectors
            .iter()
            .position(|v| v.logical_type().alias() == Some(name))
    }

    /// The column types, aliases included.
    #[must_use]
    pub fn types(&self) -> Vec<ComplexLogicalType> {
        self.vectors
            .iter()
            .map(|v| v.logical_type().clone())
            .collect()
    }

    #[must_use]
    pub fn value(&self, col: usize, row: usize) -> Value {
        self.vectors[col].value(row)
    }

    /// Store `value`, casting to the column type or marking the slot
    /// invalid. Grows cardinality to cover `row`.
    pub fn set_value(&mut self, col: usize, row: usize, value: &Value) {
        self.vectors[col].set_value(row, value);
        if row >= self.cardinality {
            self.cardinality = row + 1;
        }
    }

    /// Append one row of values across all columns.
    pub fn append_row(&mut self, values: &[Value]) -> Result<()> {
        if values.len() != self.vectors.len() {
            return Err(TesseraError::invalid(format!(
                "append_row: {} values for {} columns",
                values.len(),
                self.vectors.len()
            )));
        }
        if self.cardinality >= self.capacity {
            return Err(TesseraError::invalid("append_row: chunk is full"));
        }
        let row = self.cardinality;
        for (col, value) in values.iter().enumerate() {
            self.vectors[col].set_value(row, value);
        }
        self.cardinality = row + 1;
        Ok(())
    }

    #[must_use]
    pub fn row_ids(&self) -> &[i64] {
        &self.row_ids
    }

    pub fn set_row_ids(&mut self, ids: Vec<i64>) {
        self.row_ids = ids;
    }

    pub fn push_row_id(&mut self, id: i64) {
        self.row_ids.push(id);
    }

    /// All values of one row in column order.
    #[must_use]
    pub fn row(&self, row: usize) -> Vec<Value> {
        self.vectors.iter().map(|v| v.value(row)).collect()
    }

    /// Replace a column wholesale, keeping the chunk aligned.
    pub fn replace_column(&mut self, idx: usize, vector: Vector) {
        self.vectors[idx] = vector;
    }

    /// Append all rows of `other` (same arity expected).
    pub fn append_chunk(&mut self, other: &DataChunk) -> Result<()> {
        for row in 0..other.cardinality() {
            self.append_row(&other.row(row))?;
            if let Some(id) = other.row_ids.get(row) {
                self.row_ids.push(*id);
            }
        }
        Ok(())
    }

    /// Clear all rows, keeping the column layout.
    pub fn reset(&mut self) {
        for v in &mut self.vectors {
            v.reset();
        }
        self.row_ids.clear();
        self.cardinality = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logical_type::LogicalType;

    fn int_string_chunk() -> DataChunk {
        let types = vec![
            ComplexLogicalType::from(LogicalType::Integer).with_alias("x"),
            ComplexLogicalType::from(LogicalType::StringLiteral).with_alias("name"),
        ];
        DataChunk::new(&types, VECTOR_CAPACITY)
    }

    #[test]
    fn append_and_read_rows() {
        let mut chunk = int_string_chunk();
        chunk
            .append_row(&[Value::integer(1), Value::string("a")])
            .unwrap();
        chunk
            .append_row(&[Value::integer(2), Value::string("b")])
            .unwrap();
        assert_eq!(chunk.cardinality(), 2);
        assert_eq!(chunk.value(0, 1).as_i64(), Some(2));
        assert_eq!(chunk.value(1, 0).as_str(), Some("a"));
    }

    #[test]
    fn arity_mismatch_is_invalid() {
        let mut chunk = int_string_chunk();
        assert!(chunk.append_row(&[Value::integer(1)]).is_err());
    }

    #[test]
    fn set_value_casts_to_column_type() {
        let mut chunk = int_string_chunk();
        chunk.append_row(&[Value::integer(1), Value::string("a")]).unwrap();
        // BIGINT literal cast down into the INTEGER column.
        chunk.set_value(0, 0, &Value::bigint(9));
        assert_eq!(chunk.value(0, 0).tag(), LogicalType::Integer);
        assert_eq!(chunk.value(0, 0).as_i64(), Some(9));
    }

    #[test]
    fn column_lookup_by_alias() {
        let chunk = int_string_chunk();
        assert_eq!(chunk.column_index("name"), Some(1));
        assert_eq!(chunk.column_index("missing"), None);
    }

    #[test]
    fn row_ids_travel_with_the_chunk() {
        let mut chunk = int_string_chunk();
        chunk.append_row(&[Value::integer(1), Value::string("a")]).unwrap();
        chunk.push_row_id(41);
        assert_eq!(chunk.row_ids(), &[41]);
    }
}
