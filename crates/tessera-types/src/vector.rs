//! Dense columns of logical values.
//!
//! A [`Vector`] is one column: a type, a validity bitmap, and a value
//! payload whose interpretation depends on the [`VectorKind`].
//! Dictionary vectors carry an indexing layer mapping slot to payload
//! index; constant vectors hold one payload value for every slot.

use serde::{Deserialize, Serialize};

use tessera_error::Result;

use crate::logical_type::ComplexLogicalType;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Validity
// ---------------------------------------------------------------------------

/// Row-level validity bitmap. All rows start valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Validity {
    bits: Vec<u64>,
    len: usize,
}

impl Validity {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![u64::MAX; len.div_ceil(64)],
            len,
        }
    }

    #[must_use]
    pub fn is_valid(&self, row: usize) -> bool {
        if row >= self.len {
            return false;
        }
        self.bits[row / 64] & (1 << (row % 64)) != 0
    }

    pub fn set_valid(&mut self, row: usize, valid: bool) {
        self.ensure(row + 1);
        let mask = 1u64 << (row % 64);
        if valid {
            self.bits[row / 64] |= mask;
        } else {
            self.bits[row / 64] &= !mask;
        }
    }

    /// Count of invalid rows in the first `n`.
    #[must_use]
    pub fn invalid_count(&self, n: usize) -> usize {
        (0..n.min(self.len)).filter(|&i| !self.is_valid(i)).count() + n.saturating_sub(self.len)
    }

    fn ensure(&mut self, len: usize) {
        if len > self.len {
            self.bits.resize(len.div_ceil(64), u64::MAX);
            self.len = len;
        }
    }
}

// ---------------------------------------------------------------------------
// Vector
// ---------------------------------------------------------------------------

/// Physical layout indicator of a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorKind {
    /// One payload value per slot.
    Flat,
    /// One payload value shared by every slot.
    Constant,
    /// Payload values addressed through an indexing layer.
    Dictionary,
    /// Arithmetic sequence `start + row * step`, payload holds both.
    Sequence,
}

/// A dense column of values with a type and a validity bitmap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vector {
    ctype: ComplexLogicalType,
    kind: VectorKind,
    values: Vec<Value>,
    validity: Validity,
    /// Slot → payload index, present only for dictionary vectors.
    indexing: Option<Vec<usize>>,
    capacity: usize,
}

impl Vector {
    /// An empty flat vector of `ctype` with room for `capacity` rows.
    /// Eager reservation is bounded; huge capacities grow on demand.
    #[must_use]
    pub fn new(ctype: ComplexLogicalType, capacity: usize) -> Self {
        Self {
            ctype,
            kind: VectorKind::Flat,
            values: Vec::with_capacity(capacity.min(1024)),
            validity: Validity::default(),
            indexing: None,
            capacity,
        }
    }

    /// A flat vector owning `values`; each value is assumed to already
    /// match `ctype`.
    #[must_use]
    pub fn from_values(ctype: ComplexLogicalType, values: Vec<Value>) -> Self {
        let capacity = values.len();
        let mut validity = Validity::new(capacity);
        for (i, v) in values.iter().enumerate() {
            if v.is_null() {
                validity.set_valid(i, false);
            }
        }
        Self {
            ctype,
            kind: VectorKind::Flat,
            values,
            validity,
            indexing: None,
            capacity,
        }
    }

    /// A constant vector: `value` repeated over `len` slots.
    #[must_use]
    pub fn constant(value: Value, len: usize) -> Self {
        let ctype = value.logical_type().clone();
        let mut validity = Validity::new(len);
        if value.is_null() {
            for i in 0..len {
                validity.set_valid(i, false);
            }
        }
        Self {
            ctype,
            kind: VectorKind::Constant,
            values: vec![value],
            validity,
            indexing: None,
            capacity: len,
        }
    }

    /// A dictionary vector over `payload` addressed by `indexing`.
    #[must_use]
    pub fn dictionary(
        ctype: ComplexLogicalType,
        payload: Vec<Value>,
        indexing: Vec<usize>,
    ) -> Self {
        let capacity = indexing.len();
        Self {
            ctype,
            kind: VectorKind::Dictionary,
            values: payload,
            validity: Validity::new(capacity),
            indexing: Some(indexing),
            capacity,
        }
    }

    /// An arithmetic `BIGINT` sequence vector.
    #[must_use]
    pub fn sequence(start: i64, step: i64, len: usize) -> Self {
        Self {
            ctype: crate::logical_type::LogicalType::BigInt.into(),
            kind: VectorKind::Sequence,
            values: vec![Value::bigint(start), Value::bigint(step)],
            validity: Validity::new(len),
            indexing: None,
            capacity: len,
        }
    }

    #[must_use]
    pub fn logical_type(&self) -> &ComplexLogicalType {
        &self.ctype
    }

    pub fn set_logical_type(&mut self, ctype: ComplexLogicalType) {
        self.ctype = ctype;
    }

    #[must_use]
    pub const fn kind(&self) -> VectorKind {
        self.kind
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of materialized slots (flat vectors only grow on push).
    #[must_use]
    pub fn len(&self) -> usize {
        match self.kind {
            VectorKind::Flat => self.values.len(),
            _ => self.capacity,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_valid(&self, row: usize) -> bool {
        self.validity.is_valid(row)
    }

    /// The value at `row`, resolved through the layout. Invalid slots
    /// and out-of-range rows read as null.
    #[must_use]
    pub fn value(&self, row: usize) -> Value {
        if !self.validity.is_valid(row) && self.kind != VectorKind::Sequence {
            // Constant vectors track validity on slot 0 only.
            if self.kind != VectorKind::Constant || !self.validity.is_valid(0) {
                return Value::null_of(self.ctype.clone());
            }
        }
        match self.kind {
            VectorKind::Flat => self
                .values
                .get(row)
                .cloned()
                .unwrap_or_else(|| Value::null_of(self.ctype.clone())),
            VectorKind::Constant => self.values[0].clone(),
            VectorKind::Dictionary => {
                let idx = self.indexing.as_ref().and_then(|ix| ix.get(row)).copied();
                idx.and_then(|i| self.values.get(i).cloned())
                    .unwrap_or_else(|| Value::null_of(self.ctype.clone()))
            }
            VectorKind::Sequence => {
                let start = self.values[0].as_i64().unwrap_or(0);
                let step = self.values[1].as_i64().unwrap_or(0);
                Value::bigint(start.wrapping_add(step.wrapping_mul(row as i64)))
            }
        }
    }

    /// Store `value` at `row`, casting to the column type. A failed
    /// cast marks the slot invalid instead of erroring.
    pub fn set_value(&mut self, row: usize, value: &Value) {
        debug_assert_eq!(self.kind, VectorKind::Flat, "writes require a flat vector");
        if self.values.len() <= row {
            self.values
                .resize_with(row + 1, || Value::null_of(self.ctype.clone()));
        }
        match value.cast_as(&self.ctype) {
            Ok(cast) => {
                let valid = !cast.is_null();
                self.values[row] = cast;
                self.validity.set_valid(row, valid);
            }
            Err(_) => {
                self.values[row] = Value::null_of(self.ctype.clone());
                self.validity.set_valid(row, false);
            }
        }
    }

    /// Append a value, casting to the column type.
    pub fn push(&mut self, value: &Value) {
        let row = self.values.len();
        self.set_value(row, value);
    }

    /// Rewrite any layout into a flat vector.
    pub fn flatten(&mut self) {
        if self.kind == VectorKind::Flat {
            return;
        }
        let len = self.len();
        let mut values = Vec::with_capacity(len);
        let mut validity = Validity::new(len);
        for row in 0..len {
            let v = self.value(row);
            if v.is_null() {
                validity.set_valid(row, false);
            }
            values.push(v);
        }
        self.values = values;
        self.validity = validity;
        self.indexing = None;
        self.kind = VectorKind::Flat;
    }

    /// A flat copy of rows `[offset, offset + count)`.
    #[must_use]
    pub fn slice(&self, offset: usize, count: usize) -> Vector {
        let mut out = Vector::new(self.ctype.clone(), count);
        for row in 0..count {
            let v = self.value(offset + row);
            out.push(&v);
        }
        out
    }

    /// Iterate the first `n` resolved values.
    pub fn iter(&self, n: usize) -> impl Iterator<Item = Value> + '_ {
        (0..n).map(|row| self.value(row))
    }

    pub(crate) fn reset(&mut self) {
        self.values.clear();
        self.validity = Validity::default();
        self.indexing = None;
        self.kind = VectorKind::Flat;
    }
}

/// Cast every row of `vector` to `target`, mapping failed casts to
/// null. Returns the rewritten vector and how many rows went null.
pub fn cast_vector(vector: &Vector, target: &ComplexLogicalType, n: usize) -> (Vector, usize) {
    let mut out = Vector::new(target.clone(), n);
    let mut nulled = 0usize;
    for row in 0..n {
        let v = vector.value(row);
        match v.cast_as(target) {
            Ok(cast) => out.push(&cast),
            Err(_) => {
                nulled += 1;
                out.push(&Value::null_of(target.clone()));
            }
        }
    }
    (out, nulled)
}

/// Result of a fallible per-vector operation.
pub type VectorResult = Result<Vector>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logical_type::LogicalType;

    #[test]
    fn flat_vector_reads_back_values() {
        let mut v = Vector::new(LogicalType::Integer.into(), 4);
        v.push(&Value::integer(1));
        v.push(&Value::integer(2));
        assert_eq!(v.len(), 2);
        assert_eq!(v.value(0).as_i64(), Some(1));
        assert_eq!(v.value(1).as_i64(), Some(2));
        assert!(v.value(9).is_null());
    }

    #[test]
    fn set_value_casts_to_column_type() {
        let mut v = Vector::new(LogicalType::BigInt.into(), 2);
        v.push(&Value::integer(7));
        assert_eq!(v.value(0).tag(), LogicalType::BigInt);
        // An uncastable value marks the slot invalid.
        v.push(&Value::string("not a number"));
        assert!(!v.is_valid(1));
        assert!(v.value(1).is_null());
    }

    #[test]
    fn constant_vector_repeats() {
        let v = Vector::constant(Value::string("k"), 100);
        assert_eq!(v.kind(), VectorKind::Constant);
        assert_eq!(v.value(0).as_str(), Some("k"));
        assert_eq!(v.value(99).as_str(), Some("k"));
    }

    #[test]
    fn dictionary_resolves_through_indexing() {
        let payload = vec![Value::string("a"), Value::string("b")];
        let v = Vector::dictionary(
            LogicalType::StringLiteral.into(),
            payload,
            vec![1, 0, 1, 1],
        );
        assert_eq!(v.value(0).as_str(), Some("b"));
        assert_eq!(v.value(1).as_str(), Some("a"));
        assert_eq!(v.value(3).as_str(), Some("b"));
    }

    #[test]
    fn flatten_materializes_layouts() {
        let mut v = Vector::dictionary(
            LogicalType::StringLiteral.into(),
            vec![Value::string("x")],
            vec![0, 0],
        );
        v.flatten();
        assert_eq!(v.kind(), VectorKind::Flat);
        assert_eq!(v.value(1).as_str(), Some("x"));
    }

    #[test]
    fn sequence_computes_slots() {
        let v = Vector::sequence(10, 5, 4);
        assert_eq!(v.value(0).as_i64(), Some(10));
        assert_eq!(v.value(3).as_i64(), Some(25));
    }

    #[test]
    fn validity_tracks_nulls() {
        let v = Vector::from_values(
            LogicalType::Integer.into(),
            vec![Value::integer(1), Value::null(), Value::integer(3)],
        );
        assert!(v.is_valid(0));
        assert!(!v.is_valid(1));
        assert_eq!(v.validity.invalid_count(3), 1);
    }
}
