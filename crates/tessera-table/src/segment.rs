//! Column segments.
//!
//! A [`Segment`] holds one column's contiguous values and is the unit
//! of page IO: checkpoint serializes a segment into a metadata block
//! chain through the table's block manager, and load reads it back.

use serde::{Deserialize, Serialize};

use tessera_types::{ComplexLogicalType, Value, Vector};

/// One column of a row group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    ctype: ComplexLogicalType,
    values: Vec<Value>,
}

impl Segment {
    #[must_use]
    pub fn new(ctype: ComplexLogicalType) -> Self {
        Self {
            ctype,
            values: Vec::new(),
        }
    }

    #[must_use]
    pub fn logical_type(&self) -> &ComplexLogicalType {
        &self.ctype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Append one value, casting to the segment type; uncastable input
    /// lands as null.
    pub fn append(&mut self, value: &Value) {
        let v = value
            .cast_as(&self.ctype)
            .unwrap_or_else(|_| Value::null_of(self.ctype.clone()));
        self.values.push(v);
    }

    /// The value at `slot`; out-of-range slots read as null.
    #[must_use]
    pub fn fetch(&self, slot: usize) -> Value {
        self.values
            .get(slot)
            .cloned()
            .unwrap_or_else(|| Value::null_of(self.ctype.clone()))
    }

    /// Overwrite one cell (cast to the segment type).
    pub fn update_cell(&mut self, slot: usize, value: &Value) {
        if slot < self.values.len() {
            self.values[slot] = value
                .cast_as(&self.ctype)
                .unwrap_or_else(|_| Value::null_of(self.ctype.clone()));
        }
    }

    /// Copy `[start, start + count)` into a flat vector.
    #[must_use]
    pub fn scan(&self, start: usize, count: usize) -> Vector {
        let mut out = Vector::new(self.ctype.clone(), count);
        for slot in start..(start + count).min(self.values.len()) {
            out.push(&self.values[slot]);
        }
        out
    }

    /// Keep only the slots flagged in `keep`; used by compaction.
    pub fn retain(&mut self, keep: &[bool]) {
        let mut slot = 0usize;
        self.values.retain(|_| {
            let k = keep.get(slot).copied().unwrap_or(true);
            slot += 1;
            k
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::LogicalType;

    #[test]
    fn append_casts_to_segment_type() {
        let mut seg = Segment::new(LogicalType::BigInt.into());
        seg.append(&Value::integer(5));
        assert_eq!(seg.fetch(0).tag(), LogicalType::BigInt);
        seg.append(&Value::string("junk"));
        assert!(seg.fetch(1).is_null());
    }

    #[test]
    fn scan_copies_a_range() {
        let mut seg = Segment::new(LogicalType::Integer.into());
        for i in 0..10 {
            seg.append(&Value::integer(i));
        }
        let v = seg.scan(3, 4);
        assert_eq!(v.len(), 4);
        assert_eq!(v.value(0).as_i64(), Some(3));
        assert_eq!(v.value(3).as_i64(), Some(6));
    }

    #[test]
    fn retain_drops_flagged_slots() {
        let mut seg = Segment::new(LogicalType::Integer.into());
        for i in 0..4 {
            seg.append(&Value::integer(i));
        }
        seg.retain(&[true, false, true, false]);
        assert_eq!(seg.len(), 2);
        assert_eq!(seg.fetch(1).as_i64(), Some(2));
    }
}
