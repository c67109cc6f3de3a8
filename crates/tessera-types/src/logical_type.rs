//! Logical and physical type tags.
//!
//! A [`LogicalType`] is the user-visible tag; a [`ComplexLogicalType`]
//! adds an optional alias (column name) and an optional extension for
//! parameterized types (decimal width/scale, enum entries, array
//! length, struct children). [`PhysicalType`] is the storage-level
//! shape that drives comparator dispatch.

use serde::{Deserialize, Serialize};

use crate::value::Value;

// ---------------------------------------------------------------------------
// LogicalType
// ---------------------------------------------------------------------------

/// Tag of every value the engine can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    HugeInt,
    UTinyInt,
    USmallInt,
    UInteger,
    UBigInt,
    UHugeInt,
    Float,
    Double,
    /// Fixed-point numeric stored as an `i64` payload; width/scale live
    /// in the type extension.
    Decimal,
    TimestampSec,
    TimestampMs,
    TimestampUs,
    TimestampNs,
    StringLiteral,
    Blob,
    Pointer,
    /// Null type.
    Na,
    Array,
    List,
    Map,
    Struct,
    Union,
    Variant,
    Enum,
}

impl LogicalType {
    /// Whether this tag names a numeric type (integral, floating, or
    /// decimal).
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        self.is_integral() || self.is_floating() || matches!(self, Self::Decimal)
    }

    /// Whether this tag names an integer type of any width or sign.
    #[must_use]
    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            Self::TinyInt
                | Self::SmallInt
                | Self::Integer
                | Self::BigInt
                | Self::HugeInt
                | Self::UTinyInt
                | Self::USmallInt
                | Self::UInteger
                | Self::UBigInt
                | Self::UHugeInt
        )
    }

    #[must_use]
    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            Self::TinyInt | Self::SmallInt | Self::Integer | Self::BigInt | Self::HugeInt
        )
    }

    #[must_use]
    pub const fn is_unsigned(self) -> bool {
        matches!(
            self,
            Self::UTinyInt | Self::USmallInt | Self::UInteger | Self::UBigInt | Self::UHugeInt
        )
    }

    #[must_use]
    pub const fn is_floating(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    /// Whether this tag names a timestamp of any scale.
    #[must_use]
    pub const fn is_temporal(self) -> bool {
        matches!(
            self,
            Self::TimestampSec | Self::TimestampMs | Self::TimestampUs | Self::TimestampNs
        )
    }

    /// Whether this tag names a composite type with child values.
    #[must_use]
    pub const fn is_nested(self) -> bool {
        matches!(
            self,
            Self::Array | Self::List | Self::Map | Self::Struct | Self::Union | Self::Variant
        )
    }

    /// Bit width of the integer payload, used for promotion ranking.
    /// Non-integral types report 0.
    #[must_use]
    pub const fn integer_width(self) -> u8 {
        match self {
            Self::TinyInt | Self::UTinyInt => 8,
            Self::SmallInt | Self::USmallInt => 16,
            Self::Integer | Self::UInteger => 32,
            Self::BigInt | Self::UBigInt => 64,
            Self::HugeInt | Self::UHugeInt => 128,
            _ => 0,
        }
    }

    /// Storage-level shape of this tag.
    #[must_use]
    pub const fn to_physical(self) -> PhysicalType {
        match self {
            Self::Boolean => PhysicalType::Bool,
            Self::TinyInt => PhysicalType::Int8,
            Self::SmallInt => PhysicalType::Int16,
            Self::Integer => PhysicalType::Int32,
            Self::BigInt
            | Self::Decimal
            | Self::TimestampSec
            | Self::TimestampMs
            | Self::TimestampUs
            | Self::TimestampNs => PhysicalType::Int64,
            Self::HugeInt => PhysicalType::Int128,
            Self::UTinyInt => PhysicalType::UInt8,
            Self::USmallInt => PhysicalType::UInt16,
            Self::UInteger | Self::Enum => PhysicalType::UInt32,
            Self::UBigInt | Self::Pointer => PhysicalType::UInt64,
            Self::UHugeInt => PhysicalType::UInt128,
            Self::Float => PhysicalType::Float32,
            Self::Double => PhysicalType::Float64,
            Self::StringLiteral => PhysicalType::String,
            Self::Blob => PhysicalType::Bytes,
            Self::Na => PhysicalType::Na,
            Self::Array | Self::List | Self::Map | Self::Struct | Self::Union | Self::Variant => {
                PhysicalType::Nested
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PhysicalType
// ---------------------------------------------------------------------------

/// Storage-level shape; indexes the comparator dispatch table in the
/// predicate factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhysicalType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Int128,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    UInt128,
    Float32,
    Float64,
    String,
    Bytes,
    Nested,
    Na,
}

impl PhysicalType {
    /// Dense index for table-based dispatch.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Number of physical types, the dispatch table dimension.
    pub const COUNT: usize = 17;
}

// ---------------------------------------------------------------------------
// Type extensions
// ---------------------------------------------------------------------------

/// Payload for parameterized logical types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeExtension {
    /// Decimal precision parameters.
    Decimal { width: u8, scale: u8 },
    /// Fixed-length array size.
    Array { len: usize },
    /// Enum entries: integer ordinal per aliased entry name.
    Enum { name: String, entries: Vec<Value> },
}

/// A logical type plus optional alias, extension, and child types.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ComplexLogicalType {
    tag: LogicalType,
    alias: Option<String>,
    extension: Option<Box<TypeExtension>>,
    children: Vec<ComplexLogicalType>,
}

impl Default for LogicalType {
    fn default() -> Self {
        Self::Na
    }
}

impl From<LogicalType> for ComplexLogicalType {
    fn from(tag: LogicalType) -> Self {
        Self::new(tag)
    }
}

impl PartialEq for ComplexLogicalType {
    /// Aliases do not participate in type equality; two columns with
    /// different names but the same shape hold the same type.
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
            && self.extension == other.extension
            && self.children == other.children
    }
}

impl ComplexLogicalType {
    #[must_use]
    pub const fn new(tag: LogicalType) -> Self {
        Self {
            tag,
            alias: None,
            extension: None,
            children: Vec::new(),
        }
    }

    /// Decimal with explicit width and scale.
    #[must_use]
    pub fn decimal(width: u8, scale: u8) -> Self {
        let mut t = Self::new(LogicalType::Decimal);
        t.extension = Some(Box::new(TypeExtension::Decimal { width, scale }));
        t
    }

    /// Fixed-length array of `child`.
    #[must_use]
    pub fn array(child: Self, len: usize) -> Self {
        let mut t = Self::new(LogicalType::Array);
        t.extension = Some(Box::new(TypeExtension::Array { len }));
        t.children = vec![child];
        t
    }

    /// Variable-length list of `child`.
    #[must_use]
    pub fn list(child: Self) -> Self {
        let mut t = Self::new(LogicalType::List);
        t.children = vec![child];
        t
    }

    /// Map from `key` to `value`.
    #[must_use]
    pub fn map(key: Self, value: Self) -> Self {
        let mut t = Self::new(LogicalType::Map);
        t.children = vec![key, value];
        t
    }

    /// Struct with named fields (field names are the children's
    /// aliases).
    #[must_use]
    pub fn struct_(fields: Vec<Self>) -> Self {
        let mut t = Self::new(LogicalType::Struct);
        t.children = fields;
        t
    }

    /// Tagged union over `variants`.
    #[must_use]
    pub fn union_(variants: Vec<Self>) -> Self {
        let mut t = Self::new(LogicalType::Union);
        t.children = variants;
        t
    }

    /// Enum carrying named integer entries.
    #[must_use]
    pub fn enum_(name: impl Into<String>, entries: Vec<Value>) -> Self {
        let mut t = Self::new(LogicalType::Enum);
        t.extension = Some(Box::new(TypeExtension::Enum {
            name: name.into(),
            entries,
        }));
        t
    }

    #[must_use]
    pub const fn tag(&self) -> LogicalType {
        self.tag
    }

    #[must_use]
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn set_alias(&mut self, alias: impl Into<String>) {
        self.alias = Some(alias.into());
    }

    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.set_alias(alias);
        self
    }

    #[must_use]
    pub fn extension(&self) -> Option<&TypeExtension> {
        self.extension.as_deref()
    }

    #[must_use]
    pub fn children(&self) -> &[ComplexLogicalType] {
        &self.children
    }

    /// Decimal width/scale, if this is a decimal type.
    #[must_use]
    pub fn decimal_params(&self) -> Option<(u8, u8)> {
        match self.extension() {
            Some(TypeExtension::Decimal { width, scale }) => Some((*width, *scale)),
            _ => None,
        }
    }

    #[must_use]
    pub const fn to_physical(&self) -> PhysicalType {
        self.tag.to_physical()
    }
}

impl std::fmt::Display for ComplexLogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.alias() {
            Some(alias) => write!(f, "{:?}({alias})", self.tag),
            None => write!(f, "{:?}", self.tag),
        }
    }
}

// ---------------------------------------------------------------------------
// Comparison operators
// ---------------------------------------------------------------------------

/// The comparison operators shared by predicates and index search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    /// Evaluate against a three-way comparison result.
    #[must_use]
    pub const fn matches(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};
        match self {
            Self::Eq => matches!(ord, Equal),
            Self::Ne => !matches!(ord, Equal),
            Self::Gt => matches!(ord, Greater),
            Self::Gte => matches!(ord, Greater | Equal),
            Self::Lt => matches!(ord, Less),
            Self::Lte => matches!(ord, Less | Equal),
        }
    }
}

// ---------------------------------------------------------------------------
// Promotion
// ---------------------------------------------------------------------------

/// Standard numeric widening: the result holds the largest precision
/// of the two sides, signed wins over unsigned at equal width, and a
/// floating side forces a floating result. Temporal pairs promote to
/// the finer scale. Non-promotable pairs return `None`.
#[must_use]
pub fn promote_type(a: LogicalType, b: LogicalType) -> Option<LogicalType> {
    use LogicalType::{
        BigInt, Double, Float, HugeInt, Integer, SmallInt, TinyInt, UBigInt, UHugeInt, UInteger,
        USmallInt, UTinyInt,
    };

    if a == b {
        return Some(a);
    }
    if a.is_temporal() && b.is_temporal() {
        return Some(finer_timestamp(a, b));
    }
    if !a.is_numeric() || !b.is_numeric() {
        return None;
    }

    // Decimal participates as its i64 backing joined with the other side.
    let a = if a == LogicalType::Decimal { BigInt } else { a };
    let b = if b == LogicalType::Decimal { BigInt } else { b };
    if a == b {
        return Some(a);
    }

    if a == Double || b == Double {
        return Some(Double);
    }
    if a == Float || b == Float {
        let other = if a == Float { b } else { a };
        // Small integers fit a 32-bit float; anything wider needs Double.
        return Some(if other == Float || other.integer_width() <= 16 {
            Float
        } else {
            Double
        });
    }

    let width = a.integer_width().max(b.integer_width());
    let signed = a.is_signed() || b.is_signed();
    Some(match (width, signed) {
        (8, true) => TinyInt,
        (8, false) => UTinyInt,
        (16, true) => SmallInt,
        (16, false) => USmallInt,
        (32, true) => Integer,
        (32, false) => UInteger,
        (64, true) => BigInt,
        (64, false) => UBigInt,
        (_, true) => HugeInt,
        _ => UHugeInt,
    })
}

/// The finer of two timestamp scales.
#[must_use]
pub fn finer_timestamp(a: LogicalType, b: LogicalType) -> LogicalType {
    const fn rank(t: LogicalType) -> u8 {
        match t {
            LogicalType::TimestampSec => 0,
            LogicalType::TimestampMs => 1,
            LogicalType::TimestampUs => 2,
            _ => 3,
        }
    }
    if rank(a) >= rank(b) { a } else { b }
}

/// Multiplier from `from`'s timestamp scale into `to`'s, as a signed
/// pair (numerator, denominator).
#[must_use]
pub fn timestamp_rescale(from: LogicalType, to: LogicalType) -> (i64, i64) {
    const fn per_sec(t: LogicalType) -> i64 {
        match t {
            LogicalType::TimestampSec => 1,
            LogicalType::TimestampMs => 1_000,
            LogicalType::TimestampUs => 1_000_000,
            _ => 1_000_000_000,
        }
    }
    (per_sec(to), per_sec(from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_prefers_widest() {
        assert_eq!(
            promote_type(LogicalType::Integer, LogicalType::BigInt),
            Some(LogicalType::BigInt)
        );
        assert_eq!(
            promote_type(LogicalType::TinyInt, LogicalType::SmallInt),
            Some(LogicalType::SmallInt)
        );
    }

    #[test]
    fn promotion_prefers_signed_at_equal_width() {
        assert_eq!(
            promote_type(LogicalType::UInteger, LogicalType::Integer),
            Some(LogicalType::Integer)
        );
        assert_eq!(
            promote_type(LogicalType::UBigInt, LogicalType::BigInt),
            Some(LogicalType::BigInt)
        );
    }

    #[test]
    fn promotion_floats_win() {
        assert_eq!(
            promote_type(LogicalType::Integer, LogicalType::Double),
            Some(LogicalType::Double)
        );
        assert_eq!(
            promote_type(LogicalType::SmallInt, LogicalType::Float),
            Some(LogicalType::Float)
        );
        // A 64-bit integer does not fit a 32-bit float.
        assert_eq!(
            promote_type(LogicalType::BigInt, LogicalType::Float),
            Some(LogicalType::Double)
        );
    }

    #[test]
    fn promotion_is_symmetric() {
        let types = [
            LogicalType::TinyInt,
            LogicalType::UInteger,
            LogicalType::BigInt,
            LogicalType::Float,
            LogicalType::Double,
            LogicalType::UHugeInt,
        ];
        for a in types {
            for b in types {
                assert_eq!(promote_type(a, b), promote_type(b, a), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn temporal_promotes_to_finer_scale() {
        assert_eq!(
            promote_type(LogicalType::TimestampSec, LogicalType::TimestampNs),
            Some(LogicalType::TimestampNs)
        );
        assert_eq!(
            promote_type(LogicalType::TimestampMs, LogicalType::TimestampUs),
            Some(LogicalType::TimestampUs)
        );
    }

    #[test]
    fn string_numeric_does_not_promote() {
        assert_eq!(
            promote_type(LogicalType::StringLiteral, LogicalType::Integer),
            None
        );
    }

    #[test]
    fn alias_does_not_affect_type_equality() {
        let a = ComplexLogicalType::new(LogicalType::Integer).with_alias("x");
        let b = ComplexLogicalType::new(LogicalType::Integer).with_alias("y");
        assert_eq!(a, b);
    }
}
