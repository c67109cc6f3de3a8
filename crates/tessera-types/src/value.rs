//! The tagged value type.
//!
//! [`Value`] pairs a [`ComplexLogicalType`] with an owned payload: a
//! sealed enum replaces the original engine's pointer-tagged union, so
//! copies deep-copy heap payloads and moves transfer them. 128-bit
//! integers keep an inline `i128`/`u128` payload; every other scalar
//! fits 64 bits. Composite values own their children.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use tessera_error::{Result, TesseraError};

use crate::logical_type::{
    ComplexLogicalType, LogicalType, TypeExtension, timestamp_rescale,
};

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Owned payload behind the logical-type tag. The tag decides how the
/// payload is interpreted: timestamps and decimals ride in `Int`,
/// pointers in `UInt`, enum ordinals in `Int`. The 128-bit variants
/// serialize as decimal strings so the JSON framing keeps full range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Payload {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Int128(#[serde(with = "int128_str")] i128),
    UInt128(#[serde(with = "uint128_str")] u128),
    Float(f32),
    Double(f64),
    Str(String),
    Bytes(Vec<u8>),
    Nested(Vec<Value>),
}

mod int128_str {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(v: &i128, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i128, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(D::Error::custom)
    }
}

mod uint128_str {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(v: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(D::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// An ownership-aware tagged value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Value {
    ctype: ComplexLogicalType,
    payload: Payload,
}

impl Value {
    /// The null value.
    #[must_use]
    pub fn null() -> Self {
        Self {
            ctype: ComplexLogicalType::new(LogicalType::Na),
            payload: Payload::Null,
        }
    }

    /// A null value carrying a concrete column type.
    #[must_use]
    pub fn null_of(ctype: ComplexLogicalType) -> Self {
        Self {
            ctype,
            payload: Payload::Null,
        }
    }

    #[must_use]
    pub fn boolean(v: bool) -> Self {
        Self::scalar(LogicalType::Boolean, Payload::Bool(v))
    }

    #[must_use]
    pub fn tinyint(v: i8) -> Self {
        Self::scalar(LogicalType::TinyInt, Payload::Int(v as i64))
    }

    #[must_use]
    pub fn smallint(v: i16) -> Self {
        Self::scalar(LogicalType::SmallInt, Payload::Int(v as i64))
    }

    #[must_use]
    pub fn integer(v: i32) -> Self {
        Self::scalar(LogicalType::Integer, Payload::Int(v as i64))
    }

    #[must_use]
    pub fn bigint(v: i64) -> Self {
        Self::scalar(LogicalType::BigInt, Payload::Int(v))
    }

    #[must_use]
    pub fn hugeint(v: i128) -> Self {
        Self::scalar(LogicalType::HugeInt, Payload::Int128(v))
    }

    #[must_use]
    pub fn utinyint(v: u8) -> Self {
        Self::scalar(LogicalType::UTinyInt, Payload::UInt(v as u64))
    }

    #[must_use]
    pub fn usmallint(v: u16) -> Self {
        Self::scalar(LogicalType::USmallInt, Payload::UInt(v as u64))
    }

    #[must_use]
    pub fn uinteger(v: u32) -> Self {
        Self::scalar(LogicalType::UInteger, Payload::UInt(v as u64))
    }

    #[must_use]
    pub fn ubigint(v: u64) -> Self {
        Self::scalar(LogicalType::UBigInt, Payload::UInt(v))
    }

    #[must_use]
    pub fn uhugeint(v: u128) -> Self {
        Self::scalar(LogicalType::UHugeInt, Payload::UInt128(v))
    }

    #[must_use]
    pub fn float(v: f32) -> Self {
        Self::scalar(LogicalType::Float, Payload::Float(v))
    }

    #[must_use]
    pub fn double(v: f64) -> Self {
        Self::scalar(LogicalType::Double, Payload::Double(v))
    }

    #[must_use]
    pub fn string(v: impl Into<String>) -> Self {
        Self::scalar(LogicalType::StringLiteral, Payload::Str(v.into()))
    }

    #[must_use]
    pub fn blob(v: Vec<u8>) -> Self {
        Self::scalar(LogicalType::Blob, Payload::Bytes(v))
    }

    /// An opaque pointer payload; never dereferenced by the engine.
    #[must_use]
    pub fn pointer(v: u64) -> Self {
        Self::scalar(LogicalType::Pointer, Payload::UInt(v))
    }

    /// A timestamp count at the given scale.
    #[must_use]
    pub fn timestamp(scale: LogicalType, count: i64) -> Self {
        debug_assert!(scale.is_temporal());
        Self::scalar(scale, Payload::Int(count))
    }

    /// A decimal with explicit width and scale, stored as `i64`.
    #[must_use]
    pub fn create_decimal(value: i64, width: u8, scale: u8) -> Self {
        Self {
            ctype: ComplexLogicalType::decimal(width, scale),
            payload: Payload::Int(value),
        }
    }

    /// A numeric of `ctype` built from a raw `i64`, used by numeric
    /// literals whose target type is already known.
    #[must_use]
    pub fn create_numeric(ctype: ComplexLogicalType, value: i64) -> Self {
        let payload = match ctype.tag() {
            LogicalType::UTinyInt
            | LogicalType::USmallInt
            | LogicalType::UInteger
            | LogicalType::UBigInt
            | LogicalType::Pointer => Payload::UInt(value as u64),
            LogicalType::HugeInt => Payload::Int128(value as i128),
            LogicalType::UHugeInt => Payload::UInt128(value as u128),
            LogicalType::Float => Payload::Float(value as f32),
            LogicalType::Double => Payload::Double(value as f64),
            _ => Payload::Int(value),
        };
        Self { ctype, payload }
    }

    /// A struct value; field names come from the children's aliases.
    #[must_use]
    pub fn create_struct(fields: Vec<Value>) -> Self {
        let ctype = ComplexLogicalType::struct_(
            fields.iter().map(|f| f.ctype.clone()).collect(),
        );
        Self {
            ctype,
            payload: Payload::Nested(fields),
        }
    }

    /// A fixed-length array of `child_type`.
    #[must_use]
    pub fn create_array(child_type: ComplexLogicalType, values: Vec<Value>) -> Self {
        let ctype = ComplexLogicalType::array(child_type, values.len());
        Self {
            ctype,
            payload: Payload::Nested(values),
        }
    }

    /// A variable-length list of `child_type`.
    #[must_use]
    pub fn create_list(child_type: ComplexLogicalType, values: Vec<Value>) -> Self {
        Self {
            ctype: ComplexLogicalType::list(child_type),
            payload: Payload::Nested(values),
        }
    }

    /// A map; `entries` alternates key, value, key, value.
    #[must_use]
    pub fn create_map(
        key_type: ComplexLogicalType,
        value_type: ComplexLogicalType,
        entries: Vec<Value>,
    ) -> Self {
        debug_assert!(entries.len() % 2 == 0);
        Self {
            ctype: ComplexLogicalType::map(key_type, value_type),
            payload: Payload::Nested(entries),
        }
    }

    /// A union value holding `inner` under variant index `tag`.
    #[must_use]
    pub fn create_union(variants: Vec<ComplexLogicalType>, tag: u8, inner: Value) -> Self {
        Self {
            ctype: ComplexLogicalType::union_(variants),
            payload: Payload::Nested(vec![Value::utinyint(tag), inner]),
        }
    }

    /// A variant value: an untyped ordered bundle.
    #[must_use]
    pub fn create_variant(values: Vec<Value>) -> Self {
        Self {
            ctype: ComplexLogicalType::new(LogicalType::Variant),
            payload: Payload::Nested(values),
        }
    }

    /// An enum value selected by entry key. Unknown keys produce an
    /// error rather than a silent null.
    pub fn create_enum(enum_type: ComplexLogicalType, key: &str) -> Result<Self> {
        let Some(TypeExtension::Enum { entries, .. }) = enum_type.extension() else {
            return Err(TesseraError::invalid("create_enum: type carries no entries"));
        };
        let ordinal = entries
            .iter()
            .find(|e| e.logical_type().alias() == Some(key))
            .and_then(Value::as_i64)
            .ok_or_else(|| TesseraError::invalid(format!("create_enum: no entry {key:?}")))?;
        Ok(Self {
            ctype: enum_type,
            payload: Payload::Int(ordinal),
        })
    }

    /// An enum value selected by ordinal.
    pub fn create_enum_ordinal(enum_type: ComplexLogicalType, ordinal: i32) -> Result<Self> {
        let Some(TypeExtension::Enum { entries, .. }) = enum_type.extension() else {
            return Err(TesseraError::invalid("create_enum: type carries no entries"));
        };
        if !entries.iter().any(|e| e.as_i64() == Some(ordinal as i64)) {
            return Err(TesseraError::invalid(format!(
                "create_enum: no entry with ordinal {ordinal}"
            )));
        }
        Ok(Self {
            ctype: enum_type,
            payload: Payload::Int(ordinal as i64),
        })
    }

    fn scalar(tag: LogicalType, payload: Payload) -> Self {
        Self {
            ctype: ComplexLogicalType::new(tag),
            payload,
        }
    }

    // -- accessors ----------------------------------------------------------

    #[must_use]
    pub fn logical_type(&self) -> &ComplexLogicalType {
        &self.ctype
    }

    #[must_use]
    pub fn tag(&self) -> LogicalType {
        self.ctype.tag()
    }

    pub fn set_alias(&mut self, alias: impl Into<String>) {
        self.ctype.set_alias(alias);
    }

    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.set_alias(alias);
        self
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self.payload, Payload::Null) || self.tag() == LogicalType::Na
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self.payload {
            Payload::Bool(b) => Some(b),
            Payload::Int(i) => Some(i != 0),
            Payload::UInt(u) => Some(u != 0),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self.payload {
            Payload::Int(i) => Some(i),
            Payload::UInt(u) => i64::try_from(u).ok(),
            Payload::Int128(i) => i64::try_from(i).ok(),
            Payload::UInt128(u) => i64::try_from(u).ok(),
            Payload::Bool(b) => Some(b as i64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self.payload {
            Payload::UInt(u) => Some(u),
            Payload::Int(i) => u64::try_from(i).ok(),
            Payload::Int128(i) => u64::try_from(i).ok(),
            Payload::UInt128(u) => u64::try_from(u).ok(),
            Payload::Bool(b) => Some(b as u64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i128(&self) -> Option<i128> {
        match self.payload {
            Payload::Int(i) => Some(i as i128),
            Payload::UInt(u) => Some(u as i128),
            Payload::Int128(i) => Some(i),
            Payload::UInt128(u) => i128::try_from(u).ok(),
            Payload::Bool(b) => Some(b as i128),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u128(&self) -> Option<u128> {
        match self.payload {
            Payload::UInt(u) => Some(u as u128),
            Payload::UInt128(u) => Some(u),
            Payload::Int(i) => u128::try_from(i).ok(),
            Payload::Int128(i) => u128::try_from(i).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self.payload {
            Payload::Float(f) => Some(f as f64),
            Payload::Double(d) => Some(d),
            Payload::Int(i) => Some(i as f64),
            Payload::UInt(u) => Some(u as f64),
            Payload::Int128(i) => Some(i as f64),
            Payload::UInt128(u) => Some(u as f64),
            Payload::Bool(b) => Some(b as u8 as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match &self.payload {
            Payload::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Children of a composite value; empty for scalars.
    #[must_use]
    pub fn children(&self) -> &[Value] {
        match &self.payload {
            Payload::Nested(v) => v,
            _ => &[],
        }
    }

    /// Value rendered as a string, the representation `_id` dedup
    /// compares by. Strings render verbatim, numerics in decimal,
    /// null as `null`.
    #[must_use]
    pub fn str_view(&self) -> String {
        match &self.payload {
            Payload::Null => "null".to_owned(),
            Payload::Bool(b) => b.to_string(),
            Payload::Int(i) => i.to_string(),
            Payload::UInt(u) => u.to_string(),
            Payload::Int128(i) => i.to_string(),
            Payload::UInt128(u) => u.to_string(),
            Payload::Float(f) => f.to_string(),
            Payload::Double(d) => d.to_string(),
            Payload::Str(s) => s.clone(),
            Payload::Bytes(b) => format!("{b:02x?}"),
            Payload::Nested(vs) => {
                let inner: Vec<String> = vs.iter().map(Value::str_view).collect();
                format!("[{}]", inner.join(","))
            }
        }
    }

    // -- casts --------------------------------------------------------------

    /// Cast to `target`. Numeric↔numeric casts range-check, numeric↔
    /// string casts render or parse, timestamps rescale. A failed cast
    /// is a [`TesseraError::TypeError`]; chunk-level promotion maps
    /// that to null per column.
    pub fn cast_as(&self, target: &ComplexLogicalType) -> Result<Value> {
        let from = self.tag();
        let to = target.tag();

        if self.is_null() || to == LogicalType::Na {
            return Ok(Value::null_of(target.clone()));
        }
        if from == to {
            let mut out = self.clone();
            out.ctype = target.clone();
            return Ok(out);
        }

        if from.is_temporal() && to.is_temporal() {
            let count = self.as_i64().unwrap_or(0);
            let (num, den) = timestamp_rescale(from, to);
            let rescaled = (count as i128 * num as i128) / den as i128;
            let count = i64::try_from(rescaled)
                .map_err(|_| self.cast_failure(target))?;
            return Ok(Value {
                ctype: target.clone(),
                payload: Payload::Int(count),
            });
        }

        if from.is_numeric() && to.is_numeric() {
            return self.cast_numeric(target).ok_or_else(|| self.cast_failure(target));
        }

        if to == LogicalType::StringLiteral {
            return Ok(Value {
                ctype: target.clone(),
                payload: Payload::Str(self.str_view()),
            });
        }

        if from == LogicalType::StringLiteral {
            return self
                .parse_string_as(target)
                .ok_or_else(|| self.cast_failure(target));
        }

        // Timestamp counts convert to/from plain integers.
        if from.is_temporal() && to.is_integral() {
            return Value::bigint(self.as_i64().unwrap_or(0)).cast_as(target);
        }
        if from.is_integral() && to.is_temporal() {
            let count = self.as_i64().ok_or_else(|| self.cast_failure(target))?;
            return Ok(Value {
                ctype: target.clone(),
                payload: Payload::Int(count),
            });
        }

        Err(self.cast_failure(target))
    }

    fn cast_failure(&self, target: &ComplexLogicalType) -> TesseraError {
        TesseraError::type_error(format!("{:?}", self.tag()), format!("{:?}", target.tag()))
    }

    fn cast_numeric(&self, target: &ComplexLogicalType) -> Option<Value> {
        let to = target.tag();
        let payload = match to {
            LogicalType::Boolean => Payload::Bool(self.as_bool()?),
            LogicalType::TinyInt => Payload::Int(i64::from(i8::try_from(self.as_i128()?).ok()?)),
            LogicalType::SmallInt => Payload::Int(i64::from(i16::try_from(self.as_i128()?).ok()?)),
            LogicalType::Integer => Payload::Int(i64::from(i32::try_from(self.as_i128()?).ok()?)),
            LogicalType::BigInt | LogicalType::Decimal => {
                Payload::Int(self.float_aware_i64()?)
            }
            LogicalType::HugeInt => Payload::Int128(self.as_i128()?),
            LogicalType::UTinyInt => Payload::UInt(u64::from(u8::try_from(self.as_u128()?).ok()?)),
            LogicalType::USmallInt => {
                Payload::UInt(u64::from(u16::try_from(self.as_u128()?).ok()?))
            }
            LogicalType::UInteger => Payload::UInt(u64::from(u32::try_from(self.as_u128()?).ok()?)),
            LogicalType::UBigInt => Payload::UInt(u64::try_from(self.as_u128()?).ok()?),
            LogicalType::UHugeInt => Payload::UInt128(self.as_u128()?),
            LogicalType::Float => Payload::Float(self.as_f64()? as f32),
            LogicalType::Double => Payload::Double(self.as_f64()?),
            _ => return None,
        };
        Some(Value {
            ctype: target.clone(),
            payload,
        })
    }

    /// Integer view of a possibly-floating payload (truncating), used
    /// when the target is a 64-bit integer.
    fn float_aware_i64(&self) -> Option<i64> {
        match self.payload {
            Payload::Float(f) => {
                if f.is_finite() { Some(f as i64) } else { None }
            }
            Payload::Double(d) => {
                if d.is_finite() { Some(d as i64) } else { None }
            }
            _ => self.as_i64(),
        }
    }

    fn parse_string_as(&self, target: &ComplexLogicalType) -> Option<Value> {
        let s = self.as_str()?.trim();
        let payload = match target.tag() {
            LogicalType::Boolean => Payload::Bool(match s {
                "true" | "TRUE" | "1" => true,
                "false" | "FALSE" | "0" => false,
                _ => return None,
            }),
            LogicalType::TinyInt => Payload::Int(s.parse::<i8>().ok()? as i64),
            LogicalType::SmallInt => Payload::Int(s.parse::<i16>().ok()? as i64),
            LogicalType::Integer => Payload::Int(s.parse::<i32>().ok()? as i64),
            LogicalType::BigInt | LogicalType::Decimal => Payload::Int(s.parse::<i64>().ok()?),
            LogicalType::HugeInt => Payload::Int128(s.parse::<i128>().ok()?),
            LogicalType::UTinyInt => Payload::UInt(s.parse::<u8>().ok()? as u64),
            LogicalType::USmallInt => Payload::UInt(s.parse::<u16>().ok()? as u64),
            LogicalType::UInteger => Payload::UInt(s.parse::<u32>().ok()? as u64),
            LogicalType::UBigInt => Payload::UInt(s.parse::<u64>().ok()?),
            LogicalType::UHugeInt => Payload::UInt128(s.parse::<u128>().ok()?),
            LogicalType::Float => Payload::Float(s.parse::<f32>().ok()?),
            LogicalType::Double => Payload::Double(s.parse::<f64>().ok()?),
            _ => return None,
        };
        Some(Value {
            ctype: target.clone(),
            payload,
        })
    }

    // -- comparison ---------------------------------------------------------

    /// Total order over values. Cross-type numeric and temporal pairs
    /// compare in the promoted type. `Na` orders below everything but
    /// compares equal to `Na`.
    #[must_use]
    pub fn compare(&self, rhs: &Value) -> Ordering {
        match (self.is_null(), rhs.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }

        let lt = self.tag();
        let rt = rhs.tag();

        if lt.is_temporal() && rt.is_temporal() {
            let scale = crate::logical_type::finer_timestamp(lt, rt);
            let (ln, ld) = timestamp_rescale(lt, scale);
            let (rn, rd) = timestamp_rescale(rt, scale);
            let l = self.as_i64().unwrap_or(0) as i128 * ln as i128 / ld as i128;
            let r = rhs.as_i64().unwrap_or(0) as i128 * rn as i128 / rd as i128;
            return l.cmp(&r);
        }

        let numericish =
            |t: LogicalType| t.is_numeric() || t == LogicalType::Boolean || t.is_temporal();
        if numericish(lt) && numericish(rt) {
            return self.compare_numeric(rhs);
        }

        match (&self.payload, &rhs.payload) {
            (Payload::Str(l), Payload::Str(r)) => l.cmp(r),
            (Payload::Bytes(l), Payload::Bytes(r)) => l.cmp(r),
            (Payload::Nested(l), Payload::Nested(r)) => {
                for (a, b) in l.iter().zip(r.iter()) {
                    let ord = a.compare(b);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                l.len().cmp(&r.len())
            }
            // Heterogeneous fallback: order by physical tag so the
            // ordering stays total for index containers.
            _ => (lt.to_physical().index()).cmp(&rt.to_physical().index()),
        }
    }

    fn compare_numeric(&self, rhs: &Value) -> Ordering {
        let float_side = matches!(self.payload, Payload::Float(_) | Payload::Double(_))
            || matches!(rhs.payload, Payload::Float(_) | Payload::Double(_));
        if float_side {
            let l = self.as_f64().unwrap_or(f64::NAN);
            let r = rhs.as_f64().unwrap_or(f64::NAN);
            return l.total_cmp(&r);
        }

        // Integer comparison widened through i128; u128 values beyond
        // the i128 range sort above every signed value.
        match (self.as_i128(), rhs.as_i128()) {
            (Some(l), Some(r)) => l.cmp(&r),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self
                .as_u128()
                .unwrap_or(0)
                .cmp(&rhs.as_u128().unwrap_or(0)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.str_view())
    }
}

// Convenience conversions used pervasively by tests and operators.
macro_rules! impl_from {
    ($($ty:ty => $ctor:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$ctor(v)
            }
        })*
    };
}

impl_from! {
    bool => boolean,
    i8 => tinyint,
    i16 => smallint,
    i32 => integer,
    i64 => bigint,
    i128 => hugeint,
    u8 => utinyint,
    u16 => usmallint,
    u32 => uinteger,
    u64 => ubigint,
    u128 => uhugeint,
    f32 => float,
    f64 => double,
    String => string,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::string(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trips_through_serde() {
        let values = vec![
            Value::null(),
            Value::boolean(true),
            Value::tinyint(-7),
            Value::integer(42),
            Value::bigint(i64::MIN),
            Value::hugeint(i128::MAX),
            Value::uhugeint(u128::MAX),
            Value::double(3.5),
            Value::string("hello"),
            Value::blob(vec![0xde, 0xad]),
            Value::timestamp(LogicalType::TimestampMs, 1_700_000_000_000),
            Value::create_decimal(12345, 10, 2),
        ];
        for v in values {
            let bytes = serde_json::to_vec(&v).unwrap();
            let back: Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(v, back, "round trip failed for {v}");
            assert_eq!(v.tag(), back.tag());
        }
    }

    #[test]
    fn identity_cast_is_identity() {
        let v = Value::integer(19).with_alias("x");
        let cast = v.cast_as(v.logical_type()).unwrap();
        assert_eq!(v, cast);
        assert_eq!(cast.logical_type().alias(), Some("x"));
    }

    #[test]
    fn numeric_casts_range_check() {
        assert_eq!(
            Value::integer(300)
                .cast_as(&LogicalType::TinyInt.into())
                .err()
                .map(|e| e.to_string()),
            Some("type error: cannot convert Integer to TinyInt".to_owned())
        );
        let ok = Value::integer(127).cast_as(&LogicalType::TinyInt.into()).unwrap();
        assert_eq!(ok.as_i64(), Some(127));
    }

    #[test]
    fn string_parses_to_numeric() {
        let v = Value::string(" 42 ").cast_as(&LogicalType::Integer.into()).unwrap();
        assert_eq!(v.as_i64(), Some(42));
        assert!(Value::string("nope").cast_as(&LogicalType::Integer.into()).is_err());
    }

    #[test]
    fn numeric_renders_to_string() {
        let v = Value::bigint(-5).cast_as(&LogicalType::StringLiteral.into()).unwrap();
        assert_eq!(v.as_str(), Some("-5"));
    }

    #[test]
    fn timestamps_rescale() {
        let sec = Value::timestamp(LogicalType::TimestampSec, 2);
        let ms = sec.cast_as(&LogicalType::TimestampMs.into()).unwrap();
        assert_eq!(ms.as_i64(), Some(2000));
        let back = ms.cast_as(&LogicalType::TimestampSec.into()).unwrap();
        assert_eq!(back.as_i64(), Some(2));
    }

    #[test]
    fn cross_type_comparison_promotes() {
        assert_eq!(Value::integer(5).compare(&Value::bigint(5)), Ordering::Equal);
        assert_eq!(Value::integer(5).compare(&Value::double(5.5)), Ordering::Less);
        assert_eq!(
            Value::ubigint(u64::MAX).compare(&Value::bigint(-1)),
            Ordering::Greater
        );
        assert_eq!(
            Value::uhugeint(u128::MAX).compare(&Value::hugeint(i128::MAX)),
            Ordering::Greater
        );
    }

    #[test]
    fn temporal_comparison_converts_scales() {
        let one_sec = Value::timestamp(LogicalType::TimestampSec, 1);
        let same_in_ns = Value::timestamp(LogicalType::TimestampNs, 1_000_000_000);
        assert_eq!(one_sec.compare(&same_in_ns), Ordering::Equal);
        let later_ms = Value::timestamp(LogicalType::TimestampMs, 1001);
        assert_eq!(one_sec.compare(&later_ms), Ordering::Less);
    }

    #[test]
    fn null_is_minimal_but_equal_to_null() {
        assert_eq!(Value::null().compare(&Value::null()), Ordering::Equal);
        assert_eq!(Value::null().compare(&Value::bigint(i64::MIN)), Ordering::Less);
        assert_eq!(Value::string("").compare(&Value::null()), Ordering::Greater);
    }

    #[test]
    fn enum_lookup_by_key_and_ordinal() {
        let entries = vec![
            Value::integer(0).with_alias("red"),
            Value::integer(1).with_alias("green"),
        ];
        let ty = ComplexLogicalType::enum_("color", entries);
        let green = Value::create_enum(ty.clone(), "green").unwrap();
        assert_eq!(green.as_i64(), Some(1));
        assert!(Value::create_enum(ty.clone(), "blue").is_err());
        assert!(Value::create_enum_ordinal(ty, 7).is_err());
    }

    #[test]
    fn struct_children_are_owned() {
        let s = Value::create_struct(vec![
            Value::integer(1).with_alias("a"),
            Value::string("x").with_alias("b"),
        ]);
        assert_eq!(s.children().len(), 2);
        assert_eq!(s.children()[1].as_str(), Some("x"));
        let copy = s.clone();
        drop(s);
        assert_eq!(copy.children()[0].as_i64(), Some(1));
    }

    #[test]
    fn str_view_covers_dedup_inputs() {
        assert_eq!(Value::string("a").str_view(), "a");
        assert_eq!(Value::bigint(12).str_view(), "12");
        assert_eq!(Value::null().str_view(), "null");
    }
}
