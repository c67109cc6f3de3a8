//! Static arithmetic over [`Value`].
//!
//! Binary operations promote unequal numeric operands through
//! [`promote_type`] and re-dispatch in the promoted type. Division and
//! modulus by zero return a typed zero rather than failing. Timestamp
//! durations of differing scales auto-convert to the finer scale.

use tessera_error::{Result, TesseraError};

use crate::logical_type::{ComplexLogicalType, LogicalType, finer_timestamp};
use crate::value::Value;

/// The binary operations the value system exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Sum,
    Subtract,
    Mult,
    Divide,
    Modulus,
    Exponent,
    BitAnd,
    BitOr,
    BitXor,
    ShiftL,
    ShiftR,
}

/// Apply `op` to two values with numeric promotion.
pub fn binary_op(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    if lhs.is_null() || rhs.is_null() {
        return Ok(Value::null());
    }

    let lt = lhs.tag();
    let rt = rhs.tag();

    if lt.is_temporal() && rt.is_temporal() {
        return temporal_op(op, lhs, rhs);
    }

    let promoted = crate::logical_type::promote_type(lt, rt).ok_or_else(|| {
        TesseraError::execution(format!(
            "arithmetic: cannot promote {lt:?} and {rt:?}"
        ))
    })?;
    let target: ComplexLogicalType = promoted.into();
    let l = lhs.cast_as(&target)?;
    let r = rhs.cast_as(&target)?;

    match promoted {
        LogicalType::Float | LogicalType::Double => float_op(op, promoted, &l, &r),
        t if t.is_unsigned() => unsigned_op(op, promoted, &l, &r),
        _ => signed_op(op, promoted, &l, &r),
    }
}

pub fn sum(lhs: &Value, rhs: &Value) -> Result<Value> {
    binary_op(BinaryOp::Sum, lhs, rhs)
}

pub fn subtract(lhs: &Value, rhs: &Value) -> Result<Value> {
    binary_op(BinaryOp::Subtract, lhs, rhs)
}

pub fn mult(lhs: &Value, rhs: &Value) -> Result<Value> {
    binary_op(BinaryOp::Mult, lhs, rhs)
}

pub fn divide(lhs: &Value, rhs: &Value) -> Result<Value> {
    binary_op(BinaryOp::Divide, lhs, rhs)
}

pub fn modulus(lhs: &Value, rhs: &Value) -> Result<Value> {
    binary_op(BinaryOp::Modulus, lhs, rhs)
}

pub fn exponent(lhs: &Value, rhs: &Value) -> Result<Value> {
    binary_op(BinaryOp::Exponent, lhs, rhs)
}

pub fn bit_and(lhs: &Value, rhs: &Value) -> Result<Value> {
    binary_op(BinaryOp::BitAnd, lhs, rhs)
}

pub fn bit_or(lhs: &Value, rhs: &Value) -> Result<Value> {
    binary_op(BinaryOp::BitOr, lhs, rhs)
}

pub fn bit_xor(lhs: &Value, rhs: &Value) -> Result<Value> {
    binary_op(BinaryOp::BitXor, lhs, rhs)
}

pub fn shift_l(lhs: &Value, rhs: &Value) -> Result<Value> {
    binary_op(BinaryOp::ShiftL, lhs, rhs)
}

pub fn shift_r(lhs: &Value, rhs: &Value) -> Result<Value> {
    binary_op(BinaryOp::ShiftR, lhs, rhs)
}

/// Bitwise complement in the value's own integer type.
pub fn bit_not(v: &Value) -> Result<Value> {
    if v.is_null() {
        return Ok(Value::null());
    }
    let tag = v.tag();
    if !tag.is_integral() {
        return Err(TesseraError::execution(format!(
            "bit_not: non-integral operand {tag:?}"
        )));
    }
    if tag.is_unsigned() {
        let raw = v.as_u128().unwrap_or(0);
        rebuild_unsigned(tag, !raw & unsigned_mask(tag))
    } else {
        let raw = v.as_i128().unwrap_or(0);
        rebuild_signed(tag, !raw)
    }
}

/// Absolute value; unsigned operands pass through.
pub fn absolute(v: &Value) -> Result<Value> {
    if v.is_null() {
        return Ok(Value::null());
    }
    let tag = v.tag();
    if tag.is_floating() {
        return rebuild_float(tag, v.as_f64().unwrap_or(0.0).abs());
    }
    if tag.is_unsigned() {
        return Ok(v.clone());
    }
    if tag.is_numeric() {
        return rebuild_signed(tag, v.as_i128().unwrap_or(0).wrapping_abs());
    }
    Err(TesseraError::execution(format!(
        "absolute: non-numeric operand {tag:?}"
    )))
}

/// Square root; always produces `Double`.
pub fn sqr_root(v: &Value) -> Result<Value> {
    unary_float(v, f64::sqrt, "sqr_root")
}

/// Cube root; always produces `Double`.
pub fn cube_root(v: &Value) -> Result<Value> {
    unary_float(v, f64::cbrt, "cube_root")
}

/// Integer factorial; produces `HugeInt`. Negative input is an error.
pub fn factorial(v: &Value) -> Result<Value> {
    if v.is_null() {
        return Ok(Value::null());
    }
    let n = v
        .as_i64()
        .filter(|n| *n >= 0)
        .ok_or_else(|| TesseraError::execution("factorial: negative or non-integer operand"))?;
    let mut acc: i128 = 1;
    for i in 2..=n as i128 {
        acc = acc.checked_mul(i).ok_or_else(|| {
            TesseraError::execution(format!("factorial: overflow at {n}!"))
        })?;
    }
    Ok(Value::hugeint(acc))
}

fn unary_float(v: &Value, f: fn(f64) -> f64, name: &str) -> Result<Value> {
    if v.is_null() {
        return Ok(Value::null());
    }
    let x = v
        .as_f64()
        .ok_or_else(|| TesseraError::execution(format!("{name}: non-numeric operand")))?;
    Ok(Value::double(f(x)))
}

// ---------------------------------------------------------------------------
// Typed dispatch
// ---------------------------------------------------------------------------

fn float_op(op: BinaryOp, tag: LogicalType, l: &Value, r: &Value) -> Result<Value> {
    let a = l.as_f64().unwrap_or(0.0);
    let b = r.as_f64().unwrap_or(0.0);
    let out = match op {
        BinaryOp::Sum => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Mult => a * b,
        BinaryOp::Divide => {
            if b == 0.0 {
                0.0
            } else {
                a / b
            }
        }
        BinaryOp::Modulus => {
            if b == 0.0 {
                0.0
            } else {
                a % b
            }
        }
        BinaryOp::Exponent => a.powf(b),
        _ => {
            return Err(TesseraError::execution(
                "arithmetic: bitwise op on floating operands",
            ));
        }
    };
    rebuild_float(tag, out)
}

fn signed_op(op: BinaryOp, tag: LogicalType, l: &Value, r: &Value) -> Result<Value> {
    let a = l.as_i128().unwrap_or(0);
    let b = r.as_i128().unwrap_or(0);
    let out = match op {
        BinaryOp::Sum => a.wrapping_add(b),
        BinaryOp::Subtract => a.wrapping_sub(b),
        BinaryOp::Mult => a.wrapping_mul(b),
        BinaryOp::Divide => {
            if b == 0 {
                0
            } else {
                a.wrapping_div(b)
            }
        }
        BinaryOp::Modulus => {
            if b == 0 {
                0
            } else {
                a.wrapping_rem(b)
            }
        }
        BinaryOp::Exponent => a.checked_pow(u32::try_from(b).unwrap_or(0)).unwrap_or(0),
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        BinaryOp::ShiftL => a.wrapping_shl(u32::try_from(b).unwrap_or(0)),
        BinaryOp::ShiftR => a.wrapping_shr(u32::try_from(b).unwrap_or(0)),
    };
    rebuild_signed(tag, out)
}

fn unsigned_op(op: BinaryOp, tag: LogicalType, l: &Value, r: &Value) -> Result<Value> {
    let a = l.as_u128().unwrap_or(0);
    let b = r.as_u128().unwrap_or(0);
    let out = match op {
        BinaryOp::Sum => a.wrapping_add(b),
        BinaryOp::Subtract => a.wrapping_sub(b),
        BinaryOp::Mult => a.wrapping_mul(b),
        BinaryOp::Divide => {
            if b == 0 {
                0
            } else {
                a / b
            }
        }
        BinaryOp::Modulus => {
            if b == 0 {
                0
            } else {
                a % b
            }
        }
        BinaryOp::Exponent => a.checked_pow(u32::try_from(b).unwrap_or(0)).unwrap_or(0),
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        BinaryOp::ShiftL => a.wrapping_shl(u32::try_from(b).unwrap_or(0)),
        BinaryOp::ShiftR => a.wrapping_shr(u32::try_from(b).unwrap_or(0)),
    };
    rebuild_unsigned(tag, out & unsigned_mask(tag))
}

fn temporal_op(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    let scale = finer_timestamp(lhs.tag(), rhs.tag());
    let target: ComplexLogicalType = scale.into();
    let a = lhs.cast_as(&target)?.as_i64().unwrap_or(0);
    let b = rhs.cast_as(&target)?.as_i64().unwrap_or(0);
    let out = match op {
        BinaryOp::Sum => a.wrapping_add(b),
        BinaryOp::Subtract => a.wrapping_sub(b),
        _ => {
            return Err(TesseraError::execution(
                "arithmetic: only sum/subtract defined for durations",
            ));
        }
    };
    Ok(Value::timestamp(scale, out))
}

fn rebuild_signed(tag: LogicalType, raw: i128) -> Result<Value> {
    Ok(match tag {
        LogicalType::TinyInt => Value::tinyint(raw as i8),
        LogicalType::SmallInt => Value::smallint(raw as i16),
        LogicalType::Integer => Value::integer(raw as i32),
        LogicalType::BigInt => Value::bigint(raw as i64),
        LogicalType::HugeInt => Value::hugeint(raw),
        LogicalType::Decimal => Value::bigint(raw as i64),
        _ => return Err(TesseraError::execution("arithmetic: bad signed rebuild")),
    })
}

fn rebuild_unsigned(tag: LogicalType, raw: u128) -> Result<Value> {
    Ok(match tag {
        LogicalType::UTinyInt => Value::utinyint(raw as u8),
        LogicalType::USmallInt => Value::usmallint(raw as u16),
        LogicalType::UInteger => Value::uinteger(raw as u32),
        LogicalType::UBigInt => Value::ubigint(raw as u64),
        LogicalType::UHugeInt => Value::uhugeint(raw),
        _ => return Err(TesseraError::execution("arithmetic: bad unsigned rebuild")),
    })
}

fn rebuild_float(tag: LogicalType, raw: f64) -> Result<Value> {
    Ok(match tag {
        LogicalType::Float => Value::float(raw as f32),
        LogicalType::Double => Value::double(raw),
        _ => return Err(TesseraError::execution("arithmetic: bad float rebuild")),
    })
}

const fn unsigned_mask(tag: LogicalType) -> u128 {
    match tag {
        LogicalType::UTinyInt => u8::MAX as u128,
        LogicalType::USmallInt => u16::MAX as u128,
        LogicalType::UInteger => u32::MAX as u128,
        LogicalType::UBigInt => u64::MAX as u128,
        _ => u128::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_widths_promote_before_computing() {
        let out = sum(&Value::integer(3), &Value::bigint(4)).unwrap();
        assert_eq!(out.tag(), LogicalType::BigInt);
        assert_eq!(out.as_i64(), Some(7));
    }

    #[test]
    fn float_side_forces_float_result() {
        let out = mult(&Value::integer(3), &Value::double(0.5)).unwrap();
        assert_eq!(out.tag(), LogicalType::Double);
        assert_eq!(out.as_f64(), Some(1.5));
    }

    #[test]
    fn divide_by_zero_is_typed_zero() {
        let out = divide(&Value::bigint(10), &Value::bigint(0)).unwrap();
        assert_eq!(out.tag(), LogicalType::BigInt);
        assert_eq!(out.as_i64(), Some(0));

        let out = modulus(&Value::double(10.0), &Value::double(0.0)).unwrap();
        assert_eq!(out.as_f64(), Some(0.0));
    }

    #[test]
    fn null_operand_yields_null() {
        assert!(sum(&Value::null(), &Value::bigint(1)).unwrap().is_null());
    }

    #[test]
    fn durations_auto_convert_scales() {
        let sec = Value::timestamp(LogicalType::TimestampSec, 1);
        let ms = Value::timestamp(LogicalType::TimestampMs, 500);
        let out = sum(&sec, &ms).unwrap();
        assert_eq!(out.tag(), LogicalType::TimestampMs);
        assert_eq!(out.as_i64(), Some(1500));
    }

    #[test]
    fn bitwise_rejects_floats() {
        assert!(bit_and(&Value::double(1.0), &Value::double(2.0)).is_err());
        let out = bit_and(&Value::integer(0b1100), &Value::integer(0b1010)).unwrap();
        assert_eq!(out.as_i64(), Some(0b1000));
    }

    #[test]
    fn shifts_and_not_stay_in_width() {
        let out = shift_l(&Value::utinyint(0x81), &Value::utinyint(1)).unwrap();
        assert_eq!(out.as_u64(), Some(0x02));
        let out = bit_not(&Value::utinyint(0x0f)).unwrap();
        assert_eq!(out.as_u64(), Some(0xf0));
    }

    #[test]
    fn unary_helpers() {
        assert_eq!(absolute(&Value::integer(-9)).unwrap().as_i64(), Some(9));
        assert_eq!(sqr_root(&Value::double(9.0)).unwrap().as_f64(), Some(3.0));
        assert_eq!(factorial(&Value::integer(5)).unwrap().as_i128(), Some(120));
        assert!(factorial(&Value::integer(-1)).is_err());
    }

    #[test]
    fn exponent_in_integers() {
        let out = exponent(&Value::integer(2), &Value::integer(10)).unwrap();
        assert_eq!(out.as_i64(), Some(1024));
    }
}
