//! Logical types, tagged values, vectors, and column batches for the
//! tessera engine.

pub mod arithmetic;
pub mod chunk;
pub mod column;
pub mod logical_type;
pub mod value;
pub mod vector;

pub use chunk::{DataChunk, VECTOR_CAPACITY};
pub use column::ColumnDefinition;
pub use logical_type::{
    CompareOp, ComplexLogicalType, LogicalType, PhysicalType, TypeExtension, finer_timestamp,
    promote_type, timestamp_rescale,
};
pub use value::Value;
pub use vector::{Validity, Vector, VectorKind, cast_vector};

#[cfg(test)]
mod proptests {
    use crate::logical_type::{ComplexLogicalType, LogicalType, promote_type};
    use crate::value::Value;
    use proptest::prelude::*;
    use std::cmp::Ordering;

    fn numeric_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i8>().prop_map(Value::tinyint),
            any::<i32>().prop_map(Value::integer),
            any::<i64>().prop_map(Value::bigint),
            any::<u32>().prop_map(Value::uinteger),
            any::<u64>().prop_map(Value::ubigint),
            (-1.0e12_f64..1.0e12).prop_map(Value::double),
        ]
    }

    proptest! {
        /// a < b iff b > a, for every numeric pairing.
        #[test]
        fn comparison_is_antisymmetric(a in numeric_value(), b in numeric_value()) {
            let ab = a.compare(&b);
            let ba = b.compare(&a);
            prop_assert_eq!(ab, ba.reverse());
        }

        /// Comparison agrees with comparing both sides cast to the
        /// promoted type.
        #[test]
        fn comparison_agrees_with_promotion(a in numeric_value(), b in numeric_value()) {
            let promoted = promote_type(a.tag(), b.tag()).unwrap();
            let target = ComplexLogicalType::from(promoted);
            // Skip pairs the promoted type cannot represent (range
            // clipped by signed-preference).
            if let (Ok(ca), Ok(cb)) = (a.cast_as(&target), b.cast_as(&target)) {
                if promoted != LogicalType::Float && promoted != LogicalType::Double {
                    prop_assert_eq!(a.compare(&b), ca.compare(&cb));
                }
            }
        }

        /// Serialize/deserialize is the identity.
        #[test]
        fn value_round_trips(a in numeric_value()) {
            let bytes = serde_json::to_vec(&a).unwrap();
            let back: Value = serde_json::from_slice(&bytes).unwrap();
            prop_assert_eq!(a.compare(&back), Ordering::Equal);
        }

        /// Identity cast is the identity.
        #[test]
        fn identity_cast(a in numeric_value()) {
            let cast = a.cast_as(a.logical_type()).unwrap();
            prop_assert_eq!(a.compare(&cast), Ordering::Equal);
        }
    }
}
