//! Vectorized compute kernels, the function registry, and the
//! predicate factory.

pub mod builtins;
pub mod executor;
pub mod function;
pub mod kernel;
pub mod predicate;
pub mod signature;

pub use executor::FunctionExecutor;
pub use function::{
    DEFAULT_FUNCTIONS, Function, FunctionDoc, FunctionOptions, FunctionRegistry, FunctionUid,
    INVALID_FUNCTION_UID,
};
pub use kernel::{AggregateKernel, AggregateState, ExecContext, Kernel, RowKernel, VectorKernel};
pub use predicate::{
    CompareExpr, Operand, ParameterStore, Predicate, Side, compile, typed_compare,
};
pub use signature::{Arity, InputType, KernelSignature, OutputType};

#[cfg(test)]
mod proptests {
    use crate::predicate::typed_compare;
    use proptest::prelude::*;
    use std::cmp::Ordering;
    use tessera_types::Value;

    fn numeric_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i32>().prop_map(Value::integer),
            any::<i64>().prop_map(Value::bigint),
            any::<u64>().prop_map(Value::ubigint),
            (-1.0e9_f64..1.0e9).prop_map(Value::double),
        ]
    }

    proptest! {
        /// The dispatch table agrees with the value system's own
        /// promoted comparison for numeric operands.
        #[test]
        fn table_matches_value_compare(a in numeric_value(), b in numeric_value()) {
            let table = typed_compare(&a, &b);
            let direct = a.compare(&b);
            // Float rounding puts u64::MAX-scale integers on equal
            // footing either way; both paths promote identically for
            // the ranges generated here.
            prop_assert_eq!(table, direct);
        }

        /// Antisymmetry holds through the table.
        #[test]
        fn table_is_antisymmetric(a in numeric_value(), b in numeric_value()) {
            prop_assert_eq!(typed_compare(&a, &b), typed_compare(&b, &a).reverse());
        }

        /// a < b through the table is exclusive with a > b.
        #[test]
        fn orders_are_exclusive(a in numeric_value(), b in numeric_value()) {
            let ord = typed_compare(&a, &b);
            prop_assert!(!(ord == Ordering::Less && ord == Ordering::Greater));
        }
    }
}
