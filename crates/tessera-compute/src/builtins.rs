//! Built-in aggregate functions: `sum`, `min`, `max`, `count`, `avg`.
//!
//! All five are unary aggregates. `sum`, `min`, `max`, and `avg`
//! require a numeric input; `count` accepts anything and yields
//! `UBIGINT`. Empty input: `sum` folds to the typed zero, `count` to
//! zero, the rest stay null.

use tessera_error::Result;
use tessera_types::{ComplexLogicalType, LogicalType, Value, Vector, arithmetic};

use crate::function::{Function, FunctionDoc, FunctionRegistry};
use crate::kernel::{AggregateKernel, AggregateState, ExecContext, Kernel};
use crate::signature::{Arity, InputType, KernelSignature, OutputType};

/// Register the built-ins in their fixed uid order
/// `[sum=0, min=1, max=2, count=3, avg=4]`.
pub fn register_default_functions(registry: &mut FunctionRegistry) {
    registry.add_function(sum_function());
    registry.add_function(min_function());
    registry.add_function(max_function());
    registry.add_function(count_function());
    registry.add_function(avg_function());
}

fn unary_aggregate(name: &str, summary: &str, kernel: AggregateKernel) -> Function {
    let mut f = Function::new(
        name,
        Arity::unary(),
        FunctionDoc {
            summary: summary.to_owned(),
            description: String::new(),
            arg_names: vec!["value".to_owned()],
            options_required: false,
        },
    );
    f.add_kernel(Kernel::Aggregate(kernel)).expect("unary kernel");
    f
}

fn numeric_signature(output: OutputType) -> KernelSignature {
    KernelSignature::new(vec![InputType::Numeric], output)
}

fn typed_zero(t: &ComplexLogicalType) -> Value {
    match t.tag() {
        LogicalType::Float => Value::float(0.0),
        LogicalType::Double => Value::double(0.0),
        LogicalType::HugeInt => Value::hugeint(0),
        LogicalType::UHugeInt => Value::uhugeint(0),
        _ => Value::create_numeric(t.clone(), 0),
    }
}

// -- sum --------------------------------------------------------------------

fn sum_init(_ctx: &ExecContext, inputs: &[ComplexLogicalType]) -> Result<AggregateState> {
    let t = inputs.first().cloned().unwrap_or(LogicalType::BigInt.into());
    Ok(AggregateState {
        acc: typed_zero(&t),
        count: 0,
    })
}

fn sum_consume(
    _ctx: &ExecContext,
    state: &mut AggregateState,
    input: &Vector,
    n: usize,
) -> Result<()> {
    for value in input.iter(n) {
        if value.is_null() {
            continue;
        }
        state.acc = arithmetic::sum(&state.acc, &value)?;
        state.count += 1;
    }
    Ok(())
}

fn sum_merge(_ctx: &ExecContext, from: AggregateState, into: &mut AggregateState) -> Result<()> {
    into.acc = arithmetic::sum(&into.acc, &from.acc)?;
    into.count += from.count;
    Ok(())
}

fn sum_finalize(_ctx: &ExecContext, state: AggregateState) -> Result<Value> {
    Ok(state.acc)
}

fn sum_function() -> Function {
    unary_aggregate(
        "sum",
        "Sum of a numeric column",
        AggregateKernel {
            signature: numeric_signature(OutputType::same_as_first()),
            init: sum_init,
            consume: sum_consume,
            merge: sum_merge,
            finalize: sum_finalize,
        },
    )
}

// -- min / max --------------------------------------------------------------

fn extremum_init(_ctx: &ExecContext, _inputs: &[ComplexLogicalType]) -> Result<AggregateState> {
    Ok(AggregateState {
        acc: Value::null(),
        count: 0,
    })
}

fn min_consume(
    _ctx: &ExecContext,
    state: &mut AggregateState,
    input: &Vector,
    n: usize,
) -> Result<()> {
    for value in input.iter(n) {
        if value.is_null() {
            continue;
        }
        if state.acc.is_null() || value < state.acc {
            state.acc = value;
        }
        state.count += 1;
    }
    Ok(())
}

fn max_consume(
    _ctx: &ExecContext,
    state: &mut AggregateState,
    input: &Vector,
    n: usize,
) -> Result<()> {
    for value in input.iter(n) {
        if value.is_null() {
            continue;
        }
        if state.acc.is_null() || value > state.acc {
            state.acc = value;
        }
        state.count += 1;
    }
    Ok(())
}

fn min_merge(_ctx: &ExecContext, from: AggregateState, into: &mut AggregateState) -> Result<()> {
    if !from.acc.is_null() && (into.acc.is_null() || from.acc < into.acc) {
        into.acc = from.acc;
    }
    into.count += from.count;
    Ok(())
}

fn max_merge(_ctx: &ExecContext, from: AggregateState, into: &mut AggregateState) -> Result<()> {
    if !from.acc.is_null() && (into.acc.is_null() || from.acc > into.acc) {
        into.acc = from.acc;
    }
    into.count += from.count;
    Ok(())
}

fn extremum_finalize(_ctx: &ExecContext, state: AggregateState) -> Result<Value> {
    Ok(state.acc)
}

fn min_function() -> Function {
    unary_aggregate(
        "min",
        "Smallest value of a numeric column",
        AggregateKernel {
            signature: numeric_signature(OutputType::same_as_first()),
            init: extremum_init,
            consume: min_consume,
            merge: min_merge,
            finalize: extremum_finalize,
        },
    )
}

fn max_function() -> Function {
    unary_aggregate(
        "max",
        "Largest value of a numeric column",
        AggregateKernel {
            signature: numeric_signature(OutputType::same_as_first()),
            init: extremum_init,
            consume: max_consume,
            merge: max_merge,
            finalize: extremum_finalize,
        },
    )
}

// -- count ------------------------------------------------------------------

fn count_init(_ctx: &ExecContext, _inputs: &[ComplexLogicalType]) -> Result<AggregateState> {
    Ok(AggregateState {
        acc: Value::ubigint(0),
        count: 0,
    })
}

fn count_consume(
    _ctx: &ExecContext,
    state: &mut AggregateState,
    input: &Vector,
    n: usize,
) -> Result<()> {
    for value in input.iter(n) {
        if !value.is_null() {
            state.count += 1;
        }
    }
    Ok(())
}

fn count_merge(_ctx: &ExecContext, from: AggregateState, into: &mut AggregateState) -> Result<()> {
    into.count += from.count;
    Ok(())
}

fn count_finalize(_ctx: &ExecContext, state: AggregateState) -> Result<Value> {
    Ok(Value::ubigint(state.count))
}

fn count_function() -> Function {
    unary_aggregate(
        "count",
        "Number of non-null values",
        AggregateKernel {
            signature: KernelSignature::new(
                vec![InputType::Any],
                OutputType::Fixed(LogicalType::UBigInt.into()),
            ),
            init: count_init,
            consume: count_consume,
            merge: count_merge,
            finalize: count_finalize,
        },
    )
}

// -- avg --------------------------------------------------------------------

fn avg_init(_ctx: &ExecContext, _inputs: &[ComplexLogicalType]) -> Result<AggregateState> {
    Ok(AggregateState {
        acc: Value::double(0.0),
        count: 0,
    })
}

fn avg_consume(
    _ctx: &ExecContext,
    state: &mut AggregateState,
    input: &Vector,
    n: usize,
) -> Result<()> {
    for value in input.iter(n) {
        if value.is_null() {
            continue;
        }
        state.acc = arithmetic::sum(&state.acc, &value)?;
        state.count += 1;
    }
    Ok(())
}

/// Merge sums both the running totals and the counts; finalize divides.
fn avg_merge(_ctx: &ExecContext, from: AggregateState, into: &mut AggregateState) -> Result<()> {
    into.acc = arithmetic::sum(&into.acc, &from.acc)?;
    into.count += from.count;
    Ok(())
}

fn avg_finalize(_ctx: &ExecContext, state: AggregateState) -> Result<Value> {
    if state.count == 0 {
        return Ok(Value::null());
    }
    arithmetic::divide(&state.acc, &Value::double(state.count as f64))
}

fn avg_function() -> Function {
    unary_aggregate(
        "avg",
        "Arithmetic mean of a numeric column",
        AggregateKernel {
            signature: numeric_signature(OutputType::Fixed(LogicalType::Double.into())),
            init: avg_init,
            consume: avg_consume,
            merge: avg_merge,
            finalize: avg_finalize,
        },
    )
}
