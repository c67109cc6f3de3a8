//! The predicate factory.
//!
//! Compiles a compare-expression tree into a callable
//! `check(left_chunk, right_chunk, left_row, right_row) -> bool`.
//! Comparisons go through a two-dimensional comparator table indexed
//! by the operands' physical types; logical nodes recurse; function
//! calls evaluate through the registry; arithmetic sub-expressions
//! fold through the value system's static operations.

use std::cmp::Ordering;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use regex::Regex;
use tracing::warn;

use tessera_error::{Result, TesseraError};
use tessera_types::arithmetic::{self, BinaryOp};
use tessera_types::{CompareOp, DataChunk, PhysicalType, Value};

use crate::executor::FunctionExecutor;
use crate::function::{FunctionRegistry, FunctionUid};
use crate::kernel::ExecContext;

// ---------------------------------------------------------------------------
// Expression tree
// ---------------------------------------------------------------------------

/// Which chunk a column path reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// A leaf or sub-expression inside a comparison.
#[derive(Debug, Clone)]
pub enum Operand {
    /// Column read by alias; the side may be deduced at evaluation
    /// time when the tree does not carry it.
    Column {
        path: String,
        side: Option<Side>,
    },
    /// Parameter bound by id before compilation.
    Parameter(usize),
    Constant(Value),
    /// Arithmetic sub-expression folded via the value system.
    Arithmetic {
        op: BinaryOp,
        left: Box<Operand>,
        right: Box<Operand>,
    },
    /// Registered function call; the boolean result feeds the
    /// surrounding predicate.
    FunctionCall {
        uid: FunctionUid,
        args: Vec<Operand>,
    },
}

impl Operand {
    #[must_use]
    pub fn column(path: impl Into<String>) -> Self {
        Self::Column {
            path: path.into(),
            side: None,
        }
    }

    #[must_use]
    pub fn column_on(path: impl Into<String>, side: Side) -> Self {
        Self::Column {
            path: path.into(),
            side: Some(side),
        }
    }
}

/// The compare-expression tree the factory compiles.
#[derive(Debug, Clone)]
pub enum CompareExpr {
    And(Vec<CompareExpr>),
    Or(Vec<CompareExpr>),
    Not(Box<CompareExpr>),
    Compare {
        op: CompareOp,
        left: Operand,
        right: Operand,
    },
    /// Left string matched against `.*<pattern>.*`.
    Regex {
        left: Operand,
        pattern: String,
    },
    /// Bare function call used as a boolean predicate.
    Call(Operand),
}

/// Parameter storage the planner fills before compilation.
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    values: HashMap<usize, Value>,
}

impl ParameterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: usize, value: Value) {
        self.values.insert(id, value);
    }

    #[must_use]
    pub fn get(&self, id: usize) -> Option<&Value> {
        self.values.get(&id)
    }
}

/// A compiled predicate closure.
pub type Predicate = Arc<dyn Fn(&DataChunk, &DataChunk, usize, usize) -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// Comparator dispatch table
// ---------------------------------------------------------------------------

type CmpFn = fn(&Value, &Value) -> Ordering;

fn cmp_bool(l: &Value, r: &Value) -> Ordering {
    l.as_bool().cmp(&r.as_bool())
}

fn cmp_signed(l: &Value, r: &Value) -> Ordering {
    l.as_i128().cmp(&r.as_i128())
}

fn cmp_unsigned(l: &Value, r: &Value) -> Ordering {
    l.as_u128().cmp(&r.as_u128())
}

fn cmp_float(l: &Value, r: &Value) -> Ordering {
    l.as_f64()
        .unwrap_or(f64::NAN)
        .total_cmp(&r.as_f64().unwrap_or(f64::NAN))
}

fn cmp_string(l: &Value, r: &Value) -> Ordering {
    l.as_str().cmp(&r.as_str())
}

fn cmp_bytes(l: &Value, r: &Value) -> Ordering {
    l.as_bytes().cmp(&r.as_bytes())
}

/// Fallback: the value system's own promoted comparison.
fn cmp_general(l: &Value, r: &Value) -> Ordering {
    l.compare(r)
}

const fn physical_class(t: PhysicalType) -> u8 {
    match t {
        PhysicalType::Bool => 0,
        PhysicalType::Int8
        | PhysicalType::Int16
        | PhysicalType::Int32
        | PhysicalType::Int64
        | PhysicalType::Int128 => 1,
        PhysicalType::UInt8
        | PhysicalType::UInt16
        | PhysicalType::UInt32
        | PhysicalType::UInt64
        | PhysicalType::UInt128 => 2,
        PhysicalType::Float32 | PhysicalType::Float64 => 3,
        PhysicalType::String => 4,
        PhysicalType::Bytes => 5,
        _ => 6,
    }
}

const fn comparator_for(l: PhysicalType, r: PhysicalType) -> CmpFn {
    match (physical_class(l), physical_class(r)) {
        (0, 0) => cmp_bool,
        (1, 1) => cmp_signed,
        (2, 2) => cmp_unsigned,
        // Mixed signedness widens through the general path.
        (1, 2) | (2, 1) => cmp_general,
        (3, 1 | 2 | 3) | (1 | 2, 3) => cmp_float,
        (4, 4) => cmp_string,
        (5, 5) => cmp_bytes,
        _ => cmp_general,
    }
}

const PHYSICAL_TYPES: [PhysicalType; PhysicalType::COUNT] = [
    PhysicalType::Bool,
    PhysicalType::Int8,
    PhysicalType::Int16,
    PhysicalType::Int32,
    PhysicalType::Int64,
    PhysicalType::Int128,
    PhysicalType::UInt8,
    PhysicalType::UInt16,
    PhysicalType::UInt32,
    PhysicalType::UInt64,
    PhysicalType::UInt128,
    PhysicalType::Float32,
    PhysicalType::Float64,
    PhysicalType::String,
    PhysicalType::Bytes,
    PhysicalType::Nested,
    PhysicalType::Na,
];

/// The full `(left, right)` comparator table, built once at compile
/// time.
static COMPARATORS: [[CmpFn; PhysicalType::COUNT]; PhysicalType::COUNT] = {
    let mut table = [[cmp_general as CmpFn; PhysicalType::COUNT]; PhysicalType::COUNT];
    let mut l = 0;
    while l < PhysicalType::COUNT {
        let mut r = 0;
        while r < PhysicalType::COUNT {
            table[l][r] = comparator_for(PHYSICAL_TYPES[l], PHYSICAL_TYPES[r]);
            r += 1;
        }
        l += 1;
    }
    table
};

/// Compare two values through the physical-type table.
#[must_use]
pub fn typed_compare(l: &Value, r: &Value) -> Ordering {
    if l.is_null() || r.is_null() {
        return cmp_general(l, r);
    }
    let lf = l.logical_type().to_physical().index();
    let rf = r.logical_type().to_physical().index();
    COMPARATORS[lf][rf](l, r)
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Compile `expr` into a reusable predicate closure. Parameters are
/// resolved now; column sides without an annotation are deduced per
/// row at evaluation time.
pub fn compile(
    expr: &CompareExpr,
    params: &ParameterStore,
    registry: &Arc<RwLock<FunctionRegistry>>,
) -> Result<Predicate> {
    match expr {
        CompareExpr::And(children) => {
            let compiled: Vec<Predicate> = children
                .iter()
                .map(|c| compile(c, params, registry))
                .collect::<Result<_>>()?;
            Ok(Arc::new(move |l, r, lr, rr| {
                compiled.iter().all(|p| p(l, r, lr, rr))
            }))
        }
        CompareExpr::Or(children) => {
            let compiled: Vec<Predicate> = children
                .iter()
                .map(|c| compile(c, params, registry))
                .collect::<Result<_>>()?;
            Ok(Arc::new(move |l, r, lr, rr| {
                compiled.iter().any(|p| p(l, r, lr, rr))
            }))
        }
        CompareExpr::Not(child) => {
            let compiled = compile(child, params, registry)?;
            Ok(Arc::new(move |l, r, lr, rr| !compiled(l, r, lr, rr)))
        }
        CompareExpr::Compare { op, left, right } => {
            let op = *op;
            let left = left.clone();
            let right = right.clone();
            let params = params.clone();
            let registry = Arc::clone(registry);
            Ok(Arc::new(move |lc, rc, lr, rr| {
                let (Some(a), Some(b)) = (
                    eval_operand(&left, lc, rc, lr, rr, &params, &registry),
                    eval_operand(&right, lc, rc, lr, rr, &params, &registry),
                ) else {
                    return false;
                };
                op.matches(typed_compare(&a, &b))
            }))
        }
        CompareExpr::Regex { left, pattern } => {
            let matcher = Regex::new(&format!(".*{pattern}.*"))
                .map_err(|e| TesseraError::invalid(format!("regex predicate: {e}")))?;
            let left = left.clone();
            let params = params.clone();
            let registry = Arc::clone(registry);
            Ok(Arc::new(move |lc, rc, lr, rr| {
                let Some(value) = eval_operand(&left, lc, rc, lr, rr, &params, &registry) else {
                    return false;
                };
                // Non-string sides never match.
                value.as_str().is_some_and(|s| matcher.is_match(s))
            }))
        }
        CompareExpr::Call(operand) => {
            let operand = operand.clone();
            let params = params.clone();
            let registry = Arc::clone(registry);
            Ok(Arc::new(move |lc, rc, lr, rr| {
                eval_operand(&operand, lc, rc, lr, rr, &params, &registry)
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false)
            }))
        }
    }
}

/// Resolve an operand to a value for one row pair. `None` poisons the
/// enclosing comparison to `false`.
fn eval_operand(
    operand: &Operand,
    left_chunk: &DataChunk,
    right_chunk: &DataChunk,
    left_row: usize,
    right_row: usize,
    params: &ParameterStore,
    registry: &Arc<RwLock<FunctionRegistry>>,
) -> Option<Value> {
    match operand {
        Operand::Constant(v) => Some(v.clone()),
        Operand::Parameter(id) => params.get(*id).cloned(),
        Operand::Column { path, side } => {
            let side = (*side).or_else(|| deduce_side(path, left_chunk, right_chunk))?;
            let (chunk, row) = match side {
                Side::Left => (left_chunk, left_row),
                Side::Right => (right_chunk, right_row),
            };
            let col = chunk.column_index(path)?;
            let value = chunk.value(col, row);
            if value.is_null() { None } else { Some(value) }
        }
        Operand::Arithmetic { op, left, right } => {
            let a = eval_operand(left, left_chunk, right_chunk, left_row, right_row, params, registry)?;
            let b = eval_operand(right, left_chunk, right_chunk, left_row, right_row, params, registry)?;
            arithmetic::binary_op(*op, &a, &b).ok()
        }
        Operand::FunctionCall { uid, args } => {
            let values: Vec<Value> = args
                .iter()
                .map(|a| {
                    eval_operand(a, left_chunk, right_chunk, left_row, right_row, params, registry)
                })
                .collect::<Option<_>>()?;
            call_function(*uid, &values, registry)
        }
    }
}

/// Pick the side owning `path`: the left chunk wins ties; a path
/// neither chunk carries leaves the comparison false.
fn deduce_side(path: &str, left: &DataChunk, right: &DataChunk) -> Option<Side> {
    if left.column_index(path).is_some() {
        Some(Side::Left)
    } else if right.column_index(path).is_some() {
        Some(Side::Right)
    } else {
        None
    }
}

fn call_function(
    uid: FunctionUid,
    args: &[Value],
    registry: &Arc<RwLock<FunctionRegistry>>,
) -> Option<Value> {
    let guard = registry.read();
    let function = guard.get(uid)?;
    let types: Vec<_> = args.iter().map(|v| v.logical_type().clone()).collect();
    let mut chunk = DataChunk::new(&types, 1);
    chunk.append_row(args).ok()?;
    let ctx = ExecContext::new(Arc::clone(registry));
    let mut executor = match FunctionExecutor::try_new(function, &types, ctx) {
        Ok(e) => e,
        Err(e) => {
            warn!(uid, error = %e, "predicate function dispatch failed");
            return None;
        }
    };
    executor.init(None).ok()?;
    let out = executor.execute(&chunk, 1).ok()?;
    Some(out.value(0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::{ComplexLogicalType, LogicalType, VECTOR_CAPACITY};

    fn users_chunk() -> DataChunk {
        let types = vec![
            ComplexLogicalType::from(LogicalType::Integer).with_alias("x"),
            ComplexLogicalType::from(LogicalType::StringLiteral).with_alias("name"),
        ];
        let mut chunk = DataChunk::new(&types, VECTOR_CAPACITY);
        chunk
            .append_row(&[Value::integer(5), Value::string("alice")])
            .unwrap();
        chunk
            .append_row(&[Value::integer(9), Value::string("roberta")])
            .unwrap();
        chunk
    }

    fn registry() -> Arc<RwLock<FunctionRegistry>> {
        Arc::new(RwLock::new(FunctionRegistry::with_builtins()))
    }

    fn check(expr: &CompareExpr, chunk: &DataChunk, row: usize) -> bool {
        let compiled = compile(expr, &ParameterStore::new(), &registry()).unwrap();
        compiled(chunk, chunk, row, row)
    }

    fn x_gt(value: i32) -> CompareExpr {
        CompareExpr::Compare {
            op: CompareOp::Gt,
            left: Operand::column("x"),
            right: Operand::Constant(Value::integer(value)),
        }
    }

    #[test]
    fn comparison_with_constant() {
        let chunk = users_chunk();
        assert!(!check(&x_gt(7), &chunk, 0));
        assert!(check(&x_gt(7), &chunk, 1));
    }

    #[test]
    fn cross_type_comparison_goes_through_the_table() {
        let chunk = users_chunk();
        let expr = CompareExpr::Compare {
            op: CompareOp::Lt,
            left: Operand::column("x"),
            right: Operand::Constant(Value::double(5.5)),
        };
        assert!(check(&expr, &chunk, 0));
        assert!(!check(&expr, &chunk, 1));
    }

    #[test]
    fn logical_nodes_decompose() {
        let chunk = users_chunk();
        let p = x_gt(4);
        let q = x_gt(7);
        for row in 0..chunk.cardinality() {
            let and = check(
                &CompareExpr::And(vec![p.clone(), q.clone()]),
                &chunk,
                row,
            );
            assert_eq!(and, check(&p, &chunk, row) && check(&q, &chunk, row));
            let or = check(&CompareExpr::Or(vec![p.clone(), q.clone()]), &chunk, row);
            assert_eq!(or, check(&p, &chunk, row) || check(&q, &chunk, row));
            let not = check(&CompareExpr::Not(Box::new(p.clone())), &chunk, row);
            assert_eq!(not, !check(&p, &chunk, row));
        }
    }

    #[test]
    fn regex_matches_substrings_only_on_strings() {
        let chunk = users_chunk();
        let on_name = CompareExpr::Regex {
            left: Operand::column("name"),
            pattern: "ober".into(),
        };
        assert!(!check(&on_name, &chunk, 0));
        assert!(check(&on_name, &chunk, 1));

        let on_int = CompareExpr::Regex {
            left: Operand::column("x"),
            pattern: "5".into(),
        };
        assert!(!check(&on_int, &chunk, 0));
    }

    #[test]
    fn parameters_bind_by_id() {
        let chunk = users_chunk();
        let mut params = ParameterStore::new();
        params.set(1, Value::integer(6));
        let expr = CompareExpr::Compare {
            op: CompareOp::Gt,
            left: Operand::column("x"),
            right: Operand::Parameter(1),
        };
        let compiled = compile(&expr, &params, &registry()).unwrap();
        assert!(!compiled(&chunk, &chunk, 0, 0));
        assert!(compiled(&chunk, &chunk, 1, 1));
    }

    #[test]
    fn arithmetic_subexpressions_fold() {
        let chunk = users_chunk();
        // x * 2 >= 10
        let expr = CompareExpr::Compare {
            op: CompareOp::Gte,
            left: Operand::Arithmetic {
                op: BinaryOp::Mult,
                left: Box::new(Operand::column("x")),
                right: Box::new(Operand::Constant(Value::integer(2))),
            },
            right: Operand::Constant(Value::integer(10)),
        };
        assert!(check(&expr, &chunk, 0));
        assert!(check(&expr, &chunk, 1));
    }

    #[test]
    fn undeducible_side_is_false() {
        let chunk = users_chunk();
        let expr = CompareExpr::Compare {
            op: CompareOp::Eq,
            left: Operand::column("no_such_column"),
            right: Operand::Constant(Value::integer(1)),
        };
        assert!(!check(&expr, &chunk, 0));
    }

    #[test]
    fn sides_resolve_across_two_chunks() {
        let left = users_chunk();
        let types = vec![ComplexLogicalType::from(LogicalType::Integer).with_alias("limit")];
        let mut right = DataChunk::new(&types, VECTOR_CAPACITY);
        right.append_row(&[Value::integer(6)]).unwrap();

        let expr = CompareExpr::Compare {
            op: CompareOp::Lt,
            left: Operand::column("x"),
            right: Operand::column("limit"),
        };
        let compiled = compile(&expr, &ParameterStore::new(), &registry()).unwrap();
        assert!(compiled(&left, &right, 0, 0)); // 5 < 6
        assert!(!compiled(&left, &right, 1, 0)); // 9 < 6
    }

    #[test]
    fn explicit_sides_override_deduction() {
        let chunk = users_chunk();
        let expr = CompareExpr::Compare {
            op: CompareOp::Eq,
            left: Operand::column_on("x", Side::Left),
            right: Operand::column_on("x", Side::Right),
        };
        let compiled = compile(&expr, &ParameterStore::new(), &registry()).unwrap();
        assert!(compiled(&chunk, &chunk, 0, 0));
        assert!(!compiled(&chunk, &chunk, 0, 1));
    }
}
