//! The function executor.
//!
//! Built per call from a function and the kernel chosen by dispatch.
//! Vector kernels run batch-by-batch into result vectors; aggregate
//! kernels fold every batch into one state (merging per-chunk states)
//! and finalize into a single-row chunk.

use tessera_error::{Result, TesseraError};
use tessera_types::{ComplexLogicalType, DataChunk, Value, Vector};

use crate::function::{Function, FunctionOptions};
use crate::kernel::{AggregateState, ExecContext, Kernel};

/// Drives one function invocation to completion.
pub struct FunctionExecutor<'f> {
    function: &'f Function,
    kernel: &'f Kernel,
    ctx: ExecContext,
    options: Option<FunctionOptions>,
    state: Option<AggregateState>,
    initialized: bool,
}

impl<'f> FunctionExecutor<'f> {
    /// Pick the kernel for `types` and build an executor around it.
    pub fn try_new(
        function: &'f Function,
        types: &[ComplexLogicalType],
        ctx: ExecContext,
    ) -> Result<Self> {
        let kernel = function.dispatch_exact(types)?;
        Ok(Self {
            function,
            kernel,
            ctx,
            options: None,
            state: None,
            initialized: false,
        })
    }

    /// Resolve options against the function's defaults and initialize
    /// kernel state. Required options with neither caller-supplied nor
    /// default values fail as misuse.
    pub fn init(&mut self, options: Option<&FunctionOptions>) -> Result<()> {
        let resolved = options
            .cloned()
            .or_else(|| self.function.default_options().cloned());
        if self.function.doc().options_required && resolved.is_none() {
            return Err(TesseraError::invalid(format!(
                "{}: options required but none provided",
                self.function.name()
            )));
        }
        self.options = resolved;
        self.initialized = true;
        Ok(())
    }

    #[must_use]
    pub fn options(&self) -> Option<&FunctionOptions> {
        self.options.as_ref()
    }

    /// Execute over one chunk of `n` rows.
    pub fn execute(&mut self, args: &DataChunk, n: usize) -> Result<DataChunk> {
        self.execute_many(std::slice::from_ref(args), n)
    }

    /// Execute over several chunks of `n` rows each.
    pub fn execute_many(&mut self, inputs: &[DataChunk], n: usize) -> Result<DataChunk> {
        if !self.initialized {
            return Err(TesseraError::invalid("executor used before init"));
        }
        let first = inputs
            .first()
            .ok_or_else(|| TesseraError::invalid("execute: no input chunks"))?;
        self.check_args(inputs)?;
        let types = first.types();

        match self.kernel {
            Kernel::Vector(kernel) => {
                let out_type = kernel.signature.output.resolve(&types)?;
                let mut result = DataChunk::new(&[out_type.clone()], n * inputs.len().max(1));
                for chunk in inputs {
                    let mut out = Vector::new(out_type.clone(), n);
                    (kernel.execute)(&self.ctx, chunk.columns(), n, &mut out)?;
                    for row in 0..n.min(chunk.cardinality()) {
                        let v = out.value(row);
                        result.append_row(std::slice::from_ref(&v))?;
                    }
                }
                if let Some(finalize) = kernel.finalize {
                    finalize(&self.ctx, n, &mut result)?;
                }
                Ok(result)
            }
            Kernel::Aggregate(kernel) => {
                // Fold each chunk in its own state, then merge; one
                // chunk folds straight into the owning state.
                for chunk in inputs {
                    let column = chunk.column(0);
                    let rows = n.min(chunk.cardinality());
                    let mut local = (kernel.init)(&self.ctx, &types)?;
                    (kernel.consume)(&self.ctx, &mut local, column, rows)?;
                    match self.state.as_mut() {
                        Some(owned) => (kernel.merge)(&self.ctx, local, owned)?,
                        None => self.state = Some(local),
                    }
                }
                let state = match self.state.take() {
                    Some(s) => s,
                    None => (kernel.init)(&self.ctx, &types)?,
                };
                let value = (kernel.finalize)(&self.ctx, state)?;
                let out_type = kernel.signature.output.resolve(&types)?;
                let mut result = DataChunk::new(&[out_type.clone()], 1);
                let cast = value
                    .cast_as(&out_type)
                    .unwrap_or_else(|_| Value::null_of(out_type));
                result.append_row(std::slice::from_ref(&cast))?;
                Ok(result)
            }
            Kernel::Row(kernel) => {
                let out_type = kernel.signature.output.resolve(&types)?;
                let mut result = DataChunk::new(&[out_type], n);
                for chunk in inputs {
                    for row in 0..n.min(chunk.cardinality()) {
                        let value = (kernel.execute)(&self.ctx, &chunk.row(row))?;
                        result.append_row(std::slice::from_ref(&value))?;
                    }
                }
                Ok(result)
            }
        }
    }

    /// Every chunk in a batch must carry the same column types. Equal
    /// aliases with differing types are an error, not a cast site.
    fn check_args(&self, inputs: &[DataChunk]) -> Result<()> {
        let Some(first) = inputs.first() else {
            return Ok(());
        };
        let expected = first.types();
        for chunk in &inputs[1..] {
            let got = chunk.types();
            if got != expected {
                return Err(TesseraError::execution(format!(
                    "{}: heterogeneous batch, {expected:?} vs {got:?}",
                    self.function.name()
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for FunctionExecutor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionExecutor")
            .field("function", &self.function.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionRegistry;
    use tessera_types::{LogicalType, VECTOR_CAPACITY};

    fn int_chunk(values: &[i32]) -> DataChunk {
        let types = vec![ComplexLogicalType::from(LogicalType::Integer).with_alias("x")];
        let mut chunk = DataChunk::new(&types, VECTOR_CAPACITY);
        for v in values {
            chunk.append_row(&[Value::integer(*v)]).unwrap();
        }
        chunk
    }

    fn bigint_chunk(values: &[i64]) -> DataChunk {
        let types = vec![ComplexLogicalType::from(LogicalType::BigInt).with_alias("y")];
        let mut chunk = DataChunk::new(&types, VECTOR_CAPACITY);
        for v in values {
            chunk.append_row(&[Value::bigint(*v)]).unwrap();
        }
        chunk
    }

    fn run(name: &str, chunk: &DataChunk) -> Value {
        let ctx = ExecContext::with_builtins();
        let registry = ctx.registry().clone();
        let guard = registry.read();
        let (_, function) = guard.get_by_name(name).unwrap();
        let mut executor =
            FunctionExecutor::try_new(function, &chunk.types(), ctx.clone()).unwrap();
        executor.init(None).unwrap();
        let out = executor.execute(chunk, chunk.cardinality()).unwrap();
        out.value(0, 0)
    }

    #[test]
    fn sum_over_mixed_integer_widths() {
        let sum32 = run("sum", &int_chunk(&[1, 2, 3]));
        assert_eq!(sum32.as_i64(), Some(6));
        assert_eq!(sum32.tag(), LogicalType::Integer);

        let sum64 = run("sum", &bigint_chunk(&[10, 20, 30]));
        assert_eq!(sum64.as_i64(), Some(60));
        assert_eq!(sum64.tag(), LogicalType::BigInt);
    }

    #[test]
    fn sum_of_empty_column_is_typed_zero() {
        let out = run("sum", &int_chunk(&[]));
        assert_eq!(out.as_i64(), Some(0));
        assert_eq!(out.tag(), LogicalType::Integer);
    }

    #[test]
    fn min_max_avg_count() {
        let chunk = int_chunk(&[4, 1, 9, 2]);
        assert_eq!(run("min", &chunk).as_i64(), Some(1));
        assert_eq!(run("max", &chunk).as_i64(), Some(9));
        assert_eq!(run("avg", &chunk).as_f64(), Some(4.0));
        let count = run("count", &chunk);
        assert_eq!(count.as_u64(), Some(4));
        assert_eq!(count.tag(), LogicalType::UBigInt);
    }

    #[test]
    fn empty_extrema_are_null_and_count_zero() {
        let empty = int_chunk(&[]);
        assert!(run("min", &empty).is_null());
        assert!(run("avg", &empty).is_null());
        assert_eq!(run("count", &empty).as_u64(), Some(0));
    }

    #[test]
    fn execute_many_merges_per_chunk_states() {
        let ctx = ExecContext::with_builtins();
        let registry = ctx.registry().clone();
        let guard = registry.read();
        let (_, avg) = guard.get_by_name("avg").unwrap();
        let a = int_chunk(&[1, 2]);
        let b = int_chunk(&[3, 4]);
        let mut executor = FunctionExecutor::try_new(avg, &a.types(), ctx.clone()).unwrap();
        executor.init(None).unwrap();
        let out = executor.execute_many(&[a, b], 2).unwrap();
        assert_eq!(out.cardinality(), 1);
        assert_eq!(out.value(0, 0).as_f64(), Some(2.5));
    }

    #[test]
    fn heterogeneous_batch_is_an_error() {
        let ctx = ExecContext::with_builtins();
        let registry = ctx.registry().clone();
        let guard = registry.read();
        let (_, sum) = guard.get_by_name("sum").unwrap();
        let a = int_chunk(&[1]);
        // Same alias, different complex type: rejected, not promoted.
        let types = vec![ComplexLogicalType::from(LogicalType::BigInt).with_alias("x")];
        let mut b = DataChunk::new(&types, VECTOR_CAPACITY);
        b.append_row(&[Value::bigint(1)]).unwrap();
        let mut executor = FunctionExecutor::try_new(sum, &a.types(), ctx.clone()).unwrap();
        executor.init(None).unwrap();
        let err = executor.execute_many(&[a, b], 1).unwrap_err();
        assert!(err.to_string().contains("heterogeneous batch"));
    }

    #[test]
    fn uninitialized_executor_is_misuse() {
        let ctx = ExecContext::with_builtins();
        let registry = ctx.registry().clone();
        let guard = registry.read();
        let (_, sum) = guard.get_by_name("sum").unwrap();
        let chunk = int_chunk(&[1]);
        let mut executor =
            FunctionExecutor::try_new(sum, &chunk.types(), ctx.clone()).unwrap();
        assert!(executor.execute(&chunk, 1).is_err());
    }

    #[test]
    fn required_options_enforced() {
        use crate::function::{Function, FunctionDoc};
        use crate::kernel::RowKernel;
        use crate::signature::{Arity, InputType, KernelSignature, OutputType};

        let mut f = Function::new(
            "needs_opts",
            Arity::unary(),
            FunctionDoc {
                options_required: true,
                ..FunctionDoc::default()
            },
        );
        f.add_kernel(Kernel::Row(RowKernel {
            signature: KernelSignature::new(
                vec![InputType::Any],
                OutputType::Fixed(LogicalType::Boolean.into()),
            ),
            execute: |_, _| Ok(Value::boolean(true)),
        }))
        .unwrap();
        let mut registry = FunctionRegistry::new();
        let uid = registry.add_function(f);
        let ctx = ExecContext::new(std::sync::Arc::new(parking_lot::RwLock::new(registry)));
        let registry = ctx.registry().clone();
        let guard = registry.read();
        let function = guard.get(uid).unwrap();
        let mut executor = FunctionExecutor::try_new(
            function,
            &[LogicalType::Integer.into()],
            ctx.clone(),
        )
        .unwrap();
        assert!(executor.init(None).is_err());
        let mut opts = FunctionOptions::new();
        opts.set("mode", Value::string("strict"));
        assert!(executor.init(Some(&opts)).is_ok());
    }
}
