//! Kernel shapes and the execution context.
//!
//! The three kernel shapes are one sealed enum with plain function
//! pointers for `init`/`execute`/`consume`/`merge`/`finalize`; the
//! executor picks its loop by matching the variant, so hot paths pay
//! no virtual dispatch.

use std::sync::Arc;

use parking_lot::RwLock;

use tessera_error::Result;
use tessera_types::{DataChunk, Value, Vector};

use crate::function::FunctionRegistry;
use crate::signature::KernelSignature;

/// Execution context handed to every kernel call: the shared function
/// registry behind its lock (the registry itself is not thread-safe).
#[derive(Clone)]
pub struct ExecContext {
    registry: Arc<RwLock<FunctionRegistry>>,
}

impl ExecContext {
    #[must_use]
    pub fn new(registry: Arc<RwLock<FunctionRegistry>>) -> Self {
        Self { registry }
    }

    /// A context over a fresh registry pre-populated with built-ins.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new(Arc::new(RwLock::new(FunctionRegistry::with_builtins())))
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<RwLock<FunctionRegistry>> {
        &self.registry
    }
}

impl std::fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecContext").finish_non_exhaustive()
    }
}

/// Running state of one aggregate computation.
#[derive(Debug, Clone)]
pub struct AggregateState {
    pub acc: Value,
    pub count: u64,
}

/// Batched kernel producing one output vector per input batch.
#[derive(Clone)]
pub struct VectorKernel {
    pub signature: KernelSignature,
    pub execute: fn(&ExecContext, &[Vector], usize, &mut Vector) -> Result<()>,
    /// Optional combiner over the batched results.
    pub finalize: Option<fn(&ExecContext, usize, &mut DataChunk) -> Result<()>>,
}

/// Stateful kernel folding batches into an [`AggregateState`].
#[derive(Clone)]
pub struct AggregateKernel {
    pub signature: KernelSignature,
    /// Mandatory initializer.
    pub init: fn(&ExecContext, &[tessera_types::ComplexLogicalType]) -> Result<AggregateState>,
    pub consume: fn(&ExecContext, &mut AggregateState, &Vector, usize) -> Result<()>,
    pub merge: fn(&ExecContext, AggregateState, &mut AggregateState) -> Result<()>,
    pub finalize: fn(&ExecContext, AggregateState) -> Result<Value>,
}

/// Row-at-a-time kernel.
#[derive(Clone)]
pub struct RowKernel {
    pub signature: KernelSignature,
    pub execute: fn(&ExecContext, &[Value]) -> Result<Value>,
}

/// The sealed kernel union the executor dispatches over.
#[derive(Clone)]
pub enum Kernel {
    Vector(VectorKernel),
    Aggregate(AggregateKernel),
    Row(RowKernel),
}

impl Kernel {
    #[must_use]
    pub fn signature(&self) -> &KernelSignature {
        match self {
            Self::Vector(k) => &k.signature,
            Self::Aggregate(k) => &k.signature,
            Self::Row(k) => &k.signature,
        }
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = match self {
            Self::Vector(_) => "vector",
            Self::Aggregate(_) => "aggregate",
            Self::Row(_) => "row",
        };
        f.debug_struct("Kernel").field("shape", &shape).finish()
    }
}
