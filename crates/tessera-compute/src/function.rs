//! Functions and the registry.
//!
//! A function is a named bundle of kernels sharing an arity; dispatch
//! picks the first kernel whose signature matches the concrete input
//! types. The registry maps dense uids to functions and is *not*
//! thread-safe on its own — shared users wrap it in a lock.

use hashbrown::HashMap;

use tessera_error::{Result, TesseraError};
use tessera_types::{ComplexLogicalType, Value};

use crate::kernel::Kernel;
use crate::signature::Arity;

/// Dense function identifier.
pub type FunctionUid = usize;

/// Uid that never resolves.
pub const INVALID_FUNCTION_UID: FunctionUid = usize::MAX;

/// Built-in uid assignment; the array order IS the uid order the
/// default registry guarantees.
pub const DEFAULT_FUNCTIONS: [(&str, FunctionUid); 5] = [
    ("sum", 0),
    ("min", 1),
    ("max", 2),
    ("count", 3),
    ("avg", 4),
];

/// Documentation and option policy of a function.
#[derive(Debug, Clone, Default)]
pub struct FunctionDoc {
    pub summary: String,
    pub description: String,
    pub arg_names: Vec<String>,
    pub options_required: bool,
}

/// Free-form options resolved against a function's defaults at
/// executor init.
#[derive(Debug, Clone, Default)]
pub struct FunctionOptions {
    entries: HashMap<String, Value>,
}

impl FunctionOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }
}

/// A named collection of kernels sharing one arity.
#[derive(Debug)]
pub struct Function {
    name: String,
    arity: Arity,
    doc: FunctionDoc,
    kernels: Vec<Kernel>,
    default_options: Option<FunctionOptions>,
}

impl Function {
    #[must_use]
    pub fn new(name: impl Into<String>, arity: Arity, doc: FunctionDoc) -> Self {
        Self {
            name: name.into(),
            arity,
            doc,
            kernels: Vec::new(),
            default_options: None,
        }
    }

    #[must_use]
    pub fn with_default_options(mut self, options: FunctionOptions) -> Self {
        self.default_options = Some(options);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn arity(&self) -> Arity {
        self.arity
    }

    #[must_use]
    pub fn doc(&self) -> &FunctionDoc {
        &self.doc
    }

    #[must_use]
    pub fn default_options(&self) -> Option<&FunctionOptions> {
        self.default_options.as_ref()
    }

    #[must_use]
    pub fn num_kernels(&self) -> usize {
        self.kernels.len()
    }

    /// Attach a kernel; its input count must honor the arity.
    pub fn add_kernel(&mut self, kernel: Kernel) -> Result<()> {
        let inputs = kernel.signature().input_types.len();
        if !self.arity.varargs && inputs != self.arity.num_args {
            return Err(TesseraError::invalid(format!(
                "cannot append kernel: function {:?} requires {} args, kernel has {}",
                self.name, self.arity.num_args, inputs
            )));
        }
        self.kernels.push(kernel);
        Ok(())
    }

    /// Pick the kernel matching `types` exactly.
    pub fn dispatch_exact(&self, types: &[ComplexLogicalType]) -> Result<&Kernel> {
        if !self.arity.varargs && types.len() != self.arity.num_args {
            return Err(TesseraError::execution(format!(
                "{}: arity mismatch, expected {} args, got {}",
                self.name,
                self.arity.num_args,
                types.len()
            )));
        }
        self.kernels
            .iter()
            .find(|k| k.signature().matches_inputs(types))
            .ok_or_else(|| {
                TesseraError::execution(format!(
                    "{}: no matching kernel for {types:?}",
                    self.name
                ))
            })
    }
}

/// Uid → function map. NOT thread-safe: callers guard shared instances
/// with their own lock.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: HashMap<FunctionUid, Function>,
    current_uid: FunctionUid,
}

impl FunctionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in aggregates at their
    /// fixed uids.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtins::register_default_functions(&mut registry);
        debug_assert!(
            DEFAULT_FUNCTIONS
                .iter()
                .all(|(name, uid)| registry.get(*uid).is_some_and(|f| f.name() == *name))
        );
        registry
    }

    /// Register a function, returning its uid.
    pub fn add_function(&mut self, function: Function) -> FunctionUid {
        let uid = self.current_uid;
        self.current_uid += 1;
        self.functions.insert(uid, function);
        uid
    }

    #[must_use]
    pub fn get(&self, uid: FunctionUid) -> Option<&Function> {
        self.functions.get(&uid)
    }

    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<(FunctionUid, &Function)> {
        self.functions
            .iter()
            .find(|(_, f)| f.name() == name)
            .map(|(uid, f)| (*uid, f))
    }

    /// `(name, uid)` of everything registered.
    #[must_use]
    pub fn functions(&self) -> Vec<(String, FunctionUid)> {
        let mut out: Vec<(String, FunctionUid)> = self
            .functions
            .iter()
            .map(|(uid, f)| (f.name().to_owned(), *uid))
            .collect();
        out.sort_by_key(|(_, uid)| *uid);
        out
    }
}
