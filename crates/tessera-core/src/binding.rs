//! Plan-parameter binding.
//!
//! The transformer hands the core a parameter table; values bind by id
//! and `finalize` gates plan construction: it may run at most once and
//! only after every id is bound. Violations are `BindError`s.

use hashbrown::HashMap;

use tessera_compute::ParameterStore;
use tessera_error::{Result, TesseraError};
use tessera_types::Value;

/// Parameter binding state between transform and plan construction.
#[derive(Debug, Default)]
pub struct TransformResult {
    expected: Vec<usize>,
    bound: HashMap<usize, Value>,
    finalized: bool,
}

impl TransformResult {
    /// A binding table expecting exactly `parameter_ids`.
    #[must_use]
    pub fn new(parameter_ids: Vec<usize>) -> Self {
        Self {
            expected: parameter_ids,
            bound: HashMap::new(),
            finalized: false,
        }
    }

    /// Record one parameter value. Unknown ids and rebinding after
    /// finalize are protocol violations.
    pub fn bind(&mut self, id: usize, value: Value) -> Result<()> {
        if self.finalized {
            return Err(TesseraError::bind("bind after finalize"));
        }
        if !self.expected.contains(&id) {
            return Err(TesseraError::bind(format!("unknown parameter id {id}")));
        }
        self.bound.insert(id, value);
        Ok(())
    }

    /// Whether every expected id has a value.
    #[must_use]
    pub fn all_bound(&self) -> bool {
        self.expected.iter().all(|id| self.bound.contains_key(id))
    }

    /// Consume the bindings into a parameter store. Runs at most once
    /// and requires `all_bound`.
    pub fn finalize(&mut self) -> Result<ParameterStore> {
        if self.finalized {
            return Err(TesseraError::bind("finalize called twice"));
        }
        if !self.all_bound() {
            return Err(TesseraError::bind("finalize before all parameters bound"));
        }
        self.finalized = true;
        let mut store = ParameterStore::new();
        for (id, value) in self.bound.drain() {
            store.set(id, value);
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_then_finalize() {
        let mut result = TransformResult::new(vec![1, 2]);
        assert!(!result.all_bound());
        result.bind(1, Value::integer(5)).unwrap();
        result.bind(2, Value::string("x")).unwrap();
        assert!(result.all_bound());
        let store = result.finalize().unwrap();
        assert_eq!(store.get(1).and_then(Value::as_i64), Some(5));
    }

    #[test]
    fn unknown_id_is_a_bind_error() {
        let mut result = TransformResult::new(vec![1]);
        let err = result.bind(9, Value::integer(5)).unwrap_err();
        assert!(matches!(err, TesseraError::BindError(_)));
    }

    #[test]
    fn finalize_twice_is_a_bind_error() {
        let mut result = TransformResult::new(vec![]);
        result.finalize().unwrap();
        assert!(matches!(
            result.finalize().unwrap_err(),
            TesseraError::BindError(_)
        ));
    }

    #[test]
    fn finalize_requires_all_bound() {
        let mut result = TransformResult::new(vec![1, 2]);
        result.bind(1, Value::integer(5)).unwrap();
        assert!(result.finalize().is_err());
        // A failed finalize does not consume the one-shot gate.
        result.bind(2, Value::integer(6)).unwrap();
        assert!(result.finalize().is_ok());
    }
}
