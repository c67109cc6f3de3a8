//! Column definitions — the schema unit.

use serde::{Deserialize, Serialize};

use crate::logical_type::ComplexLogicalType;
use crate::value::Value;

/// One column of a table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDefinition {
    name: String,
    ctype: ComplexLogicalType,
    is_not_null: bool,
    default_value: Option<Value>,
}

impl ColumnDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, ctype: ComplexLogicalType) -> Self {
        let name = name.into();
        let ctype = ctype.with_alias(name.clone());
        Self {
            name,
            ctype,
            is_not_null: false,
            default_value: None,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.is_not_null = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn logical_type(&self) -> &ComplexLogicalType {
        &self.ctype
    }

    #[must_use]
    pub const fn is_not_null(&self) -> bool {
        self.is_not_null
    }

    #[must_use]
    pub const fn has_default(&self) -> bool {
        self.default_value.is_some()
    }

    #[must_use]
    pub fn default_value(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logical_type::LogicalType;

    #[test]
    fn builder_carries_constraints() {
        let col = ColumnDefinition::new("_id", LogicalType::BigInt.into())
            .not_null()
            .with_default(Value::bigint(0));
        assert_eq!(col.name(), "_id");
        assert!(col.is_not_null());
        assert!(col.has_default());
        assert_eq!(col.logical_type().alias(), Some("_id"));
    }
}
