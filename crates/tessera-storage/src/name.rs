//! Collection naming.

use serde::{Deserialize, Serialize};

/// Fully qualified collection name: `(database, collection)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionFullName {
    pub database: String,
    pub collection: String,
}

impl CollectionFullName {
    #[must_use]
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl std::fmt::Display for CollectionFullName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_dotted() {
        assert_eq!(CollectionFullName::new("db", "users").to_string(), "db.users");
    }
}
