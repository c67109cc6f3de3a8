//! The catalog.
//!
//! Maps databases to their collections (plus sequences, views, and
//! macros) and each collection to its columns and storage mode. The
//! whole catalog serializes into a small otbx-style file
//! (`catalog.otbx`) that checkpoint rewrites.

use std::path::Path;
use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tessera_block::manager::{BlockManager, encode_free_list, meta_payload};
use tessera_block::{MetaReader, MetaWriter};
use tessera_error::{Result, TesseraError};
use tessera_types::ColumnDefinition;

pub const CATALOG_FILE: &str = "catalog.otbx";

/// How a collection's rows are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogStorageMode {
    InMemory,
    Disk,
}

/// One collection's catalog record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub columns: Vec<ColumnDefinition>,
    pub storage_mode: CatalogStorageMode,
}

/// One database's namespaces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseEntry {
    pub collections: HashMap<String, CollectionEntry>,
    pub sequences: Vec<String>,
    pub views: Vec<String>,
    pub macros: Vec<String>,
}

/// The full catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    databases: HashMap<String, DatabaseEntry>,
}

impl Catalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_database(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.databases.contains_key(&name) {
            return false;
        }
        self.databases.insert(name, DatabaseEntry::default());
        true
    }

    pub fn drop_database(&mut self, name: &str) -> bool {
        self.databases.remove(name).is_some()
    }

    #[must_use]
    pub fn has_database(&self, name: &str) -> bool {
        self.databases.contains_key(name)
    }

    pub fn create_collection(
        &mut self,
        database: &str,
        collection: impl Into<String>,
        columns: Vec<ColumnDefinition>,
        storage_mode: CatalogStorageMode,
    ) -> Result<()> {
        let db = self
            .databases
            .get_mut(database)
            .ok_or_else(|| TesseraError::invalid(format!("unknown database {database}")))?;
        let collection = collection.into();
        if db.collections.contains_key(&collection) {
            return Err(TesseraError::invalid(format!(
                "collection {database}.{collection} already exists"
            )));
        }
        db.collections.insert(
            collection,
            CollectionEntry {
                columns,
                storage_mode,
            },
        );
        Ok(())
    }

    pub fn drop_collection(&mut self, database: &str, collection: &str) -> bool {
        self.databases
            .get_mut(database)
            .is_some_and(|db| db.collections.remove(collection).is_some())
    }

    #[must_use]
    pub fn collection(&self, database: &str, collection: &str) -> Option<&CollectionEntry> {
        self.databases.get(database)?.collections.get(collection)
    }

    #[must_use]
    pub fn databases(&self) -> Vec<&str> {
        self.databases.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn collections(&self, database: &str) -> Vec<&str> {
        self.databases
            .get(database)
            .map(|db| db.collections.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Rewrite `catalog.otbx` under `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let payload = serde_json::to_vec(self)
            .map_err(|e| TesseraError::execution(format!("catalog serialize: {e}")))?;
        let block = Arc::new(BlockManager::create_file(&dir.join(CATALOG_FILE))?);
        let root = block.allocate_block()?;
        let blob = encode_free_list(&[], &payload);
        MetaWriter::write(&block, root, &blob)?;
        block.write_header(root, 0)?;
        debug!(databases = self.databases.len(), "catalog saved");
        Ok(())
    }

    /// Read `catalog.otbx` back; a missing file is an empty catalog.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CATALOG_FILE);
        if !path.exists() {
            return Ok(Self::new());
        }
        let block = Arc::new(BlockManager::load_existing(&path)?);
        let root = block.meta_block();
        if !root.is_valid() {
            return Ok(Self::new());
        }
        let blob = MetaReader::read(&block, root)?;
        serde_json::from_slice(meta_payload(&blob, 0))
            .map_err(|e| TesseraError::corrupt("meta block", format!("catalog decode: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::LogicalType;

    #[test]
    fn database_and_collection_lifecycle() {
        let mut catalog = Catalog::new();
        assert!(catalog.create_database("db"));
        assert!(!catalog.create_database("db"));
        catalog
            .create_collection(
                "db",
                "users",
                vec![ColumnDefinition::new("x", LogicalType::Integer.into())],
                CatalogStorageMode::InMemory,
            )
            .unwrap();
        assert!(catalog.collection("db", "users").is_some());
        assert!(
            catalog
                .create_collection("db", "users", vec![], CatalogStorageMode::InMemory)
                .is_err()
        );
        assert!(catalog.drop_collection("db", "users"));
        assert!(!catalog.drop_collection("db", "users"));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::new();
        catalog.create_database("db");
        catalog
            .create_collection(
                "db",
                "users",
                vec![ColumnDefinition::new("x", LogicalType::Integer.into()).not_null()],
                CatalogStorageMode::Disk,
            )
            .unwrap();
        catalog.save(dir.path()).unwrap();

        let loaded = Catalog::load(dir.path()).unwrap();
        let entry = loaded.collection("db", "users").unwrap();
        assert_eq!(entry.storage_mode, CatalogStorageMode::Disk);
        assert!(entry.columns[0].is_not_null());
    }

    #[test]
    fn missing_file_is_empty_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::load(dir.path()).unwrap();
        assert!(catalog.databases().is_empty());
    }
}
