//! Index metadata file.
//!
//! `index_METADATA` at the manager level enumerates every index of
//! every collection so the registry (and its disk mirrors) can be
//! reconstructed at startup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tessera_error::{Result, TesseraError};

use crate::single_field::IndexKeys;

pub const INDEXES_METADATA_FILENAME: &str = "index_METADATA";

/// One reconstructable index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub database: String,
    pub collection: String,
    pub name: String,
    pub keys: IndexKeys,
}

/// Loads and stores the metadata file.
#[derive(Debug)]
pub struct IndexMetaFile {
    path: PathBuf,
}

impl IndexMetaFile {
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(INDEXES_METADATA_FILENAME),
        }
    }

    /// All recorded indexes; a missing file reads as empty.
    pub fn load(&self) -> Result<Vec<IndexMeta>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let bytes = std::fs::read(&self.path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| TesseraError::corrupt("meta block", format!("index metadata: {e}")))
    }

    pub fn store(&self, entries: &[IndexMeta]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(entries)
            .map_err(|e| TesseraError::execution(format!("index metadata encode: {e}")))?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }

    /// Append one entry, replacing a stale record of the same index.
    pub fn record(&self, meta: IndexMeta) -> Result<()> {
        let mut entries = self.load()?;
        entries.retain(|e| {
            !(e.database == meta.database
                && e.collection == meta.collection
                && e.name == meta.name)
        });
        entries.push(meta);
        self.store(&entries)
    }

    /// Forget one index.
    pub fn erase(&self, database: &str, collection: &str, name: &str) -> Result<()> {
        let mut entries = self.load()?;
        entries.retain(|e| {
            !(e.database == database && e.collection == collection && e.name == name)
        });
        self.store(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str) -> IndexMeta {
        IndexMeta {
            database: "db".into(),
            collection: "users".into(),
            name: name.into(),
            keys: IndexKeys::single("x"),
        }
    }

    #[test]
    fn record_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let file = IndexMetaFile::new(dir.path());
        file.record(meta("a")).unwrap();
        file.record(meta("b")).unwrap();
        // Re-recording replaces, not duplicates.
        file.record(meta("a")).unwrap();
        let entries = file.load().unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn erase_forgets() {
        let dir = tempfile::tempdir().unwrap();
        let file = IndexMetaFile::new(dir.path());
        file.record(meta("a")).unwrap();
        file.erase("db", "users", "a").unwrap();
        assert!(file.load().unwrap().is_empty());
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(IndexMetaFile::new(dir.path()).load().unwrap().is_empty());
    }
}
