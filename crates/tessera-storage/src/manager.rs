//! The per-process storage manager.
//!
//! Owns one storage entry per collection and runs every incoming chunk
//! through the guardrail pipeline, in this order: schema adoption,
//! column expansion by alias, NOT NULL enforcement, `_id`
//! deduplication, and cross-type promotion. Only then does the chunk
//! reach the table. A rejection is not an error: the caller gets a
//! zero-count summary and the table stays untouched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use tracing::{debug, info, warn};

use tessera_block::manager::{BlockManager, StorageMode};
use tessera_error::{Result, TesseraError};
use tessera_table::{AppendResult, DataTable, ScanFilter, Transaction, TxnId};
use tessera_types::{
    ColumnDefinition, ComplexLogicalType, DataChunk, Value, VECTOR_CAPACITY,
};
use tessera_wal::WalWriter;

use crate::name::CollectionFullName;

/// Deleted-slot share above which `maybe_cleanup` rewrites a table.
const CLEANUP_RATIO: f64 = 0.30;

/// Outcome of an append or update after the guardrails ran. A rejected
/// call reports `(0, 0)` with the table unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub first_row_id: i64,
    pub first_slot: usize,
    pub count: usize,
}

impl WriteOutcome {
    const REJECTED: WriteOutcome = WriteOutcome {
        first_row_id: 0,
        first_slot: 0,
        count: 0,
    };

    #[must_use]
    pub const fn accepted(&self) -> bool {
        self.count > 0
    }
}

impl From<AppendResult> for WriteOutcome {
    fn from(r: AppendResult) -> Self {
        Self {
            first_row_id: r.first_row_id,
            first_slot: r.first_slot,
            count: r.count,
        }
    }
}

struct StorageEntry {
    table: DataTable,
    /// Directory holding `table.otbx` in disk mode.
    disk_dir: Option<PathBuf>,
}

/// Map of collection name to storage, plus the guardrail pipeline.
pub struct StorageManager {
    entries: HashMap<CollectionFullName, StorageEntry>,
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("collections", &self.entries.len())
            .finish()
    }
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    // -- lifecycle ----------------------------------------------------------

    /// Create a schema-less in-memory "computing" storage.
    pub fn create_storage(&mut self, name: CollectionFullName) -> Result<()> {
        self.insert_entry(
            name,
            DataTable::computing(Arc::new(BlockManager::in_memory())),
            None,
        )
    }

    /// Create an in-memory storage with a fixed schema.
    pub fn create_storage_with_columns(
        &mut self,
        name: CollectionFullName,
        columns: Vec<ColumnDefinition>,
    ) -> Result<()> {
        self.insert_entry(
            name,
            DataTable::new(columns, Arc::new(BlockManager::in_memory())),
            None,
        )
    }

    /// Create a disk-backed storage under
    /// `path/<database>/main/<collection>/table.otbx`.
    pub fn create_storage_disk(
        &mut self,
        name: CollectionFullName,
        columns: Vec<ColumnDefinition>,
        path: &Path,
    ) -> Result<()> {
        let dir = Self::disk_dir(path, &name);
        let block = Arc::new(BlockManager::create_file(&dir.join("table.otbx"))?);
        self.insert_entry(name, DataTable::new(columns, block), Some(dir))
    }

    /// Reopen an existing disk storage from its checkpoint.
    pub fn load_storage_disk(&mut self, name: CollectionFullName, path: &Path) -> Result<()> {
        let dir = Self::disk_dir(path, &name);
        let block = Arc::new(BlockManager::load_existing(&dir.join("table.otbx"))?);
        let table = DataTable::load(block)?;
        info!(%name, rows = table.total_rows(), "loaded disk storage");
        self.insert_entry(name, table, Some(dir))
    }

    /// Drop a storage; disk mode also removes its directory.
    pub fn drop_storage(&mut self, name: &CollectionFullName) -> Result<()> {
        let entry = self
            .entries
            .remove(name)
            .ok_or_else(|| TesseraError::invalid(format!("drop_storage: unknown {name}")))?;
        if let Some(dir) = entry.disk_dir {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!(%name, error = %e, "failed to remove storage directory");
            }
        }
        Ok(())
    }

    fn insert_entry(
        &mut self,
        name: CollectionFullName,
        table: DataTable,
        disk_dir: Option<PathBuf>,
    ) -> Result<()> {
        if self.entries.contains_key(&name) {
            return Err(TesseraError::invalid(format!(
                "storage {name} already exists"
            )));
        }
        debug!(%name, mode = ?table.storage_mode(), "storage created");
        self.entries.insert(name, StorageEntry { table, disk_dir });
        Ok(())
    }

    fn disk_dir(base: &Path, name: &CollectionFullName) -> PathBuf {
        base.join(&name.database).join("main").join(&name.collection)
    }

    fn entry(&self, name: &CollectionFullName) -> Result<&StorageEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| TesseraError::invalid(format!("unknown storage {name}")))
    }

    fn entry_mut(&mut self, name: &CollectionFullName) -> Result<&mut StorageEntry> {
        self.entries
            .get_mut(name)
            .ok_or_else(|| TesseraError::invalid(format!("unknown storage {name}")))
    }

    // -- introspection ------------------------------------------------------

    #[must_use]
    pub fn has_storage(&self, name: &CollectionFullName) -> bool {
        self.entries.contains_key(name)
    }

    pub fn storage_types(&self, name: &CollectionFullName) -> Result<Vec<ComplexLogicalType>> {
        Ok(self.entry(name)?.table.types())
    }

    pub fn storage_columns(&self, name: &CollectionFullName) -> Result<Vec<ColumnDefinition>> {
        Ok(self.entry(name)?.table.columns().to_vec())
    }

    pub fn storage_total_rows(&self, name: &CollectionFullName) -> Result<usize> {
        Ok(self.entry(name)?.table.total_rows())
    }

    pub fn storage_has_schema(&self, name: &CollectionFullName) -> Result<bool> {
        Ok(self.entry(name)?.table.has_schema())
    }

    pub fn storage_adopt_schema(
        &mut self,
        name: &CollectionFullName,
        columns: Vec<ColumnDefinition>,
    ) -> Result<()> {
        self.entry_mut(name)?.table.adopt_schema(columns)
    }

    // -- reads --------------------------------------------------------------

    pub fn storage_scan(
        &self,
        name: &CollectionFullName,
        out: &mut DataChunk,
        filter: Option<ScanFilter<'_>>,
        limit: usize,
        txn: &Transaction,
    ) -> Result<usize> {
        self.entry(name)?.table.scan(out, filter, limit, txn)
    }

    pub fn storage_fetch(
        &self,
        name: &CollectionFullName,
        out: &mut DataChunk,
        row_ids: &[i64],
    ) -> Result<usize> {
        self.entry(name)?.table.fetch(out, row_ids)
    }

    pub fn storage_scan_segment(
        &self,
        name: &CollectionFullName,
        start: usize,
        count: usize,
        callback: &mut dyn FnMut(DataChunk),
    ) -> Result<()> {
        self.entry(name)?.table.scan_segment(start, count, callback)
    }

    // -- guardrail pipeline -------------------------------------------------

    /// Append through the full pipeline. `txn = None` commits rows
    /// immediately (the direct path additionally skips guardrails; see
    /// [`append_direct`](Self::append_direct)).
    pub fn storage_append(
        &mut self,
        name: &CollectionFullName,
        chunk: &DataChunk,
        txn: Option<&Transaction>,
    ) -> Result<WriteOutcome> {
        let entry = self.entry_mut(name)?;
        Self::adopt_if_needed(&mut entry.table, chunk)?;

        let expanded = Self::expand_columns(&entry.table, chunk);
        if !Self::not_null_ok(&entry.table, &expanded) {
            debug!(%name, "append rejected: NOT NULL violation");
            return Ok(WriteOutcome::REJECTED);
        }
        let read_txn = txn.copied().unwrap_or(Transaction::latest());
        let deduped = Self::dedup_on_id(&entry.table, expanded, &read_txn);
        if row_count(&deduped) == 0 && chunk.cardinality() > 0 {
            debug!(%name, "append rejected: all rows duplicate on _id");
            return Ok(WriteOutcome::REJECTED);
        }
        let promoted = Self::promote(&entry.table, &deduped);

        let result = match txn {
            Some(txn) => entry.table.append_txn(&promoted, txn)?,
            None => entry.table.append(&promoted)?,
        };
        Ok(result.into())
    }

    /// Direct append used by WAL replay: the records were validated
    /// when first applied, so deduplication, NOT NULL checks, and
    /// version tagging are skipped.
    pub fn append_direct(
        &mut self,
        name: &CollectionFullName,
        chunk: &DataChunk,
    ) -> Result<WriteOutcome> {
        let entry = self.entry_mut(name)?;
        Self::adopt_if_needed(&mut entry.table, chunk)?;
        let expanded = Self::expand_columns(&entry.table, chunk);
        let promoted = Self::promote(&entry.table, &expanded);
        Ok(entry.table.append(&promoted)?.into())
    }

    /// Update through expansion and promotion. Dedup does not apply:
    /// the rows keep their ids.
    pub fn storage_update(
        &mut self,
        name: &CollectionFullName,
        row_ids: &[i64],
        chunk: &DataChunk,
        txn: &Transaction,
    ) -> Result<WriteOutcome> {
        let entry = self.entry_mut(name)?;
        let expanded = Self::expand_columns(&entry.table, chunk);
        if !Self::not_null_ok(&entry.table, &expanded) {
            return Ok(WriteOutcome::REJECTED);
        }
        let promoted = Self::promote(&entry.table, &expanded);
        Ok(entry.table.update(row_ids, &promoted, txn)?.into())
    }

    /// Direct update used by WAL replay.
    pub fn update_direct(
        &mut self,
        name: &CollectionFullName,
        row_ids: &[i64],
        chunk: &DataChunk,
    ) -> Result<WriteOutcome> {
        let entry = self.entry_mut(name)?;
        let expanded = Self::expand_columns(&entry.table, chunk);
        let promoted = Self::promote(&entry.table, &expanded);
        Ok(entry
            .table
            .update(row_ids, &promoted, &Transaction::reader(0))?
            .into())
    }

    pub fn storage_delete_rows(
        &mut self,
        name: &CollectionFullName,
        row_ids: &[i64],
        txn_id: TxnId,
    ) -> Result<usize> {
        Ok(self.entry_mut(name)?.table.delete_rows(row_ids, txn_id))
    }

    // -- MVCC finalization --------------------------------------------------

    pub fn storage_commit_append(
        &mut self,
        name: &CollectionFullName,
        cid: u64,
        first_slot: usize,
        count: usize,
    ) -> Result<()> {
        self.entry_mut(name)?.table.commit_append(cid, first_slot, count);
        Ok(())
    }

    pub fn storage_revert_append(
        &mut self,
        name: &CollectionFullName,
        first_slot: usize,
        count: usize,
    ) -> Result<()> {
        self.entry_mut(name)?.table.revert_append(first_slot, count);
        Ok(())
    }

    pub fn storage_commit_delete(
        &mut self,
        name: &CollectionFullName,
        txn_id: TxnId,
        cid: u64,
    ) -> Result<()> {
        self.entry_mut(name)?.table.commit_all_deletes(txn_id, cid);
        Ok(())
    }

    pub fn storage_revert_delete(
        &mut self,
        name: &CollectionFullName,
        txn_id: TxnId,
    ) -> Result<()> {
        self.entry_mut(name)?.table.revert_delete(txn_id);
        Ok(())
    }

    // -- maintenance --------------------------------------------------------

    /// Checkpoint every disk table. The persisted WAL id advances to
    /// `cid` only when no in-memory table exists; any in-memory table
    /// forces the engine to keep replaying from the older id.
    pub fn checkpoint_all(&mut self, cid: u64, wal: Option<&WalWriter>) -> Result<bool> {
        let mut all_disk = true;
        for (name, entry) in &mut self.entries {
            match entry.table.storage_mode() {
                StorageMode::Disk => {
                    entry.table.checkpoint()?;
                    debug!(%name, "checkpointed");
                }
                StorageMode::InMemory => all_disk = false,
            }
        }
        if all_disk {
            if let Some(wal) = wal {
                wal.set_persisted_id(cid)?;
            }
        }
        Ok(all_disk)
    }

    /// Compact every table.
    pub fn vacuum_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.table.compact();
        }
    }

    /// Reclaim a table whose deleted-row share crossed the threshold.
    pub fn maybe_cleanup(
        &mut self,
        name: &CollectionFullName,
        lowest_active_start_time: u64,
    ) -> Result<bool> {
        let entry = self.entry_mut(name)?;
        if entry.table.deleted_ratio() <= CLEANUP_RATIO {
            return Ok(false);
        }
        entry.table.cleanup_versions(lowest_active_start_time);
        entry.table.compact();
        info!(%name, "cleanup compacted table");
        Ok(true)
    }

    #[must_use]
    pub fn collection_names(&self) -> Vec<CollectionFullName> {
        self.entries.keys().cloned().collect()
    }

    // -- pipeline steps -----------------------------------------------------

    fn adopt_if_needed(table: &mut DataTable, chunk: &DataChunk) -> Result<()> {
        if table.has_schema() {
            return Ok(());
        }
        let columns: Vec<ColumnDefinition> = chunk
            .types()
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let name = t
                    .alias()
                    .map_or_else(|| format!("col{i}"), ToOwned::to_owned);
                ColumnDefinition::new(name, t.clone())
            })
            .collect();
        debug!(columns = columns.len(), "schema adopted from chunk");
        table.adopt_schema(columns)
    }

    /// Reorder and expand the incoming chunk to the table schema,
    /// keeping original value types (promotion happens later). Missing
    /// columns fill with their default or null; extra columns drop.
    fn expand_columns(table: &DataTable, chunk: &DataChunk) -> Vec<Vec<Value>> {
        let n = chunk.cardinality();
        let mut out = Vec::with_capacity(table.columns().len());
        for column in table.columns() {
            let values: Vec<Value> = match chunk.column_index(column.name()) {
                Some(idx) => (0..n).map(|row| chunk.value(idx, row)).collect(),
                None => {
                    let fill = column
                        .default_value()
                        .cloned()
                        .unwrap_or_else(|| Value::null_of(column.logical_type().clone()));
                    vec![fill; n]
                }
            };
            out.push(values);
        }
        out
    }

    /// Any null in a NOT NULL column rejects the whole chunk.
    fn not_null_ok(table: &DataTable, expanded: &[Vec<Value>]) -> bool {
        for (column, values) in table.columns().iter().zip(expanded.iter()) {
            if column.is_not_null() && values.iter().any(Value::is_null) {
                return false;
            }
        }
        true
    }

    /// Drop rows whose `_id` already exists in the table, compared by
    /// value string view. Applies only once the table holds rows.
    fn dedup_on_id(
        table: &DataTable,
        expanded: Vec<Vec<Value>>,
        txn: &Transaction,
    ) -> Vec<Vec<Value>> {
        let Some(id_col) = table
            .columns()
            .iter()
            .position(|c| c.name() == "_id")
        else {
            return expanded;
        };
        if table.total_rows() == 0 {
            return expanded;
        }
        let mut seen: HashSet<String> = table
            .column_values(id_col, txn)
            .into_iter()
            .map(|(_, v)| v.str_view())
            .collect();

        let n = row_count(&expanded);
        let mut keep = Vec::with_capacity(n);
        for row in 0..n {
            let view = expanded[id_col][row].str_view();
            keep.push(seen.insert(view));
        }
        if keep.iter().all(|k| *k) {
            return expanded;
        }
        expanded
            .into_iter()
            .map(|values| {
                values
                    .into_iter()
                    .zip(keep.iter())
                    .filter_map(|(v, k)| k.then_some(v))
                    .collect()
            })
            .collect()
    }

    /// Cast every column into the schema type; invalid rows go null.
    fn promote(table: &DataTable, expanded: &[Vec<Value>]) -> DataChunk {
        let types = table.types();
        let n = row_count(expanded);
        let mut chunk = DataChunk::new(&types, n.max(VECTOR_CAPACITY));
        for (col, values) in expanded.iter().enumerate() {
            for (row, value) in values.iter().enumerate() {
                // set_value casts to the column type or marks invalid.
                chunk.set_value(col, row, value);
            }
        }
        chunk.set_cardinality(n);
        chunk
    }
}

/// Rows in a column-major expansion.
fn row_count(expanded: &[Vec<Value>]) -> usize {
    expanded.first().map_or(0, Vec::len)
}
