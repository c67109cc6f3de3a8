//! The columnar table.
//!
//! [`DataTable`] owns one row group, its schema, and a block manager.
//! All mutating operations take the table's own schema-shaped chunks;
//! schema adoption, column expansion, and promotion happen one level
//! up in the storage manager.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use tessera_block::manager::{BlockManager, StorageMode, meta_payload};
use tessera_block::{BlockId, BufferPool, CheckpointWriter, MetaReader};
use tessera_error::{Result, TesseraError};
use tessera_types::{ColumnDefinition, DataChunk, Value, VECTOR_CAPACITY};

use crate::row_group::RowGroup;
use crate::segment::Segment;
use crate::version::{CommitId, InsertInfo, Transaction, TxnId};

/// Row filter applied during scans: `(staged_row_chunk, row)` must
/// hold for the row to be emitted.
pub type ScanFilter<'a> = &'a dyn Fn(&DataChunk, usize) -> bool;

/// Result of an append: the first assigned logical row id, the first
/// physical slot (the unit `commit_append`/`revert_append` address),
/// and how many rows landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendResult {
    pub first_row_id: i64,
    pub first_slot: usize,
    pub count: usize,
}

/// On-disk form of a checkpointed table: committed rows only, history
/// collapsed.
#[derive(Serialize, Deserialize)]
struct TableSnapshot {
    columns: Vec<ColumnDefinition>,
    row_ids: Vec<i64>,
    next_row_id: i64,
    segments: Vec<Segment>,
}

/// Pages the table's buffer pool keeps resident.
const TABLE_POOL_PAGES: usize = 256;

/// Columnar storage for one collection.
#[derive(Debug)]
pub struct DataTable {
    columns: Vec<ColumnDefinition>,
    row_group: RowGroup,
    block: Arc<BlockManager>,
    pool: Arc<BufferPool>,
    /// Metadata chain written by the previous checkpoint, freed by the
    /// next one.
    meta_chain: Vec<BlockId>,
}

impl DataTable {
    #[must_use]
    pub fn new(columns: Vec<ColumnDefinition>, block: Arc<BlockManager>) -> Self {
        let row_group = RowGroup::new(&columns);
        let pool = BufferPool::new(Arc::clone(&block), TABLE_POOL_PAGES);
        Self {
            columns,
            row_group,
            block,
            pool,
            meta_chain: Vec::new(),
        }
    }

    /// A schema-less computing table; adopts a schema on first append.
    #[must_use]
    pub fn computing(block: Arc<BlockManager>) -> Self {
        Self::new(Vec::new(), block)
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    #[must_use]
    pub fn has_schema(&self) -> bool {
        !self.columns.is_empty()
    }

    /// Adopt a schema; only legal while the table holds no rows.
    pub fn adopt_schema(&mut self, columns: Vec<ColumnDefinition>) -> Result<()> {
        if self.row_group.slot_count() > 0 {
            return Err(TesseraError::invalid(
                "adopt_schema: table already holds rows",
            ));
        }
        self.row_group.adopt_columns(&columns);
        self.columns = columns;
        Ok(())
    }

    #[must_use]
    pub fn storage_mode(&self) -> StorageMode {
        self.block.mode()
    }

    #[must_use]
    pub fn block_manager(&self) -> &Arc<BlockManager> {
        &self.block
    }

    /// The column types of this table, aliases included.
    #[must_use]
    pub fn types(&self) -> Vec<tessera_types::ComplexLogicalType> {
        self.columns
            .iter()
            .map(|c| c.logical_type().clone())
            .collect()
    }

    /// Rows visible to a reader positioned after all commits.
    #[must_use]
    pub fn total_rows(&self) -> usize {
        let latest = Transaction::latest();
        (0..self.row_group.slot_count())
            .filter(|&slot| self.row_group.is_slot_visible(slot, &latest))
            .count()
    }

    #[must_use]
    pub fn committed_row_count(&self) -> usize {
        self.row_group.committed_row_count()
    }

    #[must_use]
    pub fn deleted_ratio(&self) -> f64 {
        self.row_group.dead_ratio()
    }

    // -- mutation -----------------------------------------------------------

    /// Direct append: rows become visible immediately (recovery and
    /// non-transactional paths).
    pub fn append(&mut self, chunk: &DataChunk) -> Result<AppendResult> {
        self.append_internal(chunk, 0)
    }

    /// Transactional append: rows are tagged pending by `txn.id`.
    pub fn append_txn(&mut self, chunk: &DataChunk, txn: &Transaction) -> Result<AppendResult> {
        self.append_internal(chunk, txn.id)
    }

    fn append_internal(&mut self, chunk: &DataChunk, txn_id: TxnId) -> Result<AppendResult> {
        if chunk.column_count() != self.columns.len() {
            return Err(TesseraError::invalid(format!(
                "append: chunk has {} columns, schema has {}",
                chunk.column_count(),
                self.columns.len()
            )));
        }
        let n = chunk.cardinality();
        let (first_row_id, first_slot) = self.row_group.append_rows(chunk, txn_id);
        debug!(first_row_id, first_slot, n, txn = txn_id, "append");
        Ok(AppendResult {
            first_row_id,
            first_slot,
            count: n,
        })
    }

    /// Update: logical delete of the old slots plus an append that
    /// reuses the old row ids, both halves pending under `txn`.
    pub fn update(
        &mut self,
        row_ids: &[i64],
        chunk: &DataChunk,
        txn: &Transaction,
    ) -> Result<AppendResult> {
        if chunk.cardinality() != row_ids.len() {
            return Err(TesseraError::invalid(format!(
                "update: {} row ids for {} rows",
                row_ids.len(),
                chunk.cardinality()
            )));
        }
        if chunk.column_count() != self.columns.len() {
            return Err(TesseraError::invalid(
                "update: chunk arity differs from schema",
            ));
        }
        self.row_group.mark_delete_ids(row_ids, txn.id);
        let first_slot = self.row_group.append_rows_with_ids(chunk, row_ids, txn.id);
        Ok(AppendResult {
            first_row_id: row_ids.first().copied().unwrap_or(-1),
            first_slot,
            count: row_ids.len(),
        })
    }

    /// Mark rows deleted; `txn_id == 0` deletes for everyone at once.
    /// Returns the count actually deleted.
    pub fn delete_rows(&mut self, row_ids: &[i64], txn_id: TxnId) -> usize {
        self.row_group.mark_delete_ids(row_ids, txn_id)
    }

    // -- reads --------------------------------------------------------------

    /// Append rows visible under `txn` (and passing `filter`) to
    /// `out`, stopping at `limit`. Returns the emitted row count.
    pub fn scan(
        &self,
        out: &mut DataChunk,
        filter: Option<ScanFilter<'_>>,
        limit: usize,
        txn: &Transaction,
    ) -> Result<usize> {
        let types = self.types();
        let mut staged = DataChunk::new(&types, 1);
        let mut emitted = 0usize;
        for slot in 0..self.row_group.slot_count() {
            if emitted >= limit {
                break;
            }
            if !self.row_group.is_slot_visible(slot, txn) {
                continue;
            }
            let values = self.row_group.slot_values(slot);
            if let Some(check) = filter {
                staged.reset();
                staged.append_row(&values)?;
                staged.set_row_ids(vec![self.row_group.row_id_at(slot)]);
                if !check(&staged, 0) {
                    continue;
                }
            }
            out.append_row(&values)?;
            out.push_row_id(self.row_group.row_id_at(slot));
            emitted += 1;
        }
        Ok(emitted)
    }

    /// Fetch explicit row ids, newest slot per id, no MVCC filter.
    /// Used by index lookups.
    pub fn fetch(&self, out: &mut DataChunk, row_ids: &[i64]) -> Result<usize> {
        let mut emitted = 0usize;
        for &id in row_ids {
            let Some(slot) = self.row_group.slot_of(id) else {
                continue;
            };
            // Reverted slots hold no data worth surfacing.
            if matches!(
                self.row_group.versions().insert_info(slot),
                InsertInfo::Reverted
            ) {
                continue;
            }
            out.append_row(&self.row_group.slot_values(slot))?;
            out.push_row_id(id);
            emitted += 1;
        }
        Ok(emitted)
    }

    /// Physical scan over slot ranges, no MVCC, batched into chunks.
    pub fn scan_segment(
        &self,
        start: usize,
        count: usize,
        callback: &mut dyn FnMut(DataChunk),
    ) -> Result<()> {
        let types = self.types();
        let end = (start + count).min(self.row_group.slot_count());
        let mut slot = start;
        while slot < end {
            let batch = (end - slot).min(VECTOR_CAPACITY);
            let mut chunk = DataChunk::new(&types, batch);
            for s in slot..slot + batch {
                chunk.append_row(&self.row_group.slot_values(s))?;
                chunk.push_row_id(self.row_group.row_id_at(s));
            }
            callback(chunk);
            slot += batch;
        }
        Ok(())
    }

    /// Visible values of one column, paired with their row ids; the
    /// dedup guardrail reads `_id` through this.
    pub fn column_values(&self, col: usize, txn: &Transaction) -> Vec<(i64, Value)> {
        (0..self.row_group.slot_count())
            .filter(|&slot| self.row_group.is_slot_visible(slot, txn))
            .map(|slot| {
                (
                    self.row_group.row_id_at(slot),
                    self.row_group.segment(col).fetch(slot),
                )
            })
            .collect()
    }

    // -- MVCC finalization --------------------------------------------------

    pub fn commit_append(&mut self, cid: CommitId, first_slot: usize, count: usize) {
        self.row_group.commit_append(cid, first_slot, count);
    }

    pub fn revert_append(&mut self, first_slot: usize, count: usize) {
        self.row_group.revert_append(first_slot, count);
    }

    pub fn commit_all_deletes(&mut self, txn: TxnId, cid: CommitId) -> Vec<usize> {
        self.row_group.commit_deletes(txn, cid)
    }

    pub fn revert_delete(&mut self, txn: TxnId) {
        self.row_group.revert_deletes(txn);
    }

    pub fn cleanup_versions(&mut self, lowest_active_start_time: u64) {
        self.row_group.cleanup_versions(lowest_active_start_time);
    }

    /// Rewrite the row group without its tombstones.
    pub fn compact(&mut self) {
        let before = self.row_group.slot_count();
        self.row_group.compact();
        debug!(
            dropped = before - self.row_group.slot_count(),
            "compacted row group"
        );
    }

    // -- durability ---------------------------------------------------------

    /// Serialize the committed state into the block manager's metadata
    /// chain and swap the header to it. Pending (uncommitted) slots
    /// are not durable; pending deletes revert on reload.
    pub fn checkpoint(&mut self) -> Result<()> {
        let latest = Transaction::latest();
        let mut row_ids = Vec::new();
        let mut segments: Vec<Segment> = self
            .columns
            .iter()
            .map(|c| Segment::new(c.logical_type().clone()))
            .collect();
        for slot in 0..self.row_group.slot_count() {
            if !self.row_group.is_slot_visible(slot, &latest) {
                continue;
            }
            row_ids.push(self.row_group.row_id_at(slot));
            for (col, seg) in segments.iter_mut().enumerate() {
                seg.append(&self.row_group.segment(col).fetch(slot));
            }
        }
        let snapshot = TableSnapshot {
            columns: self.columns.clone(),
            row_ids,
            next_row_id: self.row_group.next_row_id(),
            segments,
        };
        let payload = serde_json::to_vec(&snapshot)
            .map_err(|e| TesseraError::execution(format!("checkpoint serialize: {e}")))?;

        let old_chain = std::mem::take(&mut self.meta_chain);
        for id in &old_chain {
            self.pool.invalidate(*id);
        }
        self.meta_chain = CheckpointWriter::rewrite(&self.block, old_chain, &payload)?;
        debug!(blocks = self.meta_chain.len(), "checkpointed table");
        Ok(())
    }

    /// Rebuild a table from an existing block manager's metadata.
    pub fn load(block: Arc<BlockManager>) -> Result<Self> {
        let root = block.meta_block();
        if !root.is_valid() {
            return Err(TesseraError::corrupt("meta block", "no checkpoint present"));
        }
        let pool = BufferPool::new(Arc::clone(&block), TABLE_POOL_PAGES);
        let (blob, meta_chain) = MetaReader::read_through(&pool, root)?;
        let free_len = block.free_list_snapshot().len();
        let payload = meta_payload(&blob, free_len);
        let snapshot: TableSnapshot = serde_json::from_slice(payload)
            .map_err(|e| TesseraError::corrupt("meta block", format!("snapshot decode: {e}")))?;
        let row_group = RowGroup::from_snapshot(
            snapshot.segments,
            snapshot.row_ids,
            snapshot.next_row_id,
        );
        Ok(Self {
            columns: snapshot.columns,
            row_group,
            block,
            pool,
            meta_chain,
        })
    }
}
