//! Row groups: all segments of one table plus version bookkeeping.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use tessera_types::{ColumnDefinition, DataChunk, Value};

use crate::segment::Segment;
use crate::version::{CommitId, Transaction, TxnId, VersionChain};

/// Storage of one table: per-column segments, stable row ids, and the
/// MVCC version chain. Physical slots grow append-only; logical row
/// ids stay stable across updates (an update appends a new slot that
/// reuses the old id).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RowGroup {
    segments: Vec<Segment>,
    /// Logical row id per physical slot.
    row_ids: Vec<i64>,
    /// Latest physical slot per logical row id.
    #[serde(skip)]
    id_index: HashMap<i64, usize>,
    start_row: i64,
    next_row_id: i64,
    versions: VersionChain,
}

impl RowGroup {
    #[must_use]
    pub fn new(columns: &[ColumnDefinition]) -> Self {
        Self {
            segments: columns
                .iter()
                .map(|c| Segment::new(c.logical_type().clone()))
                .collect(),
            row_ids: Vec::new(),
            id_index: HashMap::new(),
            start_row: 0,
            next_row_id: 0,
            versions: VersionChain::new(),
        }
    }

    /// Rebuild a row group from checkpointed state: every row is
    /// committed history, collapsed to always-visible.
    #[must_use]
    pub fn from_snapshot(segments: Vec<Segment>, row_ids: Vec<i64>, next_row_id: i64) -> Self {
        let mut versions = VersionChain::new();
        versions.register_append(row_ids.len(), 0);
        let mut group = Self {
            segments,
            row_ids,
            id_index: HashMap::new(),
            start_row: 0,
            next_row_id,
            versions,
        };
        group.rebuild_index();
        group
    }

    #[must_use]
    pub const fn next_row_id(&self) -> i64 {
        self.next_row_id
    }

    /// Rebuild the transient id index after deserialization.
    pub fn rebuild_index(&mut self) {
        self.id_index.clear();
        for (slot, id) in self.row_ids.iter().enumerate() {
            self.id_index.insert(*id, slot);
        }
    }

    /// Adopt column layout late (schema-less tables that learn their
    /// schema from the first chunk).
    pub fn adopt_columns(&mut self, columns: &[ColumnDefinition]) {
        debug_assert!(self.segments.is_empty() || self.row_ids.is_empty());
        self.segments = columns
            .iter()
            .map(|c| Segment::new(c.logical_type().clone()))
            .collect();
    }

    #[must_use]
    pub const fn start_row(&self) -> i64 {
        self.start_row
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.row_ids.len()
    }

    #[must_use]
    pub const fn versions(&self) -> &VersionChain {
        &self.versions
    }

    pub fn versions_mut(&mut self) -> &mut VersionChain {
        &mut self.versions
    }

    #[must_use]
    pub fn committed_row_count(&self) -> usize {
        self.versions.committed_row_count()
    }

    #[must_use]
    pub fn row_id_at(&self, slot: usize) -> i64 {
        self.row_ids.get(slot).copied().unwrap_or(-1)
    }

    /// Latest physical slot carrying logical row id `id`.
    #[must_use]
    pub fn slot_of(&self, id: i64) -> Option<usize> {
        self.id_index.get(&id).copied()
    }

    /// Append the chunk's rows with freshly assigned ids. Returns the
    /// first assigned id and the first physical slot.
    pub fn append_rows(&mut self, chunk: &DataChunk, txn_id: TxnId) -> (i64, usize) {
        let first_id = self.next_row_id;
        let first_slot = self.row_ids.len();
        let n = chunk.cardinality();
        for row in 0..n {
            let id = self.next_row_id;
            self.next_row_id += 1;
            self.push_row(chunk, row, id);
        }
        self.versions.register_append(n, txn_id);
        (first_id, first_slot)
    }

    /// Append the chunk's rows reusing the given ids (the update
    /// path). Returns the first physical slot.
    pub fn append_rows_with_ids(
        &mut self,
        chunk: &DataChunk,
        ids: &[i64],
        txn_id: TxnId,
    ) -> usize {
        let first_slot = self.row_ids.len();
        let n = chunk.cardinality().min(ids.len());
        for row in 0..n {
            self.push_row(chunk, row, ids[row]);
        }
        self.versions.register_append(n, txn_id);
        first_slot
    }

    fn push_row(&mut self, chunk: &DataChunk, row: usize, id: i64) {
        let slot = self.row_ids.len();
        for (col, segment) in self.segments.iter_mut().enumerate() {
            segment.append(&chunk.value(col, row));
        }
        self.row_ids.push(id);
        self.id_index.insert(id, slot);
    }

    /// All column values of one physical slot.
    #[must_use]
    pub fn slot_values(&self, slot: usize) -> Vec<Value> {
        self.segments.iter().map(|s| s.fetch(slot)).collect()
    }

    #[must_use]
    pub fn segment(&self, col: usize) -> &Segment {
        &self.segments[col]
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[must_use]
    pub fn is_slot_visible(&self, slot: usize, txn: &Transaction) -> bool {
        self.versions.is_visible(slot, txn)
    }

    /// Mark the latest slot of each id deleted. Returns how many rows
    /// were actually marked.
    pub fn mark_delete_ids(&mut self, ids: &[i64], txn_id: TxnId) -> usize {
        let mut deleted = 0usize;
        for &id in ids {
            if let Some(slot) = self.slot_of(id) {
                if self.versions.mark_delete(slot, txn_id) {
                    deleted += 1;
                }
            }
        }
        deleted
    }

    pub fn commit_append(&mut self, cid: CommitId, first_slot: usize, n: usize) {
        self.versions.commit_append(cid, first_slot, n);
    }

    pub fn revert_append(&mut self, first_slot: usize, n: usize) {
        self.versions.revert_append(first_slot, n);
        // Reverted update slots must stop shadowing the id index.
        for slot in first_slot..(first_slot + n).min(self.row_ids.len()) {
            let id = self.row_ids[slot];
            if self.id_index.get(&id) == Some(&slot) {
                if let Some(prev) = (0..slot).rev().find(|&s| self.row_ids[s] == id) {
                    self.id_index.insert(id, prev);
                } else {
                    self.id_index.remove(&id);
                }
            }
        }
    }

    pub fn commit_deletes(&mut self, txn: TxnId, cid: CommitId) -> Vec<usize> {
        self.versions.commit_deletes(txn, cid)
    }

    pub fn revert_deletes(&mut self, txn: TxnId) {
        self.versions.revert_deletes(txn);
    }

    pub fn cleanup_versions(&mut self, lowest_active_start_time: u64) {
        self.versions.cleanup(lowest_active_start_time);
    }

    #[must_use]
    pub fn dead_ratio(&self) -> f64 {
        self.versions.dead_ratio()
    }

    /// Drop dead slots and renumber. Row ids survive; physical slots
    /// shift down.
    pub fn compact(&mut self) {
        let dead = self.versions.dead_slots();
        if dead.is_empty() {
            return;
        }
        let mut keep = vec![true; self.row_ids.len()];
        for &slot in &dead {
            keep[slot] = false;
        }
        for segment in &mut self.segments {
            segment.retain(&keep);
        }
        let mut row_ids = Vec::with_capacity(self.row_ids.len() - dead.len());
        for (slot, id) in self.row_ids.iter().enumerate() {
            if keep[slot] {
                row_ids.push(*id);
            }
        }
        self.row_ids = row_ids;
        self.versions.retain_alive(&dead);
        self.rebuild_index();
    }
}
