//! MVCC version state.
//!
//! Every physical row slot carries two records: how its insert became
//! visible and whether a delete shadows it. Visibility is a pure
//! function of those records and the reading transaction's
//! `(start_time, id)` pair. Commit and revert are total: they never
//! leave a slot in a state the visibility rule cannot answer.

use serde::{Deserialize, Serialize};

/// Transaction identifier; `0` is the passive reader.
pub type TxnId = u64;
/// Commit stamp; always `> 0`, `0` is reserved for "uncommitted".
pub type CommitId = u64;

/// The triple a transaction carries through storage and index calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxnId,
    pub start_time: u64,
    pub commit_id: CommitId,
}

impl Transaction {
    /// A passive reader: sees only data committed at or before
    /// `start_time`, owns no pending writes.
    #[must_use]
    pub const fn reader(start_time: u64) -> Self {
        Self {
            id: 0,
            start_time,
            commit_id: 0,
        }
    }

    /// An active writer.
    #[must_use]
    pub const fn active(id: TxnId, start_time: u64) -> Self {
        Self {
            id,
            start_time,
            commit_id: 0,
        }
    }

    /// A reader positioned after everything committed so far.
    #[must_use]
    pub const fn latest() -> Self {
        Self::reader(u64::MAX)
    }
}

/// How a row slot's insert became (or failed to become) visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertInfo {
    /// History collapsed by cleanup, or a direct non-MVCC append.
    AlwaysVisible,
    Committed(CommitId),
    Pending(TxnId),
    /// A reverted pending insert; the slot is dead for every reader.
    Reverted,
}

/// Whether a delete shadows a row slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeleteInfo {
    #[default]
    None,
    Pending(TxnId),
    Committed(CommitId),
    /// Collapsed committed delete or direct non-MVCC delete.
    Tombstone,
}

/// Version records for every slot of one row group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionChain {
    inserts: Vec<InsertInfo>,
    deletes: Vec<DeleteInfo>,
    committed_rows: usize,
}

impl VersionChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inserts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
    }

    /// Rows whose insert has committed (collapsed history included).
    #[must_use]
    pub const fn committed_row_count(&self) -> usize {
        self.committed_rows
    }

    #[must_use]
    pub fn insert_info(&self, slot: usize) -> InsertInfo {
        self.inserts
            .get(slot)
            .copied()
            .unwrap_or(InsertInfo::Reverted)
    }

    #[must_use]
    pub fn delete_info(&self, slot: usize) -> DeleteInfo {
        self.deletes.get(slot).copied().unwrap_or_default()
    }

    /// Register `n` freshly appended slots. `txn_id == 0` means a
    /// direct append that is immediately visible to everyone.
    pub fn register_append(&mut self, n: usize, txn_id: TxnId) {
        let info = if txn_id == 0 {
            self.committed_rows += n;
            InsertInfo::AlwaysVisible
        } else {
            InsertInfo::Pending(txn_id)
        };
        self.inserts.extend(std::iter::repeat_n(info, n));
        self.deletes.extend(std::iter::repeat_n(DeleteInfo::None, n));
    }

    /// A slot is visible when its insert is visible to `txn` and no
    /// delete shadows it from `txn`'s point of view.
    #[must_use]
    pub fn is_visible(&self, slot: usize, txn: &Transaction) -> bool {
        let insert_ok = match self.insert_info(slot) {
            InsertInfo::AlwaysVisible => true,
            InsertInfo::Committed(cid) => cid <= txn.start_time,
            InsertInfo::Pending(owner) => txn.id != 0 && owner == txn.id,
            InsertInfo::Reverted => false,
        };
        if !insert_ok {
            return false;
        }
        match self.delete_info(slot) {
            DeleteInfo::None => true,
            DeleteInfo::Committed(cid) => cid > txn.start_time,
            DeleteInfo::Pending(owner) => !(txn.id != 0 && owner == txn.id),
            DeleteInfo::Tombstone => false,
        }
    }

    /// Mark a slot deleted. `txn_id == 0` tombstones it for everyone.
    /// Returns whether the slot was still deletable.
    pub fn mark_delete(&mut self, slot: usize, txn_id: TxnId) -> bool {
        let Some(entry) = self.deletes.get_mut(slot) else {
            return false;
        };
        match *entry {
            DeleteInfo::None => {
                *entry = if txn_id == 0 {
                    DeleteInfo::Tombstone
                } else {
                    DeleteInfo::Pending(txn_id)
                };
                true
            }
            // Re-deleting our own pending delete is a no-op success.
            DeleteInfo::Pending(owner) if owner == txn_id => true,
            _ => false,
        }
    }

    /// Move pending inserts of the slot range to committed at `cid`.
    pub fn commit_append(&mut self, cid: CommitId, start: usize, n: usize) {
        debug_assert!(cid > 0);
        for slot in start..(start + n).min(self.inserts.len()) {
            if matches!(self.inserts[slot], InsertInfo::Pending(_)) {
                self.inserts[slot] = InsertInfo::Committed(cid);
                self.committed_rows += 1;
            }
        }
    }

    /// Erase pending inserts of the slot range.
    pub fn revert_append(&mut self, start: usize, n: usize) {
        for slot in start..(start + n).min(self.inserts.len()) {
            if matches!(self.inserts[slot], InsertInfo::Pending(_)) {
                self.inserts[slot] = InsertInfo::Reverted;
                // A reverted insert cannot stay shadowed.
                self.deletes[slot] = DeleteInfo::None;
            }
        }
    }

    /// Commit every pending delete of `txn` at `cid`. Returns the
    /// affected slots.
    pub fn commit_deletes(&mut self, txn: TxnId, cid: CommitId) -> Vec<usize> {
        debug_assert!(cid > 0);
        let mut out = Vec::new();
        for (slot, entry) in self.deletes.iter_mut().enumerate() {
            if *entry == DeleteInfo::Pending(txn) {
                *entry = DeleteInfo::Committed(cid);
                out.push(slot);
            }
        }
        out
    }

    /// Clear every pending delete of `txn`.
    pub fn revert_deletes(&mut self, txn: TxnId) {
        for entry in &mut self.deletes {
            if *entry == DeleteInfo::Pending(txn) {
                *entry = DeleteInfo::None;
            }
        }
    }

    /// Collapse history entirely below `lowest_active_start_time`:
    /// committed inserts become always-visible, committed deletes
    /// become tombstones. Keeps `committed_row_count` in step.
    pub fn cleanup(&mut self, lowest_active_start_time: u64) {
        for slot in 0..self.inserts.len() {
            if let DeleteInfo::Committed(cid) = self.deletes[slot] {
                if cid <= lowest_active_start_time {
                    self.deletes[slot] = DeleteInfo::Tombstone;
                }
            }
            if let InsertInfo::Committed(cid) = self.inserts[slot] {
                if cid <= lowest_active_start_time
                    && matches!(self.deletes[slot], DeleteInfo::None)
                {
                    self.inserts[slot] = InsertInfo::AlwaysVisible;
                }
            }
        }
    }

    /// Slots no reader can ever see again (reverted or tombstoned).
    #[must_use]
    pub fn dead_slots(&self) -> Vec<usize> {
        (0..self.inserts.len())
            .filter(|&slot| {
                matches!(self.inserts[slot], InsertInfo::Reverted)
                    || matches!(self.deletes[slot], DeleteInfo::Tombstone)
            })
            .collect()
    }

    /// Fraction of slots that are dead; drives `maybe_cleanup`.
    #[must_use]
    pub fn dead_ratio(&self) -> f64 {
        if self.inserts.is_empty() {
            return 0.0;
        }
        self.dead_slots().len() as f64 / self.inserts.len() as f64
    }

    /// Drop the slots in `dead` (ascending), renumbering the rest.
    pub fn retain_alive(&mut self, dead: &[usize]) {
        let mut keep = vec![true; self.inserts.len()];
        for &slot in dead {
            if slot < keep.len() {
                keep[slot] = false;
            }
        }
        let mut inserts = Vec::with_capacity(self.inserts.len() - dead.len());
        let mut deletes = Vec::with_capacity(self.deletes.len() - dead.len());
        self.committed_rows = 0;
        for slot in 0..self.inserts.len() {
            if keep[slot] {
                if matches!(
                    self.inserts[slot],
                    InsertInfo::AlwaysVisible | InsertInfo::Committed(_)
                ) {
                    self.committed_rows += 1;
                }
                inserts.push(self.inserts[slot]);
                deletes.push(self.deletes[slot]);
            }
        }
        self.inserts = inserts;
        self.deletes = deletes;
    }
}
