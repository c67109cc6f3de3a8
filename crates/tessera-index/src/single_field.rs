//! The single-field in-memory index.
//!
//! Entries live in a committed store ordered by key; each mutation
//! under a transaction first lands in that transaction's pending set
//! and only moves into the committed store at commit. The committed
//! store tags entries with the commit id so search can honor reader
//! snapshots.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use tessera_types::{CompareOp, Value};

/// Transaction id; `0` means "commit directly".
pub type TxnId = u64;
/// Commit stamp; `0` marks entries that predate MVCC tracking.
pub type CommitId = u64;

/// Ordered column paths an index covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexKeys(pub Vec<String>);

impl IndexKeys {
    #[must_use]
    pub fn single(path: impl Into<String>) -> Self {
        Self(vec![path.into()])
    }

    #[must_use]
    pub fn primary(&self) -> &str {
        self.0.first().map_or("", String::as_str)
    }
}

/// Index flavors; only single-field is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    SingleField,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CommittedEntry {
    row_id: i64,
    cid: CommitId,
    /// Set while a transaction holds a pending delete on this entry.
    delete_owner: TxnId,
}

/// One single-field index: committed store plus per-transaction
/// pending inserts and deletes.
#[derive(Debug)]
pub struct SingleFieldIndex {
    name: String,
    keys: IndexKeys,
    committed: BTreeMap<Value, Vec<CommittedEntry>>,
    pending_inserts: HashMap<TxnId, Vec<(Value, i64)>>,
    pending_deletes: HashMap<TxnId, Vec<(Value, i64)>>,
}

impl SingleFieldIndex {
    #[must_use]
    pub fn new(name: impl Into<String>, keys: IndexKeys) -> Self {
        Self {
            name: name.into(),
            keys,
            committed: BTreeMap::new(),
            pending_inserts: HashMap::new(),
            pending_deletes: HashMap::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn keys(&self) -> &IndexKeys {
        &self.keys
    }

    #[must_use]
    pub const fn kind(&self) -> IndexKind {
        IndexKind::SingleField
    }

    /// Total committed pairs (pending excluded).
    #[must_use]
    pub fn committed_len(&self) -> usize {
        self.committed.values().map(Vec::len).sum()
    }

    // -- mutation -----------------------------------------------------------

    /// Insert a pair. `txn_id == 0` writes the committed store
    /// directly (always visible); otherwise the pair waits in the
    /// transaction's pending set.
    pub fn insert(&mut self, key: Value, row_id: i64, txn_id: TxnId) {
        if txn_id == 0 {
            self.commit_pair(key, row_id, 0);
        } else {
            self.pending_inserts
                .entry(txn_id)
                .or_default()
                .push((key, row_id));
        }
    }

    /// Mark a pair for deletion. `txn_id == 0` removes it at once;
    /// otherwise the committed entry stays visible to other readers
    /// until commit.
    pub fn mark_delete(&mut self, key: Value, row_id: i64, txn_id: TxnId) {
        if txn_id == 0 {
            self.remove_pair(&key, row_id);
            return;
        }
        if let Some(entries) = self.committed.get_mut(&key) {
            for entry in entries.iter_mut() {
                if entry.row_id == row_id && entry.delete_owner == 0 {
                    entry.delete_owner = txn_id;
                    break;
                }
            }
        }
        self.pending_deletes
            .entry(txn_id)
            .or_default()
            .push((key, row_id));
    }

    /// Publish a transaction's pending inserts at `cid`. Returns the
    /// batch the disk mirror must now apply.
    pub fn commit_insert(&mut self, txn_id: TxnId, cid: CommitId) -> Vec<(Value, i64)> {
        let batch = self.pending_inserts.remove(&txn_id).unwrap_or_default();
        for (key, row_id) in &batch {
            self.commit_pair(key.clone(), *row_id, cid);
        }
        batch
    }

    /// Apply a transaction's pending deletes: the pairs leave the
    /// committed store. Returns the batch for the disk mirror.
    pub fn commit_delete(&mut self, txn_id: TxnId, _cid: CommitId) -> Vec<(Value, i64)> {
        let batch = self.pending_deletes.remove(&txn_id).unwrap_or_default();
        for (key, row_id) in &batch {
            self.remove_pair(key, *row_id);
        }
        batch
    }

    /// Drop a transaction's pending inserts.
    pub fn revert_insert(&mut self, txn_id: TxnId) {
        self.pending_inserts.remove(&txn_id);
    }

    /// Clear a transaction's pending deletes and unmark the committed
    /// entries it had claimed.
    pub fn revert_delete(&mut self, txn_id: TxnId) {
        if let Some(batch) = self.pending_deletes.remove(&txn_id) {
            for (key, row_id) in batch {
                if let Some(entries) = self.committed.get_mut(&key) {
                    for entry in entries.iter_mut() {
                        if entry.row_id == row_id && entry.delete_owner == txn_id {
                            entry.delete_owner = 0;
                        }
                    }
                }
            }
        }
    }

    /// Collapse commit stamps at or below `lowest` into the
    /// always-visible form.
    pub fn cleanup_versions(&mut self, lowest: u64) {
        for entries in self.committed.values_mut() {
            for entry in entries.iter_mut() {
                if entry.cid != 0 && entry.cid <= lowest {
                    entry.cid = 0;
                }
            }
        }
    }

    // -- search -------------------------------------------------------------

    /// Row ids matching `compare value` that are visible to a reader
    /// at `(start_time, txn_id)`.
    #[must_use]
    pub fn search(
        &self,
        compare: CompareOp,
        value: &Value,
        start_time: u64,
        txn_id: TxnId,
    ) -> Vec<i64> {
        let mut out = Vec::new();

        let visible = |entry: &CommittedEntry| {
            if entry.cid > start_time {
                return false;
            }
            // Our own pending delete already hides the entry from us;
            // other transactions keep seeing it until commit.
            !(txn_id != 0 && entry.delete_owner == txn_id)
        };

        match compare {
            CompareOp::Eq => {
                if let Some(entries) = self.committed.get(value) {
                    out.extend(entries.iter().filter(|e| visible(e)).map(|e| e.row_id));
                }
            }
            CompareOp::Ne => {
                // Everything below, then everything above.
                for (_, entries) in self.committed.range(..value.clone()) {
                    out.extend(entries.iter().filter(|e| visible(e)).map(|e| e.row_id));
                }
                for (k, entries) in self.committed.range(value.clone()..) {
                    if k == value {
                        continue;
                    }
                    out.extend(entries.iter().filter(|e| visible(e)).map(|e| e.row_id));
                }
            }
            CompareOp::Lt => {
                for (_, entries) in self.committed.range(..value.clone()) {
                    out.extend(entries.iter().filter(|e| visible(e)).map(|e| e.row_id));
                }
            }
            CompareOp::Gt => {
                for (k, entries) in self.committed.range(value.clone()..) {
                    if k == value {
                        continue;
                    }
                    out.extend(entries.iter().filter(|e| visible(e)).map(|e| e.row_id));
                }
            }
            CompareOp::Lte => {
                for (_, entries) in self.committed.range(..=value.clone()) {
                    out.extend(entries.iter().filter(|e| visible(e)).map(|e| e.row_id));
                }
            }
            CompareOp::Gte => {
                for (_, entries) in self.committed.range(value.clone()..) {
                    out.extend(entries.iter().filter(|e| visible(e)).map(|e| e.row_id));
                }
            }
        }

        // A transaction also sees its own uncommitted inserts.
        if txn_id != 0 {
            if let Some(pending) = self.pending_inserts.get(&txn_id) {
                for (key, row_id) in pending {
                    if compare.matches(key.compare(value)) {
                        out.push(*row_id);
                    }
                }
            }
        }
        out
    }

    /// Every committed pair, for mirror rebuilds.
    #[must_use]
    pub fn committed_pairs(&self) -> Vec<(Value, i64)> {
        self.committed
            .iter()
            .flat_map(|(k, entries)| entries.iter().map(move |e| (k.clone(), e.row_id)))
            .collect()
    }

    fn commit_pair(&mut self, key: Value, row_id: i64, cid: CommitId) {
        let entries = self.committed.entry(key).or_default();
        if !entries.iter().any(|e| e.row_id == row_id) {
            entries.push(CommittedEntry {
                row_id,
                cid,
                delete_owner: 0,
            });
        }
    }

    fn remove_pair(&mut self, key: &Value, row_id: i64) {
        if let Some(entries) = self.committed.get_mut(key) {
            entries.retain(|e| e.row_id != row_id);
            if entries.is_empty() {
                self.committed.remove(key);
            }
        }
    }
}
