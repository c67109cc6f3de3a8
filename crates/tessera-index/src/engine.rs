//! The per-collection index engine.
//!
//! A registry of indexes keyed by name and by key schema. Mutations
//! broadcast to every index whose key column appears in the chunk;
//! commit drains the matching pending sets and forwards the batches to
//! each index's disk agent.

use tracing::debug;

use tessera_types::{CompareOp, DataChunk, Value};

use crate::agent::DiskAgentHandle;
use crate::single_field::{CommitId, IndexKeys, SingleFieldIndex, TxnId};

struct IndexSlot {
    index: SingleFieldIndex,
    agent: Option<DiskAgentHandle>,
}

/// All indexes of one collection.
#[derive(Default)]
pub struct IndexEngine {
    slots: Vec<IndexSlot>,
}

impl std::fmt::Debug for IndexEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexEngine")
            .field("indexes", &self.slots.len())
            .finish()
    }
}

impl IndexEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an index; re-registering a name replaces nothing and
    /// reports `false`.
    pub fn add_index(
        &mut self,
        name: impl Into<String>,
        keys: IndexKeys,
        agent: Option<DiskAgentHandle>,
    ) -> bool {
        let name = name.into();
        if self.has_index(&name) {
            return false;
        }
        debug!(index = %name, key = keys.primary(), "index registered");
        self.slots.push(IndexSlot {
            index: SingleFieldIndex::new(name, keys),
            agent,
        });
        true
    }

    /// Remove an index, handing back its agent for teardown.
    pub fn drop_index(&mut self, name: &str) -> Option<DiskAgentHandle> {
        let pos = self.slots.iter().position(|s| s.index.name() == name)?;
        let slot = self.slots.remove(pos);
        slot.agent
    }

    #[must_use]
    pub fn has_index(&self, name: &str) -> bool {
        self.slots.iter().any(|s| s.index.name() == name)
    }

    #[must_use]
    pub fn has_index_on(&self, keys: &IndexKeys) -> bool {
        self.slots.iter().any(|s| s.index.keys() == keys)
    }

    #[must_use]
    pub fn index_names(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|s| s.index.name().to_owned())
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Key value this row holds for `keys`, if the chunk carries the
    /// column.
    fn key_value(chunk: &DataChunk, row: usize, keys: &IndexKeys) -> Option<Value> {
        let col = chunk.column_index(keys.primary())?;
        let value = chunk.value(col, row);
        if value.is_null() { None } else { Some(value) }
    }

    /// Dispatch one row's insert to every index whose key column the
    /// chunk carries.
    pub fn insert_row(&mut self, chunk: &DataChunk, row: usize, row_id: i64, txn_id: TxnId) {
        for slot in &mut self.slots {
            if let Some(key) = Self::key_value(chunk, row, slot.index.keys()) {
                slot.index.insert(key, row_id, txn_id);
            }
        }
    }

    /// Dispatch one row's delete mark.
    pub fn mark_delete_row(&mut self, chunk: &DataChunk, row: usize, row_id: i64, txn_id: TxnId) {
        for slot in &mut self.slots {
            if let Some(key) = Self::key_value(chunk, row, slot.index.keys()) {
                slot.index.mark_delete(key, row_id, txn_id);
            }
        }
    }

    /// Enumerate the disk-mirrored indexes this row touches.
    pub fn for_each_disk_op(
        &self,
        chunk: &DataChunk,
        row: usize,
        mut f: impl FnMut(&DiskAgentHandle, Value),
    ) {
        for slot in &self.slots {
            if let Some(agent) = &slot.agent {
                if let Some(key) = Self::key_value(chunk, row, slot.index.keys()) {
                    f(agent, key);
                }
            }
        }
    }

    /// Commit pending inserts of `txn` everywhere; each drained batch
    /// goes straight to that index's disk agent.
    pub fn commit_insert(&mut self, txn_id: TxnId, cid: CommitId) {
        for slot in &mut self.slots {
            let batch = slot.index.commit_insert(txn_id, cid);
            if let Some(agent) = &slot.agent {
                agent.insert_many(batch);
            }
        }
    }

    /// Commit pending deletes of `txn` everywhere, mirroring removals.
    pub fn commit_delete(&mut self, txn_id: TxnId, cid: CommitId) {
        for slot in &mut self.slots {
            let batch = slot.index.commit_delete(txn_id, cid);
            if let Some(agent) = &slot.agent {
                agent.remove_many(batch);
            }
        }
    }

    pub fn revert_insert(&mut self, txn_id: TxnId) {
        for slot in &mut self.slots {
            slot.index.revert_insert(txn_id);
        }
    }

    pub fn revert_delete(&mut self, txn_id: TxnId) {
        for slot in &mut self.slots {
            slot.index.revert_delete(txn_id);
        }
    }

    pub fn cleanup_versions(&mut self, lowest: u64) {
        for slot in &mut self.slots {
            slot.index.cleanup_versions(lowest);
        }
    }

    /// Search the index covering `key_path`.
    #[must_use]
    pub fn search(
        &self,
        key_path: &str,
        compare: CompareOp,
        value: &Value,
        start_time: u64,
        txn_id: TxnId,
    ) -> Option<Vec<i64>> {
        self.slots
            .iter()
            .find(|s| s.index.keys().primary() == key_path)
            .map(|s| s.index.search(compare, value, start_time, txn_id))
    }

    /// Rebuild every disk mirror from the committed in-memory state.
    pub async fn rebuild_mirrors(&self) {
        for slot in &self.slots {
            if let Some(agent) = &slot.agent {
                agent.insert_many(slot.index.committed_pairs());
                agent.flush().await;
            }
        }
    }

    /// Barrier: wait for every agent to drain and persist.
    pub async fn flush_all(&self) {
        for slot in &self.slots {
            if let Some(agent) = &slot.agent {
                agent.flush().await;
            }
        }
    }

    /// The agents currently attached, for teardown.
    #[must_use]
    pub fn agents(&self) -> Vec<DiskAgentHandle> {
        self.slots
            .iter()
            .filter_map(|s| s.agent.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::{ComplexLogicalType, LogicalType, VECTOR_CAPACITY};

    fn chunk(xs: &[i32]) -> DataChunk {
        let types = vec![
            ComplexLogicalType::from(LogicalType::BigInt).with_alias("_id"),
            ComplexLogicalType::from(LogicalType::Integer).with_alias("x"),
        ];
        let mut chunk = DataChunk::new(&types, VECTOR_CAPACITY);
        for (i, x) in xs.iter().enumerate() {
            chunk
                .append_row(&[Value::bigint(i as i64), Value::integer(*x)])
                .unwrap();
        }
        chunk
    }

    #[test]
    fn broadcasts_to_matching_indexes() {
        let mut engine = IndexEngine::new();
        engine.add_index("x_idx", IndexKeys::single("x"), None);
        engine.add_index("id_idx", IndexKeys::single("_id"), None);

        let data = chunk(&[7, 8]);
        engine.insert_row(&data, 0, 100, 0);
        engine.insert_row(&data, 1, 101, 0);

        assert_eq!(
            engine.search("x", CompareOp::Eq, &Value::integer(8), 0, 0),
            Some(vec![101])
        );
        assert_eq!(
            engine.search("_id", CompareOp::Eq, &Value::bigint(0), 0, 0),
            Some(vec![100])
        );
        assert_eq!(
            engine.search("missing", CompareOp::Eq, &Value::integer(8), 0, 0),
            None
        );
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut engine = IndexEngine::new();
        assert!(engine.add_index("x_idx", IndexKeys::single("x"), None));
        assert!(!engine.add_index("x_idx", IndexKeys::single("y"), None));
        assert!(engine.has_index_on(&IndexKeys::single("x")));
    }

    #[test]
    fn txn_commit_publishes_everywhere() {
        let mut engine = IndexEngine::new();
        engine.add_index("x_idx", IndexKeys::single("x"), None);
        let data = chunk(&[7]);
        engine.insert_row(&data, 0, 42, 5);
        assert_eq!(
            engine.search("x", CompareOp::Eq, &Value::integer(7), 100, 0),
            Some(vec![])
        );
        engine.commit_insert(5, 20);
        assert_eq!(
            engine.search("x", CompareOp::Eq, &Value::integer(7), 20, 0),
            Some(vec![42])
        );
    }

    #[tokio::test]
    async fn disk_ops_enumerate_mirrored_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let agent = crate::agent::spawn_disk_agent("x_idx", dir.path()).unwrap();
        let mut engine = IndexEngine::new();
        engine.add_index("x_idx", IndexKeys::single("x"), Some(agent));
        engine.add_index("mem_idx", IndexKeys::single("_id"), None);

        let data = chunk(&[7]);
        let mut seen = Vec::new();
        engine.for_each_disk_op(&data, 0, |agent, key| {
            seen.push((agent.name().to_owned(), key));
        });
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "x_idx");
        assert_eq!(seen[0].1.as_i64(), Some(7));
    }

    #[tokio::test]
    async fn commit_mirrors_to_disk_agents() {
        let dir = tempfile::tempdir().unwrap();
        let agent = crate::agent::spawn_disk_agent("x_idx", dir.path()).unwrap();
        let mut engine = IndexEngine::new();
        engine.add_index("x_idx", IndexKeys::single("x"), Some(agent.clone()));

        let data = chunk(&[7]);
        engine.insert_row(&data, 0, 42, 5);
        // Nothing on disk before commit.
        assert!(agent.find(Value::integer(7)).await.is_empty());
        engine.commit_insert(5, 20);
        engine.flush_all().await;
        assert_eq!(agent.find(Value::integer(7)).await, vec![42]);
    }
}
