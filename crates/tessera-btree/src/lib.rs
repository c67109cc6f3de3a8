//! Disk-backed B+-tree.
//!
//! Keys are [`Value`]s, payloads are row ids; duplicate keys keep all
//! their row ids in one leaf entry. Nodes live in an index arena and
//! reference each other by handle, never by pointer. `flush` writes
//! the whole tree through the block manager's metadata chain and swaps
//! the header, so a crash between flushes falls back to the previous
//! image.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use tessera_block::manager::{BlockManager, meta_payload};
use tessera_block::{BlockId, BufferPool, CheckpointWriter, MetaReader};
use tessera_error::{Result, TesseraError};
use tessera_types::Value;

/// Maximum keys per node before it splits.
const ORDER: usize = 32;

/// Pages the tree's buffer pool keeps resident.
const TREE_POOL_PAGES: usize = 64;

type NodeId = usize;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        keys: Vec<Value>,
        /// Row ids per key, kept sorted.
        rows: Vec<Vec<i64>>,
        next: Option<NodeId>,
    },
    Internal {
        /// Separator keys; `children.len() == keys.len() + 1`.
        keys: Vec<Value>,
        children: Vec<NodeId>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct TreeImage {
    nodes: Vec<Node>,
    root: NodeId,
    len: usize,
}

/// A B+-tree bound to one block manager.
#[derive(Debug)]
pub struct BPlusTree {
    nodes: Vec<Node>,
    root: NodeId,
    /// Number of `(key, row_id)` pairs stored.
    len: usize,
    block: Arc<BlockManager>,
    pool: Arc<BufferPool>,
    meta_chain: Vec<BlockId>,
}

impl BPlusTree {
    /// An empty tree over `block`.
    #[must_use]
    pub fn new(block: Arc<BlockManager>) -> Self {
        let pool = BufferPool::new(Arc::clone(&block), TREE_POOL_PAGES);
        Self {
            nodes: vec![Node::Leaf {
                keys: Vec::new(),
                rows: Vec::new(),
                next: None,
            }],
            root: 0,
            len: 0,
            block,
            pool,
            meta_chain: Vec::new(),
        }
    }

    /// Rebuild a tree from the block manager's checkpointed image.
    pub fn load(block: Arc<BlockManager>) -> Result<Self> {
        let root = block.meta_block();
        if !root.is_valid() {
            return Ok(Self::new(block));
        }
        let pool = BufferPool::new(Arc::clone(&block), TREE_POOL_PAGES);
        let (blob, meta_chain) = MetaReader::read_through(&pool, root)?;
        let free_len = block.free_list_snapshot().len();
        let image: TreeImage = serde_json::from_slice(meta_payload(&blob, free_len))
            .map_err(|e| TesseraError::corrupt("meta block", format!("btree decode: {e}")))?;
        Ok(Self {
            nodes: image.nodes,
            root: image.root,
            len: image.len,
            block,
            pool,
            meta_chain,
        })
    }

    /// Number of stored `(key, row_id)` pairs.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    // -- mutation -----------------------------------------------------------

    /// Insert one pair; duplicate `(key, row_id)` is a no-op.
    pub fn insert(&mut self, key: Value, row_id: i64) {
        let leaf = self.find_leaf(&key);
        let Node::Leaf { keys, rows, .. } = &mut self.nodes[leaf] else {
            unreachable!("find_leaf returns leaves");
        };
        match keys.binary_search(&key) {
            Ok(pos) => {
                if let Err(ins) = rows[pos].binary_search(&row_id) {
                    rows[pos].insert(ins, row_id);
                    self.len += 1;
                }
            }
            Err(pos) => {
                keys.insert(pos, key);
                rows.insert(pos, vec![row_id]);
                self.len += 1;
            }
        }
        if self.node_len(leaf) > ORDER {
            self.split(leaf);
        }
    }

    /// Remove one pair; absent pairs are a no-op.
    pub fn remove(&mut self, key: &Value, row_id: i64) {
        let leaf = self.find_leaf(key);
        let Node::Leaf { keys, rows, .. } = &mut self.nodes[leaf] else {
            unreachable!("find_leaf returns leaves");
        };
        if let Ok(pos) = keys.binary_search(key) {
            if let Ok(rpos) = rows[pos].binary_search(&row_id) {
                rows[pos].remove(rpos);
                self.len -= 1;
                if rows[pos].is_empty() {
                    keys.remove(pos);
                    rows.remove(pos);
                }
            }
        }
    }

    /// Apply a batch of inserts.
    pub fn insert_many(&mut self, batch: Vec<(Value, i64)>) {
        for (key, row_id) in batch {
            self.insert(key, row_id);
        }
    }

    /// Apply a batch of removals.
    pub fn remove_many(&mut self, batch: Vec<(Value, i64)>) {
        for (key, row_id) in batch {
            self.remove(&key, row_id);
        }
    }

    // -- lookup -------------------------------------------------------------

    /// Row ids stored under exactly `key`.
    #[must_use]
    pub fn find(&self, key: &Value) -> Vec<i64> {
        let leaf = self.find_leaf(key);
        let Node::Leaf { keys, rows, .. } = &self.nodes[leaf] else {
            return Vec::new();
        };
        match keys.binary_search(key) {
            Ok(pos) => rows[pos].clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Row ids of every key strictly less than `key`.
    #[must_use]
    pub fn lower_bound(&self, key: &Value) -> Vec<i64> {
        let mut out = Vec::new();
        self.walk_leaves(|k, rows| {
            if k < key {
                out.extend_from_slice(rows);
                true
            } else {
                false
            }
        });
        out
    }

    /// Row ids of every key strictly greater than `key`.
    #[must_use]
    pub fn upper_bound(&self, key: &Value) -> Vec<i64> {
        let mut out = Vec::new();
        self.walk_leaves(|k, rows| {
            if k > key {
                out.extend_from_slice(rows);
            }
            true
        });
        out
    }

    /// Every `(key, row_id)` pair in key order.
    #[must_use]
    pub fn entries(&self) -> Vec<(Value, i64)> {
        let mut out = Vec::new();
        self.walk_leaves(|k, rows| {
            for &row in rows {
                out.push((k.clone(), row));
            }
            true
        });
        out
    }

    // -- durability ---------------------------------------------------------

    /// Persist the current image through the block manager.
    pub fn flush(&mut self) -> Result<()> {
        let image = TreeImage {
            nodes: self.nodes.clone(),
            root: self.root,
            len: self.len,
        };
        let payload = serde_json::to_vec(&image)
            .map_err(|e| TesseraError::execution(format!("btree serialize: {e}")))?;
        let old_chain = std::mem::take(&mut self.meta_chain);
        for id in &old_chain {
            self.pool.invalidate(*id);
        }
        self.meta_chain = CheckpointWriter::rewrite(&self.block, old_chain, &payload)?;
        debug!(pairs = self.len, blocks = self.meta_chain.len(), "btree flushed");
        Ok(())
    }

    // -- internals ----------------------------------------------------------

    fn node_len(&self, id: NodeId) -> usize {
        match &self.nodes[id] {
            Node::Leaf { keys, .. } | Node::Internal { keys, .. } => keys.len(),
        }
    }

    fn find_leaf(&self, key: &Value) -> NodeId {
        let mut id = self.root;
        loop {
            match &self.nodes[id] {
                Node::Leaf { .. } => return id,
                Node::Internal { keys, children } => {
                    let idx = match keys.binary_search(key) {
                        Ok(i) => i + 1,
                        Err(i) => i,
                    };
                    id = children[idx];
                }
            }
        }
    }

    /// Split an overfull node, pushing the separator into its parent
    /// (creating a new root when needed).
    fn split(&mut self, id: NodeId) {
        let (separator, right) = match &mut self.nodes[id] {
            Node::Leaf { keys, rows, next } => {
                let mid = keys.len() / 2;
                let right_keys = keys.split_off(mid);
                let right_rows = rows.split_off(mid);
                let separator = right_keys[0].clone();
                let right = Node::Leaf {
                    keys: right_keys,
                    rows: right_rows,
                    next: next.take(),
                };
                (separator, right)
            }
            Node::Internal { keys, children } => {
                let mid = keys.len() / 2;
                let mut right_keys = keys.split_off(mid);
                let separator = right_keys.remove(0);
                let right_children = children.split_off(mid + 1);
                let right = Node::Internal {
                    keys: right_keys,
                    children: right_children,
                };
                (separator, right)
            }
        };
        let right_id = self.nodes.len();
        self.nodes.push(right);
        if let Node::Leaf { next, .. } = &mut self.nodes[id] {
            *next = Some(right_id);
        }

        if id == self.root {
            let new_root = Node::Internal {
                keys: vec![separator],
                children: vec![id, right_id],
            };
            self.root = self.nodes.len();
            self.nodes.push(new_root);
            return;
        }

        let parent = self.parent_of(self.root, id).unwrap_or(self.root);
        if let Node::Internal { keys, children } = &mut self.nodes[parent] {
            let pos = keys.binary_search(&separator).unwrap_or_else(|i| i);
            keys.insert(pos, separator);
            children.insert(pos + 1, right_id);
        }
        if self.node_len(parent) > ORDER {
            self.split(parent);
        }
    }

    fn parent_of(&self, from: NodeId, target: NodeId) -> Option<NodeId> {
        if let Node::Internal { children, .. } = &self.nodes[from] {
            for &child in children {
                if child == target {
                    return Some(from);
                }
                if let found @ Some(_) = self.parent_of(child, target) {
                    return found;
                }
            }
        }
        None
    }

    /// Visit leaf entries in key order; the callback returning `false`
    /// stops the walk.
    fn walk_leaves(&self, mut visit: impl FnMut(&Value, &[i64]) -> bool) {
        let mut id = self.leftmost_leaf();
        loop {
            let Node::Leaf { keys, rows, next } = &self.nodes[id] else {
                return;
            };
            for (k, r) in keys.iter().zip(rows.iter()) {
                if !visit(k, r) {
                    return;
                }
            }
            match next {
                Some(n) => id = *n,
                None => return,
            }
        }
    }

    fn leftmost_leaf(&self) -> NodeId {
        let mut id = self.root;
        loop {
            match &self.nodes[id] {
                Node::Leaf { .. } => return id,
                Node::Internal { children, .. } => id = children[0],
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_tree() -> BPlusTree {
        BPlusTree::new(Arc::new(BlockManager::in_memory()))
    }

    #[test]
    fn insert_and_find() {
        let mut tree = memory_tree();
        tree.insert(Value::bigint(5), 50);
        tree.insert(Value::bigint(5), 51);
        tree.insert(Value::bigint(7), 70);
        assert_eq!(tree.find(&Value::bigint(5)), vec![50, 51]);
        assert_eq!(tree.find(&Value::bigint(7)), vec![70]);
        assert!(tree.find(&Value::bigint(9)).is_empty());
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn duplicate_pair_is_a_noop() {
        let mut tree = memory_tree();
        tree.insert(Value::string("k"), 1);
        tree.insert(Value::string("k"), 1);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn remove_drops_single_pairs() {
        let mut tree = memory_tree();
        tree.insert(Value::bigint(1), 10);
        tree.insert(Value::bigint(1), 11);
        tree.remove(&Value::bigint(1), 10);
        assert_eq!(tree.find(&Value::bigint(1)), vec![11]);
        tree.remove(&Value::bigint(1), 11);
        assert!(tree.find(&Value::bigint(1)).is_empty());
        assert!(tree.is_empty());
        // Removing an absent pair is harmless.
        tree.remove(&Value::bigint(1), 11);
    }

    #[test]
    fn splits_keep_order_under_bulk_insert() {
        let mut tree = memory_tree();
        // Enough keys to force several levels of splits.
        for i in (0..500).rev() {
            tree.insert(Value::bigint(i), i);
        }
        assert_eq!(tree.len(), 500);
        for i in 0..500 {
            assert_eq!(tree.find(&Value::bigint(i)), vec![i], "key {i}");
        }
        let all = tree.entries();
        let keys: Vec<i64> = all.iter().map(|(k, _)| k.as_i64().unwrap()).collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn bounds_partition_the_key_space() {
        let mut tree = memory_tree();
        for i in 0..100 {
            tree.insert(Value::bigint(i), i);
        }
        let below = tree.lower_bound(&Value::bigint(40));
        let exact = tree.find(&Value::bigint(40));
        let above = tree.upper_bound(&Value::bigint(40));
        assert_eq!(below.len(), 40);
        assert_eq!(exact, vec![40]);
        assert_eq!(above.len(), 59);
        assert!(below.iter().all(|&r| r < 40));
        assert!(above.iter().all(|&r| r > 40));
    }

    #[test]
    fn string_keys_order_lexicographically() {
        let mut tree = memory_tree();
        for name in ["mango", "apple", "kiwi", "banana"] {
            tree.insert(Value::string(name), name.len() as i64);
        }
        let below = tree.lower_bound(&Value::string("kiwi"));
        assert_eq!(below.len(), 2); // apple, banana
    }

    #[test]
    fn flush_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx.otbx");
        {
            let block = Arc::new(BlockManager::create_file(&path).unwrap());
            let mut tree = BPlusTree::new(block);
            for i in 0..64 {
                tree.insert(Value::bigint(i), i * 10);
            }
            tree.flush().unwrap();
        }
        let block = Arc::new(BlockManager::load_existing(&path).unwrap());
        let tree = BPlusTree::load(block).unwrap();
        assert_eq!(tree.len(), 64);
        assert_eq!(tree.find(&Value::bigint(9)), vec![90]);
    }

    #[test]
    fn repeated_flush_reuses_freed_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx.otbx");
        let block = Arc::new(BlockManager::create_file(&path).unwrap());
        let mut tree = BPlusTree::new(Arc::clone(&block));
        for round in 0..5 {
            tree.insert(Value::bigint(round), round);
            tree.flush().unwrap();
        }
        // Block usage stays bounded: freed chains are recycled.
        assert!(block.live_block_count() < 16);
    }
}
