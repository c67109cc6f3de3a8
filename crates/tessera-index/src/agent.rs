//! Per-index disk agents.
//!
//! Each agent is a task owning one disk B+-tree; the index manager
//! talks to it only through its mailbox, so tree state is never shared
//! mutably. Mirror writes happen at commit time; an IO failure is
//! logged and the in-memory index stays authoritative until the next
//! rebuild.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use tessera_block::manager::BlockManager;
use tessera_btree::BPlusTree;
use tessera_error::Result;
use tessera_types::Value;

const INDEX_FILE: &str = "index.otbx";

/// Mailbox messages a disk agent understands.
#[derive(Debug)]
pub enum AgentRequest {
    InsertMany(Vec<(Value, i64)>),
    RemoveMany(Vec<(Value, i64)>),
    Find(Value, oneshot::Sender<Vec<i64>>),
    LowerBound(Value, oneshot::Sender<Vec<i64>>),
    UpperBound(Value, oneshot::Sender<Vec<i64>>),
    /// Persist and answer when durable; doubles as a barrier.
    Flush(oneshot::Sender<()>),
}

/// Cheap handle to one agent's mailbox.
#[derive(Debug, Clone)]
pub struct DiskAgentHandle {
    name: String,
    dir: PathBuf,
    tx: mpsc::UnboundedSender<AgentRequest>,
}

impl DiskAgentHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Queue a mirror batch; never fails the caller.
    pub fn insert_many(&self, batch: Vec<(Value, i64)>) {
        if batch.is_empty() {
            return;
        }
        let _ = self.tx.send(AgentRequest::InsertMany(batch));
    }

    /// Queue a mirror removal batch; never fails the caller.
    pub fn remove_many(&self, batch: Vec<(Value, i64)>) {
        if batch.is_empty() {
            return;
        }
        let _ = self.tx.send(AgentRequest::RemoveMany(batch));
    }

    pub async fn find(&self, key: Value) -> Vec<i64> {
        self.ask(|reply| AgentRequest::Find(key, reply)).await
    }

    pub async fn lower_bound(&self, key: Value) -> Vec<i64> {
        self.ask(|reply| AgentRequest::LowerBound(key, reply)).await
    }

    pub async fn upper_bound(&self, key: Value) -> Vec<i64> {
        self.ask(|reply| AgentRequest::UpperBound(key, reply)).await
    }

    /// Wait until every queued batch is applied and the tree is on
    /// disk.
    pub async fn flush(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(AgentRequest::Flush(reply)).is_ok() {
            let _ = rx.await;
        }
    }

    async fn ask(&self, make: impl FnOnce(oneshot::Sender<Vec<i64>>) -> AgentRequest) -> Vec<i64> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(make(reply)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

/// Spawn the agent for one index, creating or reopening its tree under
/// `dir` (`<db>/<collection>/<index_name>/`).
pub fn spawn_disk_agent(name: impl Into<String>, dir: &Path) -> Result<DiskAgentHandle> {
    let name = name.into();
    std::fs::create_dir_all(dir)?;
    let path = dir.join(INDEX_FILE);
    let block = if path.exists() {
        Arc::new(BlockManager::load_existing(&path)?)
    } else {
        Arc::new(BlockManager::create_file(&path)?)
    };
    let tree = BPlusTree::load(block)?;
    let (tx, rx) = mpsc::unbounded_channel();
    let agent_name = name.clone();
    tokio::spawn(run_agent(agent_name, tree, rx));
    Ok(DiskAgentHandle {
        name,
        dir: dir.to_path_buf(),
        tx,
    })
}

async fn run_agent(
    name: String,
    mut tree: BPlusTree,
    mut rx: mpsc::UnboundedReceiver<AgentRequest>,
) {
    debug!(index = %name, "disk agent started");
    while let Some(request) = rx.recv().await {
        match request {
            AgentRequest::InsertMany(batch) => tree.insert_many(batch),
            AgentRequest::RemoveMany(batch) => tree.remove_many(batch),
            AgentRequest::Find(key, reply) => {
                let _ = reply.send(tree.find(&key));
            }
            AgentRequest::LowerBound(key, reply) => {
                let _ = reply.send(tree.lower_bound(&key));
            }
            AgentRequest::UpperBound(key, reply) => {
                let _ = reply.send(tree.upper_bound(&key));
            }
            AgentRequest::Flush(reply) => {
                if let Err(e) = tree.flush() {
                    // The in-memory index stays authoritative; replay
                    // plus rebuild restores the mirror at next start.
                    error!(index = %name, error = %e, "index mirror flush failed");
                }
                let _ = reply.send(());
            }
        }
    }
    debug!(index = %name, "disk agent stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mirror_applies_batches_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let agent = spawn_disk_agent("x_idx", dir.path()).unwrap();
        agent.insert_many(vec![(Value::integer(1), 10), (Value::integer(2), 20)]);
        agent.remove_many(vec![(Value::integer(1), 10)]);
        assert!(agent.find(Value::integer(1)).await.is_empty());
        assert_eq!(agent.find(Value::integer(2)).await, vec![20]);
    }

    #[tokio::test]
    async fn flush_makes_the_tree_reloadable() {
        let dir = tempfile::tempdir().unwrap();
        {
            let agent = spawn_disk_agent("x_idx", dir.path()).unwrap();
            agent.insert_many(vec![(Value::string("k"), 7)]);
            agent.flush().await;
        }
        let agent = spawn_disk_agent("x_idx", dir.path()).unwrap();
        assert_eq!(agent.find(Value::string("k")).await, vec![7]);
    }

    #[tokio::test]
    async fn bounds_answer_through_the_mailbox() {
        let dir = tempfile::tempdir().unwrap();
        let agent = spawn_disk_agent("x_idx", dir.path()).unwrap();
        agent.insert_many((0..10).map(|i| (Value::integer(i), i as i64)).collect());
        assert_eq!(agent.lower_bound(Value::integer(3)).await.len(), 3);
        assert_eq!(agent.upper_bound(Value::integer(3)).await.len(), 6);
    }
}
