//! The index service mailbox.
//!
//! One task owns every collection's index engine plus the manager-level
//! metadata file. Per-transaction pending state is only ever touched by
//! that transaction's handler call, and a commit happens inside one
//! handler body, so it is atomic from the manager's point of view.
//! Disk mirrors apply at commit through each index's agent mailbox.

use std::path::PathBuf;

use hashbrown::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use tessera_error::{Result, TesseraError};
use tessera_index::{
    DiskAgentHandle, IndexEngine, IndexKeys, IndexMeta, IndexMetaFile, spawn_disk_agent,
};
use tessera_storage::CollectionFullName;
use tessera_types::{CompareOp, DataChunk, Value};

enum IndexRequest {
    RegisterCollection(CollectionFullName, oneshot::Sender<()>),
    UnregisterCollection(CollectionFullName, oneshot::Sender<()>),
    CreateIndex {
        name: CollectionFullName,
        index_name: String,
        keys: IndexKeys,
        on_disk: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    DropIndex {
        name: CollectionFullName,
        index_name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    HasIndex {
        name: CollectionFullName,
        index_name: String,
        reply: oneshot::Sender<bool>,
    },
    InsertRows {
        name: CollectionFullName,
        chunk: DataChunk,
        start_row_id: i64,
        count: usize,
        txn_id: u64,
        reply: oneshot::Sender<()>,
    },
    DeleteRows {
        name: CollectionFullName,
        chunk: DataChunk,
        row_ids: Vec<i64>,
        txn_id: u64,
        reply: oneshot::Sender<()>,
    },
    UpdateRows {
        name: CollectionFullName,
        old_chunk: DataChunk,
        new_chunk: DataChunk,
        row_ids: Vec<i64>,
        txn_id: u64,
        reply: oneshot::Sender<()>,
    },
    CommitInsert {
        name: CollectionFullName,
        txn_id: u64,
        cid: u64,
        reply: oneshot::Sender<()>,
    },
    CommitDelete {
        name: CollectionFullName,
        txn_id: u64,
        cid: u64,
        reply: oneshot::Sender<()>,
    },
    RevertInsert {
        name: CollectionFullName,
        txn_id: u64,
        reply: oneshot::Sender<()>,
    },
    RevertDelete {
        name: CollectionFullName,
        txn_id: u64,
        reply: oneshot::Sender<()>,
    },
    Search {
        name: CollectionFullName,
        key_path: String,
        compare: CompareOp,
        value: Value,
        start_time: u64,
        txn_id: u64,
        reply: oneshot::Sender<Result<Vec<i64>>>,
    },
    CleanupAllVersions(u64, oneshot::Sender<()>),
    RebuildIndexes(CollectionFullName, oneshot::Sender<()>),
    FlushAllIndexes(oneshot::Sender<()>),
}

/// Client half of the index service.
#[derive(Clone)]
pub struct IndexServiceHandle {
    tx: mpsc::UnboundedSender<IndexRequest>,
}

impl std::fmt::Debug for IndexServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexServiceHandle").finish_non_exhaustive()
    }
}

struct IndexService {
    engines: HashMap<CollectionFullName, IndexEngine>,
    /// Root for index directories and the metadata file; `None` keeps
    /// every index purely in memory.
    base_dir: Option<PathBuf>,
    meta: Option<IndexMetaFile>,
}

/// Spawn the index service. With a base directory, previously recorded
/// indexes are reconstructed (engines plus disk agents) before the
/// mailbox opens.
pub fn spawn_index_service(base_dir: Option<PathBuf>) -> IndexServiceHandle {
    let meta = base_dir.as_deref().map(IndexMetaFile::new);
    let mut service = IndexService {
        engines: HashMap::new(),
        base_dir,
        meta,
    };
    service.reconstruct();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_service(service, rx));
    IndexServiceHandle { tx }
}

impl IndexServiceHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> IndexRequest) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| TesseraError::execution("index service stopped"))?;
        rx.await
            .map_err(|_| TesseraError::execution("index service dropped the request"))
    }

    pub async fn register_collection(&self, name: CollectionFullName) -> Result<()> {
        self.call(|r| IndexRequest::RegisterCollection(name, r)).await
    }

    pub async fn unregister_collection(&self, name: CollectionFullName) -> Result<()> {
        self.call(|r| IndexRequest::UnregisterCollection(name, r))
            .await
    }

    pub async fn create_index(
        &self,
        name: CollectionFullName,
        index_name: impl Into<String>,
        keys: IndexKeys,
        on_disk: bool,
    ) -> Result<()> {
        let index_name = index_name.into();
        self.call(|reply| IndexRequest::CreateIndex {
            name,
            index_name,
            keys,
            on_disk,
            reply,
        })
        .await?
    }

    pub async fn drop_index(
        &self,
        name: CollectionFullName,
        index_name: impl Into<String>,
    ) -> Result<()> {
        let index_name = index_name.into();
        self.call(|reply| IndexRequest::DropIndex {
            name,
            index_name,
            reply,
        })
        .await?
    }

    pub async fn has_index(
        &self,
        name: CollectionFullName,
        index_name: impl Into<String>,
    ) -> Result<bool> {
        let index_name = index_name.into();
        self.call(|reply| IndexRequest::HasIndex {
            name,
            index_name,
            reply,
        })
        .await
    }

    /// Index `count` fresh rows starting at `start_row_id`, committed
    /// immediately (non-transactional path).
    pub async fn insert_rows(
        &self,
        name: CollectionFullName,
        chunk: DataChunk,
        start_row_id: i64,
        count: usize,
    ) -> Result<()> {
        self.insert_rows_txn(name, chunk, start_row_id, count, 0).await
    }

    /// Transactional variant: entries wait in the pending set.
    pub async fn insert_rows_txn(
        &self,
        name: CollectionFullName,
        chunk: DataChunk,
        start_row_id: i64,
        count: usize,
        txn_id: u64,
    ) -> Result<()> {
        self.call(|reply| IndexRequest::InsertRows {
            name,
            chunk,
            start_row_id,
            count,
            txn_id,
            reply,
        })
        .await
    }

    pub async fn delete_rows(
        &self,
        name: CollectionFullName,
        chunk: DataChunk,
        row_ids: Vec<i64>,
    ) -> Result<()> {
        self.delete_rows_txn(name, chunk, row_ids, 0).await
    }

    pub async fn delete_rows_txn(
        &self,
        name: CollectionFullName,
        chunk: DataChunk,
        row_ids: Vec<i64>,
        txn_id: u64,
    ) -> Result<()> {
        self.call(|reply| IndexRequest::DeleteRows {
            name,
            chunk,
            row_ids,
            txn_id,
            reply,
        })
        .await
    }

    pub async fn update_rows(
        &self,
        name: CollectionFullName,
        old_chunk: DataChunk,
        new_chunk: DataChunk,
        row_ids: Vec<i64>,
    ) -> Result<()> {
        self.update_rows_txn(name, old_chunk, new_chunk, row_ids, 0)
            .await
    }

    pub async fn update_rows_txn(
        &self,
        name: CollectionFullName,
        old_chunk: DataChunk,
        new_chunk: DataChunk,
        row_ids: Vec<i64>,
        txn_id: u64,
    ) -> Result<()> {
        self.call(|reply| IndexRequest::UpdateRows {
            name,
            old_chunk,
            new_chunk,
            row_ids,
            txn_id,
            reply,
        })
        .await
    }

    pub async fn commit_insert(
        &self,
        name: CollectionFullName,
        txn_id: u64,
        cid: u64,
    ) -> Result<()> {
        self.call(|reply| IndexRequest::CommitInsert {
            name,
            txn_id,
            cid,
            reply,
        })
        .await
    }

    pub async fn commit_delete(
        &self,
        name: CollectionFullName,
        txn_id: u64,
        cid: u64,
    ) -> Result<()> {
        self.call(|reply| IndexRequest::CommitDelete {
            name,
            txn_id,
            cid,
            reply,
        })
        .await
    }

    pub async fn revert_insert(&self, name: CollectionFullName, txn_id: u64) -> Result<()> {
        self.call(|reply| IndexRequest::RevertInsert {
            name,
            txn_id,
            reply,
        })
        .await
    }

    pub async fn revert_delete(&self, name: CollectionFullName, txn_id: u64) -> Result<()> {
        self.call(|reply| IndexRequest::RevertDelete {
            name,
            txn_id,
            reply,
        })
        .await
    }

    /// Committed-only search.
    pub async fn search(
        &self,
        name: CollectionFullName,
        key_path: impl Into<String>,
        compare: CompareOp,
        value: Value,
    ) -> Result<Vec<i64>> {
        self.search_txn(name, key_path, compare, value, u64::MAX, 0)
            .await
    }

    /// MVCC-aware search for a reader at `(start_time, txn_id)`.
    pub async fn search_txn(
        &self,
        name: CollectionFullName,
        key_path: impl Into<String>,
        compare: CompareOp,
        value: Value,
        start_time: u64,
        txn_id: u64,
    ) -> Result<Vec<i64>> {
        let key_path = key_path.into();
        self.call(|reply| IndexRequest::Search {
            name,
            key_path,
            compare,
            value,
            start_time,
            txn_id,
            reply,
        })
        .await?
    }

    pub async fn cleanup_all_versions(&self, lowest_active_start_time: u64) -> Result<()> {
        self.call(|r| IndexRequest::CleanupAllVersions(lowest_active_start_time, r))
            .await
    }

    /// Rewrite every disk mirror of a collection from the committed
    /// in-memory state.
    pub async fn rebuild_indexes(&self, name: CollectionFullName) -> Result<()> {
        self.call(|r| IndexRequest::RebuildIndexes(name, r)).await
    }

    /// Barrier: every agent drains its queue and persists.
    pub async fn flush_all_indexes(&self) -> Result<()> {
        self.call(IndexRequest::FlushAllIndexes).await
    }
}

impl IndexService {
    /// Reopen every index the metadata file lists.
    fn reconstruct(&mut self) {
        let Some(meta) = &self.meta else {
            return;
        };
        let entries = match meta.load() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "index metadata unreadable; starting empty");
                return;
            }
        };
        for entry in entries {
            let name = CollectionFullName::new(&entry.database, &entry.collection);
            let agent = self.spawn_agent(&name, &entry.name);
            self.engines
                .entry(name)
                .or_insert_with(IndexEngine::new)
                .add_index(&entry.name, entry.keys, agent);
        }
        debug!(collections = self.engines.len(), "index registry reconstructed");
    }

    fn spawn_agent(&self, name: &CollectionFullName, index_name: &str) -> Option<DiskAgentHandle> {
        let base = self.base_dir.as_ref()?;
        let dir = base
            .join(&name.database)
            .join(&name.collection)
            .join(index_name);
        match spawn_disk_agent(index_name, &dir) {
            Ok(agent) => Some(agent),
            Err(e) => {
                // In-memory index stays authoritative without a mirror.
                warn!(index = index_name, error = %e, "disk agent unavailable");
                None
            }
        }
    }

    fn engine_mut(&mut self, name: &CollectionFullName) -> &mut IndexEngine {
        self.engines.entry(name.clone()).or_insert_with(IndexEngine::new)
    }
}

/// Per-agent batches gathered while walking a chunk, sent once.
#[derive(Default)]
struct MirrorBatches {
    by_agent: HashMap<String, (DiskAgentHandle, Vec<(Value, i64)>)>,
}

impl MirrorBatches {
    fn collect(&mut self, engine: &IndexEngine, chunk: &DataChunk, row: usize, row_id: i64) {
        engine.for_each_disk_op(chunk, row, |agent, key| {
            self.by_agent
                .entry(agent.name().to_owned())
                .or_insert_with(|| (agent.clone(), Vec::new()))
                .1
                .push((key, row_id));
        });
    }

    fn send_inserts(self) {
        for (_, (agent, batch)) in self.by_agent {
            agent.insert_many(batch);
        }
    }

    fn send_removals(self) {
        for (_, (agent, batch)) in self.by_agent {
            agent.remove_many(batch);
        }
    }
}

async fn run_service(mut service: IndexService, mut rx: mpsc::UnboundedReceiver<IndexRequest>) {
    debug!("index service started");
    while let Some(request) = rx.recv().await {
        handle(&mut service, request).await;
    }
    debug!("index service stopped");
}

async fn handle(service: &mut IndexService, request: IndexRequest) {
    match request {
        IndexRequest::RegisterCollection(name, reply) => {
            service.engines.entry(name).or_insert_with(IndexEngine::new);
            let _ = reply.send(());
        }
        IndexRequest::UnregisterCollection(name, reply) => {
            if let Some(engine) = service.engines.remove(&name) {
                for agent in engine.agents() {
                    if let Err(e) = std::fs::remove_dir_all(agent.dir()) {
                        warn!(index = agent.name(), error = %e, "index directory removal failed");
                    }
                    if let Some(meta) = &service.meta {
                        let _ = meta.erase(&name.database, &name.collection, agent.name());
                    }
                }
            }
            let _ = reply.send(());
        }
        IndexRequest::CreateIndex {
            name,
            index_name,
            keys,
            on_disk,
            reply,
        } => {
            let agent = if on_disk {
                service.spawn_agent(&name, &index_name)
            } else {
                None
            };
            let added = service
                .engine_mut(&name)
                .add_index(&index_name, keys.clone(), agent);
            let result = if added {
                if let Some(meta) = &service.meta {
                    if on_disk {
                        let _ = meta.record(IndexMeta {
                            database: name.database.clone(),
                            collection: name.collection.clone(),
                            name: index_name,
                            keys,
                        });
                    }
                }
                Ok(())
            } else {
                Err(TesseraError::invalid(format!(
                    "index {index_name} already exists on {name}"
                )))
            };
            let _ = reply.send(result);
        }
        IndexRequest::DropIndex {
            name,
            index_name,
            reply,
        } => {
            let agent = service.engine_mut(&name).drop_index(&index_name);
            if let Some(agent) = agent {
                if let Err(e) = std::fs::remove_dir_all(agent.dir()) {
                    warn!(index = %index_name, error = %e, "index directory removal failed");
                }
            }
            if let Some(meta) = &service.meta {
                let _ = meta.erase(&name.database, &name.collection, &index_name);
            }
            let _ = reply.send(Ok(()));
        }
        IndexRequest::HasIndex {
            name,
            index_name,
            reply,
        } => {
            let has = service
                .engines
                .get(&name)
                .is_some_and(|e| e.has_index(&index_name));
            let _ = reply.send(has);
        }
        IndexRequest::InsertRows {
            name,
            chunk,
            start_row_id,
            count,
            txn_id,
            reply,
        } => {
            let engine = service.engine_mut(&name);
            let mut mirror = MirrorBatches::default();
            for i in 0..count.min(chunk.cardinality()) {
                let row_id = start_row_id + i as i64;
                engine.insert_row(&chunk, i, row_id, txn_id);
                // Direct writes hit the mirror now; transactional ones
                // wait for commit_insert to drain the pending set.
                if txn_id == 0 {
                    mirror.collect(engine, &chunk, i, row_id);
                }
            }
            mirror.send_inserts();
            let _ = reply.send(());
        }
        IndexRequest::DeleteRows {
            name,
            chunk,
            row_ids,
            txn_id,
            reply,
        } => {
            let engine = service.engine_mut(&name);
            let mut mirror = MirrorBatches::default();
            for (row, row_id) in row_ids.iter().enumerate() {
                engine.mark_delete_row(&chunk, row, *row_id, txn_id);
                if txn_id == 0 {
                    mirror.collect(engine, &chunk, row, *row_id);
                }
            }
            mirror.send_removals();
            let _ = reply.send(());
        }
        IndexRequest::UpdateRows {
            name,
            old_chunk,
            new_chunk,
            row_ids,
            txn_id,
            reply,
        } => {
            let engine = service.engine_mut(&name);
            let mut stale = MirrorBatches::default();
            let mut fresh = MirrorBatches::default();
            for (row, row_id) in row_ids.iter().enumerate() {
                engine.mark_delete_row(&old_chunk, row, *row_id, txn_id);
                engine.insert_row(&new_chunk, row, *row_id, txn_id);
                if txn_id == 0 {
                    stale.collect(engine, &old_chunk, row, *row_id);
                    fresh.collect(engine, &new_chunk, row, *row_id);
                }
            }
            stale.send_removals();
            fresh.send_inserts();
            let _ = reply.send(());
        }
        IndexRequest::CommitInsert {
            name,
            txn_id,
            cid,
            reply,
        } => {
            service.engine_mut(&name).commit_insert(txn_id, cid);
            let _ = reply.send(());
        }
        IndexRequest::CommitDelete {
            name,
            txn_id,
            cid,
            reply,
        } => {
            service.engine_mut(&name).commit_delete(txn_id, cid);
            let _ = reply.send(());
        }
        IndexRequest::RevertInsert { name, txn_id, reply } => {
            service.engine_mut(&name).revert_insert(txn_id);
            let _ = reply.send(());
        }
        IndexRequest::RevertDelete { name, txn_id, reply } => {
            service.engine_mut(&name).revert_delete(txn_id);
            let _ = reply.send(());
        }
        IndexRequest::Search {
            name,
            key_path,
            compare,
            value,
            start_time,
            txn_id,
            reply,
        } => {
            let result = service
                .engines
                .get(&name)
                .and_then(|e| e.search(&key_path, compare, &value, start_time, txn_id))
                .ok_or_else(|| {
                    TesseraError::invalid(format!("no index on {name} covering {key_path}"))
                });
            let _ = reply.send(result);
        }
        IndexRequest::CleanupAllVersions(lowest, reply) => {
            for engine in service.engines.values_mut() {
                engine.cleanup_versions(lowest);
            }
            let _ = reply.send(());
        }
        IndexRequest::RebuildIndexes(name, reply) => {
            if let Some(engine) = service.engines.get(&name) {
                engine.rebuild_mirrors().await;
            }
            let _ = reply.send(());
        }
        IndexRequest::FlushAllIndexes(reply) => {
            for engine in service.engines.values() {
                engine.flush_all().await;
            }
            let _ = reply.send(());
        }
    }
}
