//! The storage service mailbox.
//!
//! One task owns the storage manager and the WAL writer; requests
//! arrive on an unbounded channel and answer through oneshot senders.
//! At most one handler body runs at a time, so per-collection
//! operation order is exactly dispatch order, and the WAL record of a
//! mutation is durable before its result becomes observable.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use tessera_compute::Predicate;
use tessera_error::{Result, TesseraError};
use tessera_storage::{CollectionFullName, StorageManager, WriteOutcome};
use tessera_table::{Transaction, TxnId};
use tessera_types::{ColumnDefinition, ComplexLogicalType, DataChunk, VECTOR_CAPACITY};
use tessera_wal::{WalRecord, WalWriter};

/// Row filter usable across the service boundary.
pub type SharedScanFilter = Arc<dyn Fn(&DataChunk, usize) -> bool + Send + Sync>;

/// Push a compiled predicate down into a scan. The scan stages one row
/// at a time, so the staged chunk stands on both sides of the
/// comparison and side deduction resolves every column against it.
#[must_use]
pub fn scan_filter(predicate: Predicate) -> SharedScanFilter {
    Arc::new(move |chunk: &DataChunk, row: usize| predicate(chunk, chunk, row, row))
}

enum StorageRequest {
    CreateStorage(CollectionFullName, oneshot::Sender<Result<()>>),
    CreateStorageWithColumns(
        CollectionFullName,
        Vec<ColumnDefinition>,
        oneshot::Sender<Result<()>>,
    ),
    CreateStorageDisk(
        CollectionFullName,
        Vec<ColumnDefinition>,
        PathBuf,
        oneshot::Sender<Result<()>>,
    ),
    LoadStorageDisk(CollectionFullName, PathBuf, oneshot::Sender<Result<()>>),
    DropStorage(CollectionFullName, oneshot::Sender<Result<()>>),
    Types(
        CollectionFullName,
        oneshot::Sender<Result<Vec<ComplexLogicalType>>>,
    ),
    Columns(
        CollectionFullName,
        oneshot::Sender<Result<Vec<ColumnDefinition>>>,
    ),
    TotalRows(CollectionFullName, oneshot::Sender<Result<usize>>),
    HasSchema(CollectionFullName, oneshot::Sender<Result<bool>>),
    AdoptSchema(
        CollectionFullName,
        Vec<ColumnDefinition>,
        oneshot::Sender<Result<()>>,
    ),
    Scan {
        name: CollectionFullName,
        filter: Option<SharedScanFilter>,
        limit: usize,
        txn: Transaction,
        reply: oneshot::Sender<Result<DataChunk>>,
    },
    Fetch {
        name: CollectionFullName,
        row_ids: Vec<i64>,
        reply: oneshot::Sender<Result<DataChunk>>,
    },
    ScanSegment {
        name: CollectionFullName,
        start: usize,
        count: usize,
        reply: oneshot::Sender<Result<Vec<DataChunk>>>,
    },
    Append {
        name: CollectionFullName,
        chunk: DataChunk,
        txn: Option<Transaction>,
        reply: oneshot::Sender<Result<WriteOutcome>>,
    },
    Update {
        name: CollectionFullName,
        row_ids: Vec<i64>,
        chunk: DataChunk,
        txn: Transaction,
        reply: oneshot::Sender<Result<WriteOutcome>>,
    },
    DeleteRows {
        name: CollectionFullName,
        row_ids: Vec<i64>,
        txn_id: TxnId,
        reply: oneshot::Sender<Result<usize>>,
    },
    CommitAppend {
        name: CollectionFullName,
        cid: u64,
        first_slot: usize,
        count: usize,
        reply: oneshot::Sender<Result<()>>,
    },
    RevertAppend {
        name: CollectionFullName,
        first_slot: usize,
        count: usize,
        reply: oneshot::Sender<Result<()>>,
    },
    CommitDelete {
        name: CollectionFullName,
        txn_id: TxnId,
        cid: u64,
        reply: oneshot::Sender<Result<()>>,
    },
    RevertDelete {
        name: CollectionFullName,
        txn_id: TxnId,
        reply: oneshot::Sender<Result<()>>,
    },
    CheckpointAll(u64, oneshot::Sender<Result<bool>>),
    VacuumAll(oneshot::Sender<()>),
    MaybeCleanup(CollectionFullName, u64, oneshot::Sender<Result<bool>>),
}

/// Client half of the storage service.
#[derive(Clone)]
pub struct StorageServiceHandle {
    tx: mpsc::UnboundedSender<StorageRequest>,
}

impl std::fmt::Debug for StorageServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageServiceHandle").finish_non_exhaustive()
    }
}

/// Spawn the storage service over `manager`, logging mutations to
/// `wal` when present.
#[must_use]
pub fn spawn_storage_service(
    manager: StorageManager,
    wal: Option<WalWriter>,
) -> StorageServiceHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_service(manager, wal, rx));
    StorageServiceHandle { tx }
}

impl StorageServiceHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> StorageRequest,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| TesseraError::execution("storage service stopped"))?;
        rx.await
            .map_err(|_| TesseraError::execution("storage service dropped the request"))
    }

    pub async fn create_storage(&self, name: CollectionFullName) -> Result<()> {
        self.call(|r| StorageRequest::CreateStorage(name, r)).await?
    }

    pub async fn create_storage_with_columns(
        &self,
        name: CollectionFullName,
        columns: Vec<ColumnDefinition>,
    ) -> Result<()> {
        self.call(|r| StorageRequest::CreateStorageWithColumns(name, columns, r))
            .await?
    }

    pub async fn create_storage_disk(
        &self,
        name: CollectionFullName,
        columns: Vec<ColumnDefinition>,
        path: PathBuf,
    ) -> Result<()> {
        self.call(|r| StorageRequest::CreateStorageDisk(name, columns, path, r))
            .await?
    }

    pub async fn load_storage_disk(
        &self,
        name: CollectionFullName,
        path: PathBuf,
    ) -> Result<()> {
        self.call(|r| StorageRequest::LoadStorageDisk(name, path, r))
            .await?
    }

    pub async fn drop_storage(&self, name: CollectionFullName) -> Result<()> {
        self.call(|r| StorageRequest::DropStorage(name, r)).await?
    }

    pub async fn storage_types(
        &self,
        name: CollectionFullName,
    ) -> Result<Vec<ComplexLogicalType>> {
        self.call(|r| StorageRequest::Types(name, r)).await?
    }

    pub async fn storage_columns(
        &self,
        name: CollectionFullName,
    ) -> Result<Vec<ColumnDefinition>> {
        self.call(|r| StorageRequest::Columns(name, r)).await?
    }

    pub async fn storage_total_rows(&self, name: CollectionFullName) -> Result<usize> {
        self.call(|r| StorageRequest::TotalRows(name, r)).await?
    }

    pub async fn storage_has_schema(&self, name: CollectionFullName) -> Result<bool> {
        self.call(|r| StorageRequest::HasSchema(name, r)).await?
    }

    pub async fn storage_adopt_schema(
        &self,
        name: CollectionFullName,
        columns: Vec<ColumnDefinition>,
    ) -> Result<()> {
        self.call(|r| StorageRequest::AdoptSchema(name, columns, r))
            .await?
    }

    pub async fn storage_scan(
        &self,
        name: CollectionFullName,
        filter: Option<SharedScanFilter>,
        limit: usize,
        txn: Transaction,
    ) -> Result<DataChunk> {
        self.call(|reply| StorageRequest::Scan {
            name,
            filter,
            limit,
            txn,
            reply,
        })
        .await?
    }

    pub async fn storage_fetch(
        &self,
        name: CollectionFullName,
        row_ids: Vec<i64>,
    ) -> Result<DataChunk> {
        self.call(|reply| StorageRequest::Fetch {
            name,
            row_ids,
            reply,
        })
        .await?
    }

    pub async fn storage_scan_segment(
        &self,
        name: CollectionFullName,
        start: usize,
        count: usize,
    ) -> Result<Vec<DataChunk>> {
        self.call(|reply| StorageRequest::ScanSegment {
            name,
            start,
            count,
            reply,
        })
        .await?
    }

    pub async fn storage_append(
        &self,
        name: CollectionFullName,
        chunk: DataChunk,
        txn: Option<Transaction>,
    ) -> Result<WriteOutcome> {
        self.call(|reply| StorageRequest::Append {
            name,
            chunk,
            txn,
            reply,
        })
        .await?
    }

    pub async fn storage_update(
        &self,
        name: CollectionFullName,
        row_ids: Vec<i64>,
        chunk: DataChunk,
        txn: Transaction,
    ) -> Result<WriteOutcome> {
        self.call(|reply| StorageRequest::Update {
            name,
            row_ids,
            chunk,
            txn,
            reply,
        })
        .await?
    }

    pub async fn storage_delete_rows(
        &self,
        name: CollectionFullName,
        row_ids: Vec<i64>,
        txn_id: TxnId,
    ) -> Result<usize> {
        self.call(|reply| StorageRequest::DeleteRows {
            name,
            row_ids,
            txn_id,
            reply,
        })
        .await?
    }

    pub async fn storage_commit_append(
        &self,
        name: CollectionFullName,
        cid: u64,
        first_slot: usize,
        count: usize,
    ) -> Result<()> {
        self.call(|reply| StorageRequest::CommitAppend {
            name,
            cid,
            first_slot,
            count,
            reply,
        })
        .await?
    }

    pub async fn storage_revert_append(
        &self,
        name: CollectionFullName,
        first_slot: usize,
        count: usize,
    ) -> Result<()> {
        self.call(|reply| StorageRequest::RevertAppend {
            name,
            first_slot,
            count,
            reply,
        })
        .await?
    }

    pub async fn storage_commit_delete(
        &self,
        name: CollectionFullName,
        txn_id: TxnId,
        cid: u64,
    ) -> Result<()> {
        self.call(|reply| StorageRequest::CommitDelete {
            name,
            txn_id,
            cid,
            reply,
        })
        .await?
    }

    pub async fn storage_revert_delete(
        &self,
        name: CollectionFullName,
        txn_id: TxnId,
    ) -> Result<()> {
        self.call(|reply| StorageRequest::RevertDelete {
            name,
            txn_id,
            reply,
        })
        .await?
    }

    pub async fn checkpoint_all(&self, cid: u64) -> Result<bool> {
        self.call(|r| StorageRequest::CheckpointAll(cid, r)).await?
    }

    pub async fn vacuum_all(&self) -> Result<()> {
        self.call(StorageRequest::VacuumAll).await
    }

    pub async fn maybe_cleanup(
        &self,
        name: CollectionFullName,
        lowest_active_start_time: u64,
    ) -> Result<bool> {
        self.call(|r| StorageRequest::MaybeCleanup(name, lowest_active_start_time, r))
            .await?
    }
}

async fn run_service(
    mut manager: StorageManager,
    mut wal: Option<WalWriter>,
    mut rx: mpsc::UnboundedReceiver<StorageRequest>,
) {
    debug!("storage service started");
    while let Some(request) = rx.recv().await {
        handle(&mut manager, &mut wal, request);
    }
    debug!("storage service stopped");
}

/// Log one mutation and make it durable before applying; a WAL IO
/// failure fails the operation.
fn wal_append(wal: &mut Option<WalWriter>, record: &WalRecord) -> Result<()> {
    if let Some(writer) = wal {
        writer.append(record)?;
        if let Err(e) = writer.flush() {
            error!(error = %e, "wal flush failed; operation aborted");
            return Err(e);
        }
    }
    Ok(())
}

fn handle(manager: &mut StorageManager, wal: &mut Option<WalWriter>, request: StorageRequest) {
    match request {
        StorageRequest::CreateStorage(name, reply) => {
            let _ = reply.send(manager.create_storage(name));
        }
        StorageRequest::CreateStorageWithColumns(name, columns, reply) => {
            let result = wal_append(
                wal,
                &WalRecord::CreateCollection {
                    database: name.database.clone(),
                    collection: name.collection.clone(),
                    columns: columns.clone(),
                },
            )
            .and_then(|()| manager.create_storage_with_columns(name, columns));
            let _ = reply.send(result);
        }
        StorageRequest::CreateStorageDisk(name, columns, path, reply) => {
            let result = wal_append(
                wal,
                &WalRecord::CreateCollection {
                    database: name.database.clone(),
                    collection: name.collection.clone(),
                    columns: columns.clone(),
                },
            )
            .and_then(|()| manager.create_storage_disk(name, columns, &path));
            let _ = reply.send(result);
        }
        StorageRequest::LoadStorageDisk(name, path, reply) => {
            let _ = reply.send(manager.load_storage_disk(name, &path));
        }
        StorageRequest::DropStorage(name, reply) => {
            let result = wal_append(
                wal,
                &WalRecord::DropCollection {
                    database: name.database.clone(),
                    collection: name.collection.clone(),
                },
            )
            .and_then(|()| manager.drop_storage(&name));
            let _ = reply.send(result);
        }
        StorageRequest::Types(name, reply) => {
            let _ = reply.send(manager.storage_types(&name));
        }
        StorageRequest::Columns(name, reply) => {
            let _ = reply.send(manager.storage_columns(&name));
        }
        StorageRequest::TotalRows(name, reply) => {
            let _ = reply.send(manager.storage_total_rows(&name));
        }
        StorageRequest::HasSchema(name, reply) => {
            let _ = reply.send(manager.storage_has_schema(&name));
        }
        StorageRequest::AdoptSchema(name, columns, reply) => {
            let _ = reply.send(manager.storage_adopt_schema(&name, columns));
        }
        StorageRequest::Scan {
            name,
            filter,
            limit,
            txn,
            reply,
        } => {
            let result = manager.storage_types(&name).and_then(|types| {
                let mut out = DataChunk::new(&types, VECTOR_CAPACITY.max(limit));
                match filter {
                    Some(f) => {
                        let adapter = move |chunk: &DataChunk, row: usize| f(chunk, row);
                        manager.storage_scan(&name, &mut out, Some(&adapter), limit, &txn)?;
                    }
                    None => {
                        manager.storage_scan(&name, &mut out, None, limit, &txn)?;
                    }
                }
                Ok(out)
            });
            let _ = reply.send(result);
        }
        StorageRequest::Fetch {
            name,
            row_ids,
            reply,
        } => {
            let result = manager.storage_types(&name).and_then(|types| {
                let mut out = DataChunk::new(&types, VECTOR_CAPACITY.max(row_ids.len()));
                manager.storage_fetch(&name, &mut out, &row_ids)?;
                Ok(out)
            });
            let _ = reply.send(result);
        }
        StorageRequest::ScanSegment {
            name,
            start,
            count,
            reply,
        } => {
            let mut batches = Vec::new();
            let result = manager
                .storage_scan_segment(&name, start, count, &mut |chunk| batches.push(chunk))
                .map(|()| batches);
            let _ = reply.send(result);
        }
        StorageRequest::Append {
            name,
            chunk,
            txn,
            reply,
        } => {
            let result = wal_append(
                wal,
                &WalRecord::Append {
                    database: name.database.clone(),
                    collection: name.collection.clone(),
                    chunk: chunk.clone(),
                },
            )
            .and_then(|()| manager.storage_append(&name, &chunk, txn.as_ref()));
            let _ = reply.send(result);
        }
        StorageRequest::Update {
            name,
            row_ids,
            chunk,
            txn,
            reply,
        } => {
            let result = wal_append(
                wal,
                &WalRecord::Update {
                    database: name.database.clone(),
                    collection: name.collection.clone(),
                    row_ids: row_ids.clone(),
                    chunk: chunk.clone(),
                },
            )
            .and_then(|()| manager.storage_update(&name, &row_ids, &chunk, &txn));
            let _ = reply.send(result);
        }
        StorageRequest::DeleteRows {
            name,
            row_ids,
            txn_id,
            reply,
        } => {
            let result = wal_append(
                wal,
                &WalRecord::Delete {
                    database: name.database.clone(),
                    collection: name.collection.clone(),
                    row_ids: row_ids.clone(),
                },
            )
            .and_then(|()| manager.storage_delete_rows(&name, &row_ids, txn_id));
            let _ = reply.send(result);
        }
        StorageRequest::CommitAppend {
            name,
            cid,
            first_slot,
            count,
            reply,
        } => {
            let _ = reply.send(manager.storage_commit_append(&name, cid, first_slot, count));
        }
        StorageRequest::RevertAppend {
            name,
            first_slot,
            count,
            reply,
        } => {
            let _ = reply.send(manager.storage_revert_append(&name, first_slot, count));
        }
        StorageRequest::CommitDelete {
            name,
            txn_id,
            cid,
            reply,
        } => {
            let _ = reply.send(manager.storage_commit_delete(&name, txn_id, cid));
        }
        StorageRequest::RevertDelete { name, txn_id, reply } => {
            let _ = reply.send(manager.storage_revert_delete(&name, txn_id));
        }
        StorageRequest::CheckpointAll(cid, reply) => {
            let _ = reply.send(manager.checkpoint_all(cid, wal.as_ref()));
        }
        StorageRequest::VacuumAll(reply) => {
            manager.vacuum_all();
            let _ = reply.send(());
        }
        StorageRequest::MaybeCleanup(name, lowest, reply) => {
            let _ = reply.send(manager.maybe_cleanup(&name, lowest));
        }
    }
}
