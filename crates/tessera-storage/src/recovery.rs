//! WAL replay.
//!
//! Runs during bootstrap, before any scheduler starts: logical records
//! apply through the *direct* synchronous paths, which skip
//! deduplication, NOT NULL enforcement, and version tagging — the
//! records are known valid because they succeeded once. Index DDL is
//! handed back to the caller so the index layer can rebuild.

use tracing::{debug, info};

use tessera_error::Result;
use tessera_wal::{WalId, WalReader, WalRecord};

use crate::manager::StorageManager;
use crate::name::CollectionFullName;

/// Index DDL replayed out of the log, for the index layer to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexReplay {
    Create {
        name: CollectionFullName,
        index_name: String,
        keys: Vec<String>,
    },
    Drop {
        name: CollectionFullName,
        index_name: String,
    },
}

/// Outcome of a replay pass.
#[derive(Debug)]
pub struct RecoveryReport {
    /// Highest record id applied; `0` when the log held nothing new.
    pub last_replayed: WalId,
    /// Records applied.
    pub applied: usize,
    /// Index DDL for the index layer.
    pub index_ops: Vec<IndexReplay>,
}

/// Replay every record past the persisted id into `manager`.
pub fn recover(reader: &WalReader, manager: &mut StorageManager) -> Result<RecoveryReport> {
    let after = reader.persisted_id();
    let entries = reader.replay_after(after)?;
    let mut report = RecoveryReport {
        last_replayed: after,
        applied: 0,
        index_ops: Vec::new(),
    };

    for entry in entries {
        apply(manager, &entry.record, &mut report)?;
        report.last_replayed = entry.wal_id;
        report.applied += 1;
    }
    info!(
        from = after,
        to = report.last_replayed,
        applied = report.applied,
        "wal replay complete"
    );
    Ok(report)
}

fn apply(
    manager: &mut StorageManager,
    record: &WalRecord,
    report: &mut RecoveryReport,
) -> Result<()> {
    match record {
        WalRecord::Append {
            database,
            collection,
            chunk,
        } => {
            let name = CollectionFullName::new(database, collection);
            if manager.has_storage(&name) {
                let outcome = manager.append_direct(&name, chunk)?;
                debug!(%name, rows = outcome.count, "replayed append");
            }
        }
        WalRecord::Update {
            database,
            collection,
            row_ids,
            chunk,
        } => {
            let name = CollectionFullName::new(database, collection);
            if manager.has_storage(&name) {
                manager.update_direct(&name, row_ids, chunk)?;
            }
        }
        WalRecord::Delete {
            database,
            collection,
            row_ids,
        } => {
            let name = CollectionFullName::new(database, collection);
            if manager.has_storage(&name) {
                manager.storage_delete_rows(&name, row_ids, 0)?;
            }
        }
        WalRecord::CreateCollection {
            database,
            collection,
            columns,
        } => {
            let name = CollectionFullName::new(database, collection);
            if !manager.has_storage(&name) {
                manager.create_storage_with_columns(name, columns.clone())?;
            }
        }
        WalRecord::DropCollection {
            database,
            collection,
        } => {
            let name = CollectionFullName::new(database, collection);
            if manager.has_storage(&name) {
                manager.drop_storage(&name)?;
            }
        }
        WalRecord::CreateIndex {
            database,
            collection,
            name,
            keys,
        } => {
            report.index_ops.push(IndexReplay::Create {
                name: CollectionFullName::new(database, collection),
                index_name: name.clone(),
                keys: keys.clone(),
            });
        }
        WalRecord::DropIndex {
            database,
            collection,
            name,
        } => {
            report.index_ops.push(IndexReplay::Drop {
                name: CollectionFullName::new(database, collection),
                index_name: name.clone(),
            });
        }
        // Database DDL is catalog state; storage has nothing to do.
        WalRecord::CreateDatabase { .. } | WalRecord::DropDatabase { .. } => {}
    }
    Ok(())
}
