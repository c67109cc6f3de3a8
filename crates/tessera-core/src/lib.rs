//! Engine core: catalog, transaction coordination, parameter binding,
//! and the actor-style storage and index services.

pub mod binding;
pub mod catalog;
pub mod index_service;
pub mod storage_service;
pub mod txn;

pub use binding::TransformResult;
pub use catalog::{Catalog, CatalogStorageMode, CollectionEntry, DatabaseEntry};
pub use index_service::{IndexServiceHandle, spawn_index_service};
pub use storage_service::{
    SharedScanFilter, StorageServiceHandle, scan_filter, spawn_storage_service,
};
pub use txn::TxnCoordinator;
