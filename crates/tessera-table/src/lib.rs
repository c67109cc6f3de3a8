//! Columnar table storage with MVCC version chains.

pub mod data_table;
pub mod row_group;
pub mod segment;
pub mod version;

pub use data_table::{AppendResult, DataTable, ScanFilter};
pub use row_group::RowGroup;
pub use segment::Segment;
pub use version::{CommitId, DeleteInfo, InsertInfo, Transaction, TxnId, VersionChain};
