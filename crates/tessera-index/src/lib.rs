//! Per-collection index engine: MVCC-aware in-memory indexes with
//! disk-backed B+-tree mirrors driven by per-index agents.

pub mod agent;
pub mod engine;
pub mod meta;
pub mod single_field;

pub use agent::{AgentRequest, DiskAgentHandle, spawn_disk_agent};
pub use engine::IndexEngine;
pub use meta::{INDEXES_METADATA_FILENAME, IndexMeta, IndexMetaFile};
pub use single_field::{IndexKeys, IndexKind, SingleFieldIndex};
