//! Persistence layer for the lore-ledger engine.
//!
//! One SQLite database per project holds the branchable event log, the
//! derived entity/relationship index, sync metadata, persistent memory, and
//! session history. Entity documents live as individually-editable files in
//! a document store; the index is rebuildable from them at any time, and
//! the document store always wins a disagreement.

pub mod audit;
pub mod cache;
pub mod config;
pub mod documents;
pub mod error;
pub mod events;
pub mod index;
pub mod memory;
pub mod repository;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod sync;

pub use audit::{apply_auto_fixes, audit};
pub use cache::{CacheStats, DEFAULT_CAPACITY, DocumentCache};
pub use config::StoreConfig;
pub use documents::{DocumentStore, FsDocumentStore};
pub use error::{Result, StoreError};
pub use events::BranchInfo;
pub use index::EntityQuery;
pub use repository::{DomainEntity, Repository};
pub use snapshot::SnapshotFactory;
pub use store::Store;
pub use sync::{SyncReport, sync_all};
