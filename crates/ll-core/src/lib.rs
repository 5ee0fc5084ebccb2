//! lore-ledger versioned knowledge engine.
//!
//! Models a narrative project as event-sourced entity state: an append-only,
//! branchable event log projects into per-entity attribute maps, a generic
//! attribute-bag entity model feeds a derived index, and a budget-aware
//! composer assembles token-bounded context payloads from memory, history,
//! and on-demand retrieval layers.
//!
//! Zero I/O — pure model and algorithms with no opinions about storage or
//! transport. Persistence lives in `ll-store`.

pub mod cancel;
pub mod compose;
pub mod entity;
pub mod event;
pub mod schema_def;
pub mod scope;
pub mod snapshot;
pub mod time;
pub mod tokens;

pub use cancel::CancelFlag;
pub use compose::{
    CompactionReport, ContextResult, HistorySource, HistoryTurn, LayerBudgets, LayerReport,
    MemorySource, RetrievalOutcome, RetrievalSource, SourceError, TemplateRenderer, compact_turns,
    compile_context, extract_mentions,
};
pub use entity::{
    ConsistencyIssue, EdgeDirection, EntityRecord, IssueKind, Relationship, SyncMetadata,
    content_hash, flatten_attributes,
};
pub use event::{EventKind, EventRecord, project_events};
pub use schema_def::{FieldDef, FieldKind, SchemaDefinition};
pub use scope::{
    AccessLevel, ContextScope, OutputFormat, PRIVILEGED_TYPES, is_privileged_type,
    required_entity_types,
};
pub use snapshot::{HydratedEntity, HydrationSource, LoadMetrics, ProjectSnapshot};
pub use time::now_ms;
pub use tokens::{CHARS_PER_TOKEN, clip_to_budget, estimate_tokens};
