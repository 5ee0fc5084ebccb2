//! Generic entity model: attribute-bag records, relationship edges, and the
//! sync/consistency bookkeeping that ties indexed rows to their documents.
//!
//! Entities are deliberately schema-agnostic. A record carries a flattened
//! attribute map (`"appearance.hair" -> "silver"`) so the index can filter on
//! nested fields without knowing any domain schema. Expected-field validation
//! lives in [`crate::schema_def`], at the boundary, not here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// One indexed entity row, kept in sync with its backing document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub entity_type: String,
    pub name: String,
    /// Relative path of the backing document, when one exists.
    pub source_path: Option<String>,
    /// SHA-256 hex of the document content at index time.
    pub content_hash: Option<String>,
    /// Flattened attribute map (dot-separated paths for nested objects).
    pub attributes: BTreeMap<String, Value>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    /// Hierarchy parent (chapter -> scene -> panel).
    pub parent_id: Option<String>,
    pub sort_order: i64,
    pub tags: Vec<String>,
}

impl EntityRecord {
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>, name: impl Into<String>) -> Self {
        let now = crate::time::now_ms();
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            name: name.into(),
            source_path: None,
            content_hash: None,
            attributes: BTreeMap::new(),
            created_at_ms: now,
            updated_at_ms: now,
            parent_id: None,
            sort_order: 0,
            tags: Vec::new(),
        }
    }

    /// Rebuild a JSON object from the flattened attribute map.
    ///
    /// Dotted paths stay flat — this is the degraded fallback body used when
    /// an entity's document cannot be read, not a faithful un-flattening.
    pub fn attributes_value(&self) -> Value {
        Value::Object(
            self.attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// A directed, typed edge between two entities.
///
/// `(source_id, target_id, relationship_type)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_id: String,
    pub target_id: String,
    pub relationship_type: String,
    pub metadata: Option<Value>,
}

/// Traversal direction for relationship queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    Outgoing,
    Incoming,
    Either,
}

/// Bookkeeping row linking one document to its indexed entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub source_path: String,
    pub entity_id: String,
    pub entity_type: String,
    pub content_hash: String,
    pub mtime_ms: i64,
    pub file_size: i64,
    pub indexed_at_ms: i64,
}

/// Kind of divergence discovered by a consistency audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    /// Index row whose backing document no longer exists.
    OrphanedRow,
    /// Sync-metadata row whose file no longer exists (and no entity row
    /// references it).
    StaleSyncMetadata,
    /// Live file content no longer matches the indexed hash. The document
    /// store wins; the row is flagged for re-sync, never auto-overwritten.
    HashDrift,
}

/// One audit finding, reported as data rather than raised as an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyIssue {
    pub kind: IssueKind,
    pub entity_id: Option<String>,
    pub source_path: String,
    pub detail: String,
    pub auto_fixable: bool,
}

/// SHA-256 hex digest of document content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Flatten a JSON document into dot-separated attribute paths.
///
/// Nested objects recurse; arrays and scalars are stored whole at their path.
pub fn flatten_attributes(value: &Value) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                flatten_into(&mut out, key, val);
            }
        }
        other => {
            out.insert(String::new(), other.clone());
        }
    }
    out
}

fn flatten_into(out: &mut BTreeMap<String, Value>, prefix: &str, value: &Value) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, val) in map {
                flatten_into(out, &format!("{prefix}.{key}"), val);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}
