//! Event records and the pure projection fold.
//!
//! Events are causally ordered by parent pointer, not by timestamp. The
//! storage layer walks a branch head back to its root and hands this module
//! the chain in creation order; [`project_events`] folds it into cumulative
//! entity state. CREATE and UPDATE shallow-merge object payloads keyed by
//! entity id, DELETE removes the entity (the event itself stays enumerable
//! in history).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Create => "create",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(EventKind::Create),
            "update" => Some(EventKind::Update),
            "delete" => Some(EventKind::Delete),
            _ => None,
        }
    }
}

/// One immutable mutation record in a branch's event chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub parent_event_id: Option<String>,
    pub branch: String,
    pub ts_ms: i64,
    pub kind: EventKind,
    pub entity_id: String,
    pub payload: Value,
}

impl EventRecord {
    pub fn new(
        branch: impl Into<String>,
        parent_event_id: Option<String>,
        kind: EventKind,
        entity_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_event_id,
            branch: branch.into(),
            ts_ms: crate::time::now_ms(),
            kind,
            entity_id: entity_id.into(),
            payload,
        }
    }
}

/// Fold an ordered (root -> head) event chain into cumulative entity state.
///
/// UPDATE on an entity that was never created inserts its payload — the fold
/// is a map-merge, not a state machine. Applying the same chain twice yields
/// the same map.
pub fn project_events<'a, I>(events: I) -> BTreeMap<String, Value>
where
    I: IntoIterator<Item = &'a EventRecord>,
{
    let mut state: BTreeMap<String, Value> = BTreeMap::new();
    for event in events {
        match event.kind {
            EventKind::Create | EventKind::Update => {
                match state.get_mut(&event.entity_id) {
                    Some(existing) => merge_shallow(existing, &event.payload),
                    None => {
                        state.insert(event.entity_id.clone(), event.payload.clone());
                    }
                }
            }
            EventKind::Delete => {
                state.remove(&event.entity_id);
            }
        }
    }
    state
}

/// Merge top-level object keys of `patch` into `base`. Non-object payloads
/// replace the base wholesale.
fn merge_shallow(base: &mut Value, patch: &Value) {
    match (base.as_object_mut(), patch.as_object()) {
        (Some(base_map), Some(patch_map)) => {
            for (key, val) in patch_map {
                base_map.insert(key.clone(), val.clone());
            }
        }
        _ => *base = patch.clone(),
    }
}
