//! Full document-store rescan.
//!
//! Cold-start and recovery path: reconciles every on-disk document into an
//! index row, then drops rows and sync metadata whose documents vanished.
//! Converges to the same row shape the typed-repository write path
//! produces, so the two populate paths are interchangeable.

use std::collections::HashSet;

use serde_json::Value;

use ll_core::CancelFlag;
use ll_core::entity::{EntityRecord, SyncMetadata, content_hash, flatten_attributes};
use ll_core::now_ms;

use crate::documents::DocumentStore;
use crate::error::Result;
use crate::index::EntityQuery;
use crate::store::Store;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub scanned: usize,
    pub indexed: usize,
    pub removed: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Rescan every document and reconcile the index with what is on disk.
///
/// Unparseable documents are counted and skipped — a recovery scan must not
/// die on one bad file. Storage errors still fail fast. The cancel flag is
/// checked between files; a cancelled scan skips the removal phase so it
/// never deletes rows it did not get to re-verify.
pub fn sync_all(
    store: &Store,
    docs: &dyn DocumentStore,
    ext: &str,
    cancel: &CancelFlag,
) -> Result<SyncReport> {
    let paths = docs.list("", ext)?;
    let mut report = SyncReport::default();
    let mut seen: HashSet<String> = HashSet::new();

    for path in &paths {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        report.scanned += 1;

        let content = match docs.read(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "skipping unreadable document");
                report.failed += 1;
                continue;
            }
        };
        let document: Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "skipping unparseable document");
                report.failed += 1;
                continue;
            }
        };

        let record = record_from_document(path, &document, &content, store)?;
        store.record_sync_metadata(&SyncMetadata {
            source_path: path.clone(),
            entity_id: record.id.clone(),
            entity_type: record.entity_type.clone(),
            content_hash: content_hash(&content),
            mtime_ms: docs.mtime_ms(path)?.unwrap_or(0),
            file_size: content.len() as i64,
            indexed_at_ms: now_ms(),
        })?;
        store.upsert_entity(&record)?;
        seen.insert(path.clone());
        report.indexed += 1;
    }

    if !report.cancelled {
        for row in store.query_entities(&EntityQuery::default())? {
            if let Some(path) = &row.source_path
                && !seen.contains(path)
                && !docs.exists(path)
            {
                store.delete_entity(&row.id)?;
                report.removed += 1;
            }
        }
        for meta in store.sync_metadata()? {
            if !docs.exists(&meta.source_path) {
                store.remove_sync_metadata(&meta.source_path)?;
            }
        }
    }

    tracing::info!(
        scanned = report.scanned,
        indexed = report.indexed,
        removed = report.removed,
        failed = report.failed,
        cancelled = report.cancelled,
        "document rescan complete"
    );
    Ok(report)
}

/// Build an index row from a raw document.
///
/// Prefers explicit `id`/`type`/`name` fields, falling back to the path:
/// directory name (minus a plural `s`) for the type, file stem for id and
/// name. The content hash covers the raw file bytes, matching what an
/// audit later compares against.
fn record_from_document(
    path: &str,
    document: &Value,
    content: &str,
    store: &Store,
) -> Result<EntityRecord> {
    let stem = path
        .rsplit('/')
        .next()
        .and_then(|f| f.rsplit_once('.').map(|(s, _)| s))
        .unwrap_or(path);
    let dir_type = path
        .split('/')
        .next()
        .filter(|d| *d != path)
        .map(|d| d.strip_suffix('s').unwrap_or(d))
        .unwrap_or("entity");

    let id = document
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or(stem)
        .to_string();
    let entity_type = document
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or(dir_type)
        .to_string();
    let name = document
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(stem)
        .to_string();

    let now = now_ms();
    let created_at_ms = store
        .get_entity(&id)?
        .map(|existing| existing.created_at_ms)
        .unwrap_or(now);

    Ok(EntityRecord {
        id,
        entity_type,
        name,
        source_path: Some(path.to_string()),
        content_hash: Some(content_hash(content)),
        attributes: flatten_attributes(document),
        created_at_ms,
        updated_at_ms: now,
        parent_id: document
            .get("parent_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        sort_order: document.get("sort_order").and_then(Value::as_i64).unwrap_or(0),
        tags: document
            .get("tags")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default(),
    })
}
