//! Consistency audit between the index and the document store.
//!
//! Findings are data, not errors. Orphaned rows and stale sync metadata are
//! safe to auto-fix (the document store is authoritative, and the missing
//! file already decided the question). Hash drift is advisory only: the
//! document store wins, but refreshing the row is a re-sync the operator
//! triggers deliberately.

use std::collections::HashSet;

use ll_core::CancelFlag;
use ll_core::entity::{ConsistencyIssue, IssueKind, content_hash};

use crate::documents::DocumentStore;
use crate::error::Result;
use crate::index::EntityQuery;
use crate::store::Store;

/// Scan for divergence between index rows, sync metadata, and live files.
/// Cooperative: the cancel flag is checked between rows.
pub fn audit(
    store: &Store,
    docs: &dyn DocumentStore,
    cancel: &CancelFlag,
) -> Result<Vec<ConsistencyIssue>> {
    let mut issues = Vec::new();
    let mut row_paths: HashSet<String> = HashSet::new();

    for row in store.query_entities(&EntityQuery::default())? {
        if cancel.is_cancelled() {
            return Ok(issues);
        }
        let Some(path) = &row.source_path else {
            continue;
        };
        row_paths.insert(path.clone());

        if !docs.exists(path) {
            issues.push(ConsistencyIssue {
                kind: IssueKind::OrphanedRow,
                entity_id: Some(row.id.clone()),
                source_path: path.clone(),
                detail: format!("indexed entity '{}' has no backing document", row.id),
                auto_fixable: true,
            });
            continue;
        }

        if let Some(expected) = &row.content_hash {
            let actual = content_hash(&docs.read(path)?);
            if &actual != expected {
                issues.push(ConsistencyIssue {
                    kind: IssueKind::HashDrift,
                    entity_id: Some(row.id.clone()),
                    source_path: path.clone(),
                    detail: "document content changed since indexing; document store wins, \
                             re-sync to refresh the row"
                        .to_string(),
                    auto_fixable: false,
                });
            }
        }
    }

    // Sync-metadata rows pointing at vanished files. Paths already reported
    // as orphaned rows are not double-counted.
    for meta in store.sync_metadata()? {
        if cancel.is_cancelled() {
            return Ok(issues);
        }
        if !docs.exists(&meta.source_path) && !row_paths.contains(&meta.source_path) {
            issues.push(ConsistencyIssue {
                kind: IssueKind::StaleSyncMetadata,
                entity_id: Some(meta.entity_id.clone()),
                source_path: meta.source_path.clone(),
                detail: "sync metadata outlived its document".to_string(),
                auto_fixable: true,
            });
        }
    }

    if !issues.is_empty() {
        tracing::warn!(count = issues.len(), "consistency audit found issues");
    }
    Ok(issues)
}

/// Apply the fixes that need no human judgment. Returns how many issues were
/// resolved; drift findings are left untouched.
pub fn apply_auto_fixes(store: &Store, issues: &[ConsistencyIssue]) -> Result<usize> {
    let mut fixed = 0;
    for issue in issues.iter().filter(|i| i.auto_fixable) {
        match issue.kind {
            IssueKind::OrphanedRow => {
                if let Some(id) = &issue.entity_id {
                    store.delete_entity(id)?;
                }
                store.remove_sync_metadata(&issue.source_path)?;
                fixed += 1;
            }
            IssueKind::StaleSyncMetadata => {
                store.remove_sync_metadata(&issue.source_path)?;
                fixed += 1;
            }
            IssueKind::HashDrift => {}
        }
    }
    Ok(fixed)
}
