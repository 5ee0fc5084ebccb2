//! Snapshot factory: resolve a scope into hydrated entities.
//!
//! Hydration prefers the cache, falls back to reading the document (and
//! re-warms the cache), and degrades to the index's denormalized attributes
//! when the document is gone — degraded hydration is counted on the
//! snapshot, never fatal. Privileged-only entity types are filtered here,
//! structurally, so restricted callers cannot forget to.

use std::time::Instant;

use serde_json::Value;

use ll_core::compose::{RetrievalOutcome, RetrievalSource, SourceError};
use ll_core::scope::{AccessLevel, ContextScope, is_privileged_type, required_entity_types};
use ll_core::snapshot::{HydratedEntity, HydrationSource, LoadMetrics, ProjectSnapshot};
use ll_core::entity::EntityRecord;

use crate::cache::DocumentCache;
use crate::documents::DocumentStore;
use crate::error::{Result, StoreError};
use crate::index::EntityQuery;
use crate::store::Store;

pub struct SnapshotFactory<'a> {
    store: &'a Store,
    docs: &'a dyn DocumentStore,
    cache: &'a DocumentCache,
}

impl<'a> SnapshotFactory<'a> {
    pub fn new(store: &'a Store, docs: &'a dyn DocumentStore, cache: &'a DocumentCache) -> Self {
        Self { store, docs, cache }
    }

    /// Build a fresh snapshot for one request.
    pub fn load(&self, scope: &ContextScope) -> Result<ProjectSnapshot> {
        let started = Instant::now();
        let mut snapshot = ProjectSnapshot::new();

        for entity_type in required_entity_types(&scope.purpose) {
            if scope.access == AccessLevel::Restricted && is_privileged_type(entity_type) {
                continue;
            }
            let query = scope_query(scope, entity_type);
            for record in self.store.query_entities(&query)? {
                let entity = self.hydrate(record, &mut snapshot.metrics)?;
                snapshot.push(entity);
            }
        }

        snapshot.metrics.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            purpose = %scope.purpose,
            entities = snapshot.len(),
            cache_hits = snapshot.metrics.cache_hits,
            cache_misses = snapshot.metrics.cache_misses,
            degraded = snapshot.metrics.degraded,
            "snapshot loaded"
        );
        Ok(snapshot)
    }

    fn hydrate(&self, record: EntityRecord, metrics: &mut LoadMetrics) -> Result<HydratedEntity> {
        let Some(path) = record.source_path.clone() else {
            return Ok(HydratedEntity {
                body: record.attributes_value(),
                record,
                source: HydrationSource::IndexFallback,
            });
        };

        if let Some(body) = self.cache.get(self.docs, &path) {
            metrics.cache_hits += 1;
            return Ok(HydratedEntity { record, body, source: HydrationSource::Cache });
        }
        metrics.cache_misses += 1;

        match self.docs.read(&path) {
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Ok(body) => {
                    self.cache.put(self.docs, &path, body.clone());
                    Ok(HydratedEntity { record, body, source: HydrationSource::Document })
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "unparseable document, using index attributes");
                    metrics.degraded += 1;
                    Ok(HydratedEntity {
                        body: record.attributes_value(),
                        record,
                        source: HydrationSource::IndexFallback,
                    })
                }
            },
            Err(StoreError::NotFound { .. }) => {
                metrics.degraded += 1;
                Ok(HydratedEntity {
                    body: record.attributes_value(),
                    record,
                    source: HydrationSource::IndexFallback,
                })
            }
            Err(e) => Err(e),
        }
    }
}

/// Scope filters per entity type. Chapter-scoped types narrow by chapter,
/// scene-scoped types by scene; characters narrow by the explicit entity
/// name. Cross-cutting types (world rules, locations) stay unfiltered.
fn scope_query(scope: &ContextScope, entity_type: &str) -> EntityQuery {
    let mut query = EntityQuery::of_type(entity_type);
    match entity_type {
        "chapter" => {
            query.name = scope.chapter.clone();
        }
        "scene" => {
            if let Some(chapter) = &scope.chapter {
                query
                    .attr_equals
                    .push(("chapter".to_string(), Value::String(chapter.clone())));
            }
            if let Some(scene) = &scope.scene {
                query.name = Some(scene.clone());
            }
        }
        "panel" => {
            if let Some(scene) = &scope.scene {
                query
                    .attr_equals
                    .push(("scene".to_string(), Value::String(scene.clone())));
            }
        }
        "character" => {
            query.name = scope.entity_name.clone();
        }
        _ => {}
    }
    query
}

impl RetrievalSource for SnapshotFactory<'_> {
    /// Resolve `@mention` names to entity context text. Name matching is
    /// case-insensitive; privileged types stay invisible to restricted
    /// scopes here too.
    fn resolve(
        &self,
        scope: &ContextScope,
        mentions: &[String],
    ) -> std::result::Result<RetrievalOutcome, SourceError> {
        let mut outcome = RetrievalOutcome::default();
        let mut metrics = LoadMetrics::default();

        let all = self.store.query_entities(&EntityQuery::default())?;
        for mention in mentions {
            for record in all
                .iter()
                .filter(|r| r.name.eq_ignore_ascii_case(mention))
            {
                if scope.access == AccessLevel::Restricted && is_privileged_type(&record.entity_type)
                {
                    continue;
                }
                let entity = self.hydrate(record.clone(), &mut metrics)?;
                outcome.sections.push(entity.context_text());
            }
        }

        outcome.cache_hits = metrics.cache_hits;
        outcome.cache_misses = metrics.cache_misses;
        Ok(outcome)
    }
}
