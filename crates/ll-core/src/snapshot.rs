//! Request-scoped snapshots of hydrated entities.
//!
//! A snapshot is assembled fresh per request and discarded after use. Load
//! metrics ride along so callers can observe cache effectiveness and
//! degraded hydration without instrumenting the factory themselves.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::entity::EntityRecord;

/// Where a hydrated entity's body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationSource {
    Cache,
    Document,
    /// Document unavailable; body rebuilt from the index's denormalized
    /// attributes. Degraded but non-fatal.
    IndexFallback,
}

/// One entity with its full body resolved.
#[derive(Debug, Clone)]
pub struct HydratedEntity {
    pub record: EntityRecord,
    pub body: Value,
    pub source: HydrationSource,
}

impl HydratedEntity {
    /// Render this entity as plain context text for a downstream prompt.
    ///
    /// Scalar body fields become `key: value` lines; `id`/`type`/`name` are
    /// folded into the header rather than repeated.
    pub fn context_text(&self) -> String {
        let mut out = format!("{} [{}]", self.record.name, self.record.entity_type);
        if let Some(map) = self.body.as_object() {
            for (key, value) in map {
                if matches!(key.as_str(), "id" | "type" | "name") {
                    continue;
                }
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    Value::Object(_) | Value::Array(_) => continue,
                    other => other.to_string(),
                };
                out.push_str(&format!("\n  {key}: {rendered}"));
            }
        }
        out
    }
}

/// Counters recorded while loading one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadMetrics {
    pub elapsed_ms: u64,
    pub entities_loaded: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    /// Entities hydrated from index attributes because their document was
    /// missing or unreadable.
    pub degraded: usize,
}

impl LoadMetrics {
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / lookups as f64
    }
}

/// Transient aggregate of hydrated entities grouped by type.
#[derive(Debug, Clone, Default)]
pub struct ProjectSnapshot {
    buckets: BTreeMap<String, Vec<HydratedEntity>>,
    pub metrics: LoadMetrics,
}

impl ProjectSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route an entity into its per-type bucket.
    pub fn push(&mut self, entity: HydratedEntity) {
        self.metrics.entities_loaded += 1;
        self.buckets
            .entry(entity.record.entity_type.clone())
            .or_default()
            .push(entity);
    }

    pub fn entities_of(&self, entity_type: &str) -> &[HydratedEntity] {
        self.buckets.get(entity_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HydratedEntity> {
        self.buckets.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hydrated(id: &str, ty: &str, name: &str, body: Value) -> HydratedEntity {
        HydratedEntity {
            record: EntityRecord::new(id, ty, name),
            body,
            source: HydrationSource::Document,
        }
    }

    #[test]
    fn test_push_routes_by_type() {
        let mut snap = ProjectSnapshot::new();
        snap.push(hydrated("c1", "character", "Zara", json!({})));
        snap.push(hydrated("c2", "character", "Brix", json!({})));
        snap.push(hydrated("s1", "scene", "Opening", json!({})));

        assert_eq!(snap.entities_of("character").len(), 2);
        assert_eq!(snap.entities_of("scene").len(), 1);
        assert_eq!(snap.len(), 3);
        assert_eq!(snap.metrics.entities_loaded, 3);
    }

    #[test]
    fn test_unknown_type_is_empty_slice() {
        let snap = ProjectSnapshot::new();
        assert!(snap.entities_of("panel").is_empty());
        assert!(snap.is_empty());
    }

    #[test]
    fn test_context_text_renders_scalars() {
        let entity = hydrated(
            "c1",
            "character",
            "Zara",
            json!({"name": "Zara", "age": 30, "bio": "a fox", "gear": ["knife"]}),
        );
        let text = entity.context_text();
        assert!(text.starts_with("Zara [character]"));
        assert!(text.contains("age: 30"));
        assert!(text.contains("bio: a fox"));
        // Arrays and duplicate name are skipped
        assert!(!text.contains("knife"));
        assert_eq!(text.matches("Zara").count(), 1);
    }

    #[test]
    fn test_hit_rate() {
        let metrics = LoadMetrics { cache_hits: 3, cache_misses: 1, ..Default::default() };
        assert!((metrics.cache_hit_rate() - 0.75).abs() < 1e-9);
        assert_eq!(LoadMetrics::default().cache_hit_rate(), 0.0);
    }
}
