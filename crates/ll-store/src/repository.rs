//! The typed-repository write path.
//!
//! Domain entity types (character, scene, panel, ...) participate in the
//! generic index without the index knowing their schemas: every successful
//! save writes the document, appends a ledger event, upserts the index row
//! with a content hash and flattened attributes, records sync metadata, and
//! invalidates the cache entry. Deletes run the same pipeline in reverse.

use serde_json::Value;

use ll_core::entity::{EntityRecord, SyncMetadata, content_hash, flatten_attributes};
use ll_core::event::EventKind;
use ll_core::now_ms;

use crate::cache::DocumentCache;
use crate::documents::DocumentStore;
use crate::error::Result;
use crate::store::Store;

/// Contract a domain entity type implements to be persisted.
///
/// `to_document` is the full body written to disk; it should carry `id`,
/// `type`, and `name` fields so a cold-start rescan can rebuild the index
/// row without this trait.
pub trait DomainEntity {
    fn entity_id(&self) -> String;
    fn entity_type(&self) -> &'static str;
    fn display_name(&self) -> String;
    fn source_path(&self) -> String;
    fn to_document(&self) -> Value;

    fn parent_id(&self) -> Option<String> {
        None
    }
    fn sort_order(&self) -> i64 {
        0
    }
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Write-side façade over the document store, event ledger, index, and cache.
pub struct Repository<'a> {
    store: &'a Store,
    docs: &'a dyn DocumentStore,
    cache: &'a DocumentCache,
    branch: String,
}

impl<'a> Repository<'a> {
    pub fn new(
        store: &'a Store,
        docs: &'a dyn DocumentStore,
        cache: &'a DocumentCache,
        branch: impl Into<String>,
    ) -> Self {
        Self { store, docs, cache, branch: branch.into() }
    }

    /// Persist one entity everywhere it lives.
    ///
    /// The event append and index upsert are not one transaction; a crash
    /// between them is recoverable via a full re-sync.
    pub fn save<E: DomainEntity>(&self, entity: &E) -> Result<EntityRecord> {
        let id = entity.entity_id();
        let document = entity.to_document();
        let content = serde_json::to_string_pretty(&document)?;
        let path = entity.source_path();

        self.docs.write(&path, &content)?;

        let kind = if self.store.get_entity(&id)?.is_some() {
            EventKind::Update
        } else {
            EventKind::Create
        };
        self.store.append_event(&self.branch, kind, &id, document.clone(), None)?;

        let now = now_ms();
        let hash = content_hash(&content);
        let record = EntityRecord {
            id: id.clone(),
            entity_type: entity.entity_type().to_string(),
            name: entity.display_name(),
            source_path: Some(path.clone()),
            content_hash: Some(hash.clone()),
            attributes: flatten_attributes(&document),
            created_at_ms: now,
            updated_at_ms: now,
            parent_id: entity.parent_id(),
            sort_order: entity.sort_order(),
            tags: entity.tags(),
        };
        self.store.upsert_entity(&record)?;

        self.store.record_sync_metadata(&SyncMetadata {
            source_path: path.clone(),
            entity_id: id,
            entity_type: entity.entity_type().to_string(),
            content_hash: hash,
            mtime_ms: self.docs.mtime_ms(&path)?.unwrap_or(0),
            file_size: content.len() as i64,
            indexed_at_ms: now,
        })?;

        self.cache.invalidate(&path);
        Ok(record)
    }

    /// Remove an entity from the document store, ledger, index, and cache.
    /// Returns false when no such entity was indexed.
    pub fn delete(&self, entity_id: &str) -> Result<bool> {
        let Some(record) = self.store.get_entity(entity_id)? else {
            return Ok(false);
        };

        self.store
            .append_event(&self.branch, EventKind::Delete, entity_id, Value::Null, None)?;

        if let Some(path) = &record.source_path {
            if self.docs.exists(path) {
                self.docs.remove(path)?;
            }
            self.store.remove_sync_metadata(path)?;
            self.cache.invalidate(path);
        }

        self.store.delete_entity(entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::FsDocumentStore;
    use crate::index::EntityQuery;
    use serde_json::json;

    struct Character {
        id: String,
        name: String,
        hair: String,
    }

    impl DomainEntity for Character {
        fn entity_id(&self) -> String {
            self.id.clone()
        }
        fn entity_type(&self) -> &'static str {
            "character"
        }
        fn display_name(&self) -> String {
            self.name.clone()
        }
        fn source_path(&self) -> String {
            format!("characters/{}.json", self.id)
        }
        fn to_document(&self) -> Value {
            json!({
                "id": self.id,
                "type": "character",
                "name": self.name,
                "appearance": {"hair": self.hair},
            })
        }
        fn tags(&self) -> Vec<String> {
            vec!["cast".into()]
        }
    }

    fn fixture() -> (tempfile::TempDir, Store, FsDocumentStore, DocumentCache) {
        let dir = tempfile::tempdir().unwrap();
        let docs = FsDocumentStore::new(dir.path());
        (dir, Store::open_in_memory().unwrap(), docs, DocumentCache::new(8))
    }

    #[test]
    fn test_save_populates_everything() {
        let (_dir, store, docs, cache) = fixture();
        let repo = Repository::new(&store, &docs, &cache, "main");
        let zara = Character { id: "c1".into(), name: "Zara".into(), hair: "silver".into() };

        let record = repo.save(&zara).unwrap();
        assert_eq!(record.entity_type, "character");
        assert_eq!(record.attributes["appearance.hair"], json!("silver"));
        assert!(record.content_hash.is_some());

        // Document written
        assert!(docs.exists("characters/c1.json"));
        // Event appended
        let events = store.list_events("main").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Create);
        // Index row queryable
        let rows = store.query_entities(&EntityQuery::of_type("character")).unwrap();
        assert_eq!(rows.len(), 1);
        // Sync metadata recorded
        assert_eq!(store.sync_metadata().unwrap().len(), 1);
    }

    #[test]
    fn test_second_save_is_update_event() {
        let (_dir, store, docs, cache) = fixture();
        let repo = Repository::new(&store, &docs, &cache, "main");
        let mut zara = Character { id: "c1".into(), name: "Zara".into(), hair: "silver".into() };

        repo.save(&zara).unwrap();
        zara.hair = "white".into();
        repo.save(&zara).unwrap();

        let events = store.list_events("main").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, EventKind::Update);

        let rows = store.query_entities(&EntityQuery::of_type("character")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].attributes["appearance.hair"], json!("white"));
    }

    #[test]
    fn test_replay_tracks_saves() {
        let (_dir, store, docs, cache) = fixture();
        let repo = Repository::new(&store, &docs, &cache, "main");
        repo.save(&Character { id: "c1".into(), name: "Zara".into(), hair: "silver".into() })
            .unwrap();

        let state = store.replay("main").unwrap();
        assert_eq!(state["c1"]["name"], json!("Zara"));
    }

    #[test]
    fn test_delete_removes_and_tombstones() {
        let (_dir, store, docs, cache) = fixture();
        let repo = Repository::new(&store, &docs, &cache, "main");
        repo.save(&Character { id: "c1".into(), name: "Zara".into(), hair: "silver".into() })
            .unwrap();

        assert!(repo.delete("c1").unwrap());
        assert!(!repo.delete("c1").unwrap());

        assert!(store.get_entity("c1").unwrap().is_none());
        assert!(!docs.exists("characters/c1.json"));
        assert!(store.sync_metadata().unwrap().is_empty());

        // The DELETE event stays in history, and replay drops the entity
        let events = store.list_events("main").unwrap();
        assert_eq!(events.last().unwrap().kind, EventKind::Delete);
        assert!(store.replay("main").unwrap().is_empty());
    }

    #[test]
    fn test_save_invalidates_cache() {
        let (_dir, store, docs, cache) = fixture();
        let repo = Repository::new(&store, &docs, &cache, "main");
        let mut zara = Character { id: "c1".into(), name: "Zara".into(), hair: "silver".into() };
        repo.save(&zara).unwrap();

        cache.put(&docs, "characters/c1.json", json!({"stale": true}));
        zara.hair = "white".into();
        repo.save(&zara).unwrap();

        // Entry was invalidated at save time; a fresh get is a miss
        assert!(cache.get(&docs, "characters/c1.json").is_none());
    }
}
