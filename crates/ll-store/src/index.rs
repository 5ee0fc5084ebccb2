//! Derived relational index over entities and their relationships.
//!
//! Rows are rebuildable from the document store at any time; when the two
//! disagree, the document store wins. Upsert and delete are atomic per row.
//! Cross-row consistency (entity plus its edges) is eventual — callers batch
//! writes and recover via a full re-sync if a batch partially fails.
//!
//! Attribute filters are applied on the flattened attribute map after the
//! SQL narrowing, so callers never depend on the JSON storage encoding.

use std::collections::BTreeMap;

use rusqlite::{OptionalExtension, Row, params};
use serde_json::Value;

use ll_core::entity::{EdgeDirection, EntityRecord, Relationship, SyncMetadata};

use crate::error::{Result, StoreError};
use crate::store::Store;

/// Declarative filter set for index queries. All present clauses must match.
#[derive(Debug, Clone, Default)]
pub struct EntityQuery {
    pub entity_type: Option<String>,
    pub name: Option<String>,
    pub parent_id: Option<String>,
    pub tag: Option<String>,
    /// Equality predicates on flattened attribute paths
    /// (e.g. `("appearance.hair", "silver")`).
    pub attr_equals: Vec<(String, Value)>,
    pub limit: Option<usize>,
}

impl EntityQuery {
    pub fn of_type(entity_type: impl Into<String>) -> Self {
        Self { entity_type: Some(entity_type.into()), ..Default::default() }
    }
}

impl Store {
    /// Insert or update one entity row. The original `created_at_ms` is
    /// preserved on update.
    pub fn upsert_entity(&self, record: &EntityRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO entities
                (id, entity_type, name, source_path, content_hash, attributes,
                 created_at_ms, updated_at_ms, parent_id, sort_order, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                entity_type = excluded.entity_type,
                name = excluded.name,
                source_path = excluded.source_path,
                content_hash = excluded.content_hash,
                attributes = excluded.attributes,
                updated_at_ms = excluded.updated_at_ms,
                parent_id = excluded.parent_id,
                sort_order = excluded.sort_order,
                tags = excluded.tags",
            params![
                record.id,
                record.entity_type,
                record.name,
                record.source_path,
                record.content_hash,
                serde_json::to_string(&record.attributes)?,
                record.created_at_ms,
                record.updated_at_ms,
                record.parent_id,
                record.sort_order,
                serde_json::to_string(&record.tags)?,
            ],
        )?;
        Ok(())
    }

    /// Remove an entity row and its edges. Returns whether a row existed.
    pub fn delete_entity(&self, id: &str) -> Result<bool> {
        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "DELETE FROM relationships WHERE source_id = ?1 OR target_id = ?1",
            [id],
        )?;
        let removed = tx.execute("DELETE FROM entities WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    pub fn get_entity(&self, id: &str) -> Result<Option<EntityRecord>> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?1"),
                [id],
                entity_from_row,
            )
            .optional()?;
        row.map(finish_entity).transpose()
    }

    pub fn query_entities(&self, query: &EntityQuery) -> Result<Vec<EntityRecord>> {
        let mut sql = format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE 1=1");
        let mut args: Vec<String> = Vec::new();

        if let Some(entity_type) = &query.entity_type {
            sql.push_str(&format!(" AND entity_type = ?{}", args.len() + 1));
            args.push(entity_type.clone());
        }
        if let Some(name) = &query.name {
            sql.push_str(&format!(" AND name = ?{}", args.len() + 1));
            args.push(name.clone());
        }
        if let Some(parent_id) = &query.parent_id {
            sql.push_str(&format!(" AND parent_id = ?{}", args.len() + 1));
            args.push(parent_id.clone());
        }
        sql.push_str(" ORDER BY sort_order, name");

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), entity_from_row)?;

        let mut out = Vec::new();
        for raw in rows {
            let record = finish_entity(raw?)?;
            if !matches_residual(&record, query) {
                continue;
            }
            out.push(record);
            if let Some(limit) = query.limit
                && out.len() >= limit
            {
                break;
            }
        }
        Ok(out)
    }

    // -- Relationships --

    /// Add (or replace) a directed, typed edge between two entities.
    pub fn add_edge(
        &self,
        source_id: &str,
        target_id: &str,
        relationship_type: &str,
        metadata: Option<Value>,
    ) -> Result<()> {
        let metadata_text = metadata.map(|m| serde_json::to_string(&m)).transpose()?;
        self.conn().execute(
            "INSERT OR REPLACE INTO relationships (source_id, target_id, relationship_type, metadata)
             VALUES (?1, ?2, ?3, ?4)",
            params![source_id, target_id, relationship_type, metadata_text],
        )?;
        Ok(())
    }

    pub fn remove_edge(&self, source_id: &str, target_id: &str, relationship_type: &str) -> Result<bool> {
        let removed = self.conn().execute(
            "DELETE FROM relationships WHERE source_id = ?1 AND target_id = ?2 AND relationship_type = ?3",
            params![source_id, target_id, relationship_type],
        )?;
        Ok(removed > 0)
    }

    pub fn edges_of(&self, entity_id: &str) -> Result<Vec<Relationship>> {
        let mut stmt = self.conn().prepare(
            "SELECT source_id, target_id, relationship_type, metadata
             FROM relationships WHERE source_id = ?1 OR target_id = ?1
             ORDER BY relationship_type, source_id, target_id",
        )?;
        let rows = stmt.query_map([entity_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;
        rows.map(|raw| {
            let (source_id, target_id, relationship_type, metadata) = raw?;
            Ok(Relationship {
                source_id,
                target_id,
                relationship_type,
                metadata: metadata.map(|m| serde_json::from_str(&m)).transpose()?,
            })
        })
        .collect()
    }

    /// Entities connected to `entity_id`, optionally filtered by edge type.
    pub fn get_related(
        &self,
        entity_id: &str,
        relationship_type: Option<&str>,
        direction: EdgeDirection,
    ) -> Result<Vec<EntityRecord>> {
        let mut out = Vec::new();
        let mut seen = std::collections::HashSet::new();

        if matches!(direction, EdgeDirection::Outgoing | EdgeDirection::Either) {
            self.related_one_way(entity_id, relationship_type, true, &mut seen, &mut out)?;
        }
        if matches!(direction, EdgeDirection::Incoming | EdgeDirection::Either) {
            self.related_one_way(entity_id, relationship_type, false, &mut seen, &mut out)?;
        }
        Ok(out)
    }

    fn related_one_way(
        &self,
        entity_id: &str,
        relationship_type: Option<&str>,
        outgoing: bool,
        seen: &mut std::collections::HashSet<String>,
        out: &mut Vec<EntityRecord>,
    ) -> Result<()> {
        let (join_on, filter_on) = if outgoing {
            ("r.target_id", "r.source_id")
        } else {
            ("r.source_id", "r.target_id")
        };
        let sql = format!(
            "SELECT {ENTITY_COLUMNS} FROM entities e
             JOIN relationships r ON e.id = {join_on}
             WHERE {filter_on} = ?1 AND (?2 IS NULL OR r.relationship_type = ?2)
             ORDER BY e.sort_order, e.name"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![entity_id, relationship_type], entity_from_row)?;
        for raw in rows {
            let record = finish_entity(raw?)?;
            if seen.insert(record.id.clone()) {
                out.push(record);
            }
        }
        Ok(())
    }

    // -- Sync metadata --

    pub fn record_sync_metadata(&self, meta: &SyncMetadata) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO sync_metadata
                (source_path, entity_id, entity_type, content_hash, mtime_ms, file_size, indexed_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                meta.source_path,
                meta.entity_id,
                meta.entity_type,
                meta.content_hash,
                meta.mtime_ms,
                meta.file_size,
                meta.indexed_at_ms,
            ],
        )?;
        Ok(())
    }

    pub fn sync_metadata(&self) -> Result<Vec<SyncMetadata>> {
        let mut stmt = self.conn().prepare(
            "SELECT source_path, entity_id, entity_type, content_hash, mtime_ms, file_size, indexed_at_ms
             FROM sync_metadata ORDER BY source_path",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SyncMetadata {
                source_path: row.get(0)?,
                entity_id: row.get(1)?,
                entity_type: row.get(2)?,
                content_hash: row.get(3)?,
                mtime_ms: row.get(4)?,
                file_size: row.get(5)?,
                indexed_at_ms: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    pub fn remove_sync_metadata(&self, source_path: &str) -> Result<bool> {
        let removed = self
            .conn()
            .execute("DELETE FROM sync_metadata WHERE source_path = ?1", [source_path])?;
        Ok(removed > 0)
    }
}

const ENTITY_COLUMNS: &str = "id, entity_type, name, source_path, content_hash, attributes, \
                              created_at_ms, updated_at_ms, parent_id, sort_order, tags";

type RawEntity = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    i64,
    i64,
    Option<String>,
    i64,
    String,
);

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<RawEntity> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

fn finish_entity(raw: RawEntity) -> Result<EntityRecord> {
    let (id, entity_type, name, source_path, content_hash, attributes, created_at_ms, updated_at_ms, parent_id, sort_order, tags) =
        raw;
    let attributes: BTreeMap<String, Value> = serde_json::from_str(&attributes)
        .map_err(|e| StoreError::InvalidData(format!("entity {id}: bad attributes column: {e}")))?;
    let tags: Vec<String> = serde_json::from_str(&tags)
        .map_err(|e| StoreError::InvalidData(format!("entity {id}: bad tags column: {e}")))?;
    Ok(EntityRecord {
        id,
        entity_type,
        name,
        source_path,
        content_hash,
        attributes,
        created_at_ms,
        updated_at_ms,
        parent_id,
        sort_order,
        tags,
    })
}

fn matches_residual(record: &EntityRecord, query: &EntityQuery) -> bool {
    if let Some(tag) = &query.tag
        && !record.tags.iter().any(|t| t == tag)
    {
        return false;
    }
    query
        .attr_equals
        .iter()
        .all(|(path, expected)| record.attributes.get(path) == Some(expected))
}
