//! Append-only event log with named branches.
//!
//! Events form a DAG linked by backward parent pointers; a branch is a named
//! pointer at one event. Appending inserts the event and advances the head
//! in a single transaction, with a compare-and-swap on the head so racing
//! writers surface as `HeadConflict` instead of losing updates. Forking
//! points a new branch at any historical event, which is how undo-then-
//! diverge works.

use std::collections::HashSet;

use rusqlite::{OptionalExtension, params};
use serde_json::Value;

use ll_core::event::{EventKind, EventRecord, project_events};
use ll_core::now_ms;

use crate::error::{Result, StoreError};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq)]
pub struct BranchInfo {
    pub name: String,
    pub head_event_id: Option<String>,
    pub created_at_ms: i64,
}

impl Store {
    /// Append a mutation to a branch, creating the branch on first use.
    ///
    /// `parent_override` pins the event under a specific ancestor; when
    /// omitted the branch's current head is used. The event insert and head
    /// advance commit together or not at all.
    pub fn append_event(
        &self,
        branch: &str,
        kind: EventKind,
        entity_id: &str,
        payload: Value,
        parent_override: Option<&str>,
    ) -> Result<EventRecord> {
        if branch.trim().is_empty() {
            return Err(StoreError::InvalidData("branch name must not be empty".into()));
        }

        let tx = self.conn().unchecked_transaction()?;

        tx.execute(
            "INSERT OR IGNORE INTO branches (name, head_event_id, created_at_ms) VALUES (?1, NULL, ?2)",
            params![branch, now_ms()],
        )?;

        let head: Option<String> = tx
            .query_row(
                "SELECT head_event_id FROM branches WHERE name = ?1",
                [branch],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        let parent = match parent_override {
            Some(id) => {
                if !event_exists(&tx, id)? {
                    return Err(StoreError::NotFound { what: "event", key: id.to_string() });
                }
                Some(id.to_string())
            }
            None => head.clone(),
        };

        let event = EventRecord::new(branch, parent, kind, entity_id, payload);
        tx.execute(
            "INSERT INTO events (id, parent_event_id, branch, ts_ms, kind, entity_id, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.id,
                event.parent_event_id,
                event.branch,
                event.ts_ms,
                event.kind.as_str(),
                event.entity_id,
                serde_json::to_string(&event.payload)?,
            ],
        )?;

        // Head compare-and-swap: if another writer advanced the branch since
        // the read above, refuse rather than silently losing their event.
        let advanced = tx.execute(
            "UPDATE branches SET head_event_id = ?1 WHERE name = ?2 AND head_event_id IS ?3",
            params![event.id, branch, head],
        )?;
        if advanced != 1 {
            let actual: Option<String> = tx
                .query_row(
                    "SELECT head_event_id FROM branches WHERE name = ?1",
                    [branch],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            return Err(StoreError::HeadConflict { expected: head, actual });
        }

        tx.commit()?;
        Ok(event)
    }

    /// Create a branch pointing at an arbitrary existing event.
    pub fn fork_branch(&self, name: &str, at_event: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(StoreError::InvalidData("branch name must not be empty".into()));
        }

        let tx = self.conn().unchecked_transaction()?;

        if branch_exists(&tx, name)? {
            return Err(StoreError::BranchExists(name.to_string()));
        }
        if !event_exists(&tx, at_event)? {
            return Err(StoreError::NotFound { what: "event", key: at_event.to_string() });
        }

        tx.execute(
            "INSERT INTO branches (name, head_event_id, created_at_ms) VALUES (?1, ?2, ?3)",
            params![name, at_event, now_ms()],
        )?;
        tx.commit()?;

        tracing::debug!(branch = %name, at_event = %at_event, "forked branch");
        Ok(())
    }

    /// Current head of a branch. `NotFound` when the branch does not exist;
    /// `Ok(None)` for a branch that has never received an event.
    pub fn branch_head(&self, branch: &str) -> Result<Option<String>> {
        self.conn()
            .query_row(
                "SELECT head_event_id FROM branches WHERE name = ?1",
                [branch],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound { what: "branch", key: branch.to_string() })
    }

    pub fn list_branches(&self) -> Result<Vec<BranchInfo>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT name, head_event_id, created_at_ms FROM branches ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(BranchInfo {
                name: row.get(0)?,
                head_event_id: row.get(1)?,
                created_at_ms: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Replay a branch into cumulative entity state.
    ///
    /// Walks the head back to the root, then folds forward in creation
    /// order. Events only store backward pointers, so reconstruction is
    /// necessarily two-pass.
    pub fn replay(&self, branch: &str) -> Result<std::collections::BTreeMap<String, Value>> {
        let chain = self.event_chain(branch)?;
        Ok(project_events(&chain))
    }

    /// All events of a branch in causal (root -> head) order. DELETE events
    /// are enumerable here even though replay removes their entities.
    pub fn list_events(&self, branch: &str) -> Result<Vec<EventRecord>> {
        self.event_chain(branch)
    }

    fn event_chain(&self, branch: &str) -> Result<Vec<EventRecord>> {
        let head = self.branch_head(branch)?;
        let Some(head_id) = head else {
            return Ok(Vec::new());
        };

        // Iterative walk with cycle protection; a parent cycle means history
        // is unreplayable and must surface as corruption, not a hang.
        let mut chain = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut cursor = Some(head_id);
        while let Some(id) = cursor {
            if !visited.insert(id.clone()) {
                return Err(StoreError::CorruptHistory(format!("parent cycle at event {id}")));
            }
            let event = self
                .get_event(&id)?
                .ok_or_else(|| StoreError::CorruptHistory(format!("dangling parent pointer to {id}")))?;
            cursor = event.parent_event_id.clone();
            chain.push(event);
        }
        chain.reverse();
        Ok(chain)
    }

    pub fn get_event(&self, id: &str) -> Result<Option<EventRecord>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, parent_event_id, branch, ts_ms, kind, entity_id, payload
                 FROM events WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, parent, branch, ts_ms, kind, entity_id, payload)| {
            let kind = EventKind::parse(&kind)
                .ok_or_else(|| StoreError::InvalidData(format!("unknown event kind '{kind}'")))?;
            Ok(EventRecord {
                id,
                parent_event_id: parent,
                branch,
                ts_ms,
                kind,
                entity_id,
                payload: serde_json::from_str(&payload)?,
            })
        })
        .transpose()
    }
}

fn branch_exists(conn: &rusqlite::Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM branches WHERE name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn event_exists(conn: &rusqlite::Connection, id: &str) -> Result<bool> {
    let count: i64 =
        conn.query_row("SELECT count(*) FROM events WHERE id = ?1", [id], |row| row.get(0))?;
    Ok(count > 0)
}
