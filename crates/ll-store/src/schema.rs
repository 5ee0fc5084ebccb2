use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i64 = 2;

pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "wal_autocheckpoint", 100)?;

    // Force-checkpoint stale WAL data into the main DB on startup.
    // Errors are non-fatal — in-memory DBs and fresh files legitimately fail this.
    if conn
        .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
        .is_ok()
    {
        tracing::debug!("startup WAL checkpoint complete");
    }

    // Create tables — CREATE TABLE IF NOT EXISTS is a no-op for existing
    // databases, so older schemas are upgraded by the ALTER TABLE probes below.
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS branches (
            name          TEXT PRIMARY KEY,
            head_event_id TEXT REFERENCES events(id),
            created_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS events (
            id              TEXT PRIMARY KEY,
            parent_event_id TEXT REFERENCES events(id),
            branch          TEXT NOT NULL,
            ts_ms           INTEGER NOT NULL,
            kind            TEXT NOT NULL,
            entity_id       TEXT NOT NULL,
            payload         TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entities (
            id            TEXT PRIMARY KEY,
            entity_type   TEXT NOT NULL,
            name          TEXT NOT NULL,
            source_path   TEXT,
            content_hash  TEXT,
            attributes    TEXT NOT NULL DEFAULT '{}',
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL,
            parent_id     TEXT,
            sort_order    INTEGER NOT NULL DEFAULT 0,
            tags          TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS relationships (
            source_id         TEXT NOT NULL,
            target_id         TEXT NOT NULL,
            relationship_type TEXT NOT NULL,
            metadata          TEXT,
            PRIMARY KEY (source_id, target_id, relationship_type)
        );

        CREATE TABLE IF NOT EXISTS sync_metadata (
            source_path   TEXT PRIMARY KEY,
            entity_id     TEXT NOT NULL,
            entity_type   TEXT NOT NULL,
            content_hash  TEXT NOT NULL,
            mtime_ms      INTEGER NOT NULL,
            file_size     INTEGER NOT NULL,
            indexed_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS memory_entries (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            scope_key     TEXT,
            content       TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS session_history (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            role          TEXT NOT NULL,
            content       TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_events_branch ON events(branch);
        CREATE INDEX IF NOT EXISTS idx_events_parent ON events(parent_event_id);
        CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type);
        CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name);
        CREATE INDEX IF NOT EXISTS idx_entities_parent ON entities(parent_id);
        CREATE INDEX IF NOT EXISTS idx_rel_target ON relationships(target_id);
        CREATE INDEX IF NOT EXISTS idx_sync_entity ON sync_metadata(entity_id);
        ",
    )?;

    // v1 databases lack the digest marker on session_history
    if conn
        .prepare("SELECT is_digest FROM session_history LIMIT 0")
        .is_err()
    {
        conn.execute_batch(
            "ALTER TABLE session_history ADD COLUMN is_digest INTEGER NOT NULL DEFAULT 0;",
        )?;
    }

    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = 'schema_version'")?;
    let version = stmt
        .query_row([], |row| {
            let v: String = row.get(0)?;
            Ok(v.parse::<i64>().unwrap_or(0))
        })
        .ok();
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        for table in &[
            "metadata",
            "branches",
            "events",
            "entities",
            "relationships",
            "sync_metadata",
            "memory_entries",
            "session_history",
        ] {
            let count: i64 = conn
                .query_row(&format!("SELECT count(*) FROM {table}"), [], |row| row.get(0))
                .unwrap();
            assert!(count >= 0, "table {table} should exist");
        }
    }

    #[test]
    fn test_schema_version_set() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_idempotent_initialize() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        initialize(&conn).unwrap(); // should not error
    }

    #[test]
    fn test_busy_timeout_set() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        let timeout: i64 = conn
            .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap();
        assert_eq!(timeout, 5000);
    }

    #[test]
    fn test_upgrade_v1_adds_digest_column() {
        let conn = Connection::open_in_memory().unwrap();

        // Simulate a v1 schema: session_history without is_digest
        conn.execute_batch(
            "
            CREATE TABLE metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL);
            INSERT INTO metadata (key, value) VALUES ('schema_version', '1');
            CREATE TABLE session_history (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                role          TEXT NOT NULL,
                content       TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL
            );
            INSERT INTO session_history (role, content, created_at_ms) VALUES ('user', 'hi', 1);
            ",
        )
        .unwrap();

        initialize(&conn).unwrap();

        let is_digest: i64 = conn
            .query_row("SELECT is_digest FROM session_history WHERE role = 'user'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(is_digest, 0);
        assert_eq!(get_schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
    }
}
