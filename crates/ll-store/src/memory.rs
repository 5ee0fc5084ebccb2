//! Persistent project memory and session history.
//!
//! Memory entries are always-on facts and decisions, either global or keyed
//! to a chapter; the composer pulls global entries plus those matching the
//! scope's chapter. Session history is the rolling interaction log, with a
//! deterministic compaction path that folds older turns into one digest row
//! so long sessions stay inside budget without losing all prior context.

use rusqlite::params;

use ll_core::compose::{HistorySource, HistoryTurn, MemorySource, SourceError, compact_turns};
use ll_core::CompactionReport;
use ll_core::now_ms;
use ll_core::scope::ContextScope;

use crate::error::Result;
use crate::store::Store;

impl Store {
    /// Record a persistent memory entry. `scope_key` of `None` makes it
    /// global; otherwise it only surfaces for scopes on that chapter.
    pub fn add_memory(&self, scope_key: Option<&str>, content: &str) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO memory_entries (scope_key, content, created_at_ms) VALUES (?1, ?2, ?3)",
            params![scope_key, content, now_ms()],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Global entries plus entries matching `scope_key`, oldest first.
    pub fn list_memories(&self, scope_key: Option<&str>) -> Result<Vec<String>> {
        let mut stmt = self.conn().prepare(
            "SELECT content FROM memory_entries
             WHERE scope_key IS NULL OR scope_key = ?1
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![scope_key], |row| row.get(0))?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Append one interaction turn to the session log.
    pub fn add_turn(&self, role: &str, content: &str) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO session_history (role, content, is_digest, created_at_ms)
             VALUES (?1, ?2, 0, ?3)",
            params![role, content, now_ms()],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    fn turns_ascending(&self) -> Result<Vec<(i64, HistoryTurn)>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, role, content, created_at_ms FROM session_history
             ORDER BY created_at_ms, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                HistoryTurn {
                    role: row.get(1)?,
                    content: row.get(2)?,
                    ts_ms: row.get(3)?,
                },
            ))
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Fold all but the `keep_recent` newest turns into a single digest row.
    /// Reports the estimated token reduction; a no-op when the session is
    /// already short enough.
    pub fn compact_session(&self, keep_recent: usize) -> Result<CompactionReport> {
        let turns_with_ids = self.turns_ascending()?;
        let turns: Vec<HistoryTurn> = turns_with_ids.iter().map(|(_, t)| t.clone()).collect();

        let (digest, report) = compact_turns(&turns, keep_recent);
        let Some(digest) = digest else {
            return Ok(report);
        };

        // The digest must sort before any kept turn.
        let digest_ts = match turns_with_ids.get(report.summarized) {
            Some((_, first_kept)) => first_kept.ts_ms.saturating_sub(1),
            None => turns_with_ids[report.summarized - 1].1.ts_ms,
        };

        let tx = self.conn().unchecked_transaction()?;
        for (id, _) in &turns_with_ids[..report.summarized] {
            tx.execute("DELETE FROM session_history WHERE id = ?1", [id])?;
        }
        tx.execute(
            "INSERT INTO session_history (role, content, is_digest, created_at_ms)
             VALUES ('system', ?1, 1, ?2)",
            params![digest, digest_ts],
        )?;
        tx.commit()?;

        tracing::info!(
            summarized = report.summarized,
            kept = report.kept,
            tokens_saved = report.tokens_saved(),
            "session history compacted"
        );
        Ok(report)
    }
}

impl HistorySource for Store {
    /// Newest turns first, as the composer consumes them.
    fn recent_turns(&self, limit: usize) -> std::result::Result<Vec<HistoryTurn>, SourceError> {
        let mut stmt = self.conn().prepare(
            "SELECT role, content, created_at_ms FROM session_history
             ORDER BY created_at_ms DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(HistoryTurn {
                role: row.get(0)?,
                content: row.get(1)?,
                ts_ms: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

impl MemorySource for Store {
    fn render_memories(&self, scope: &ContextScope) -> std::result::Result<Vec<String>, SourceError> {
        Ok(self.list_memories(scope.chapter.as_deref())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ll_core::scope::AccessLevel;

    #[test]
    fn test_memory_scoping() {
        let store = Store::open_in_memory().unwrap();
        store.add_memory(None, "the fox is silver").unwrap();
        store.add_memory(Some("ch1"), "opening is at dusk").unwrap();
        store.add_memory(Some("ch2"), "duel happens at dawn").unwrap();

        let global_only = store.list_memories(None).unwrap();
        assert_eq!(global_only, vec!["the fox is silver"]);

        let ch1 = store.list_memories(Some("ch1")).unwrap();
        assert_eq!(ch1, vec!["the fox is silver", "opening is at dusk"]);
    }

    #[test]
    fn test_render_memories_uses_scope_chapter() {
        let store = Store::open_in_memory().unwrap();
        store.add_memory(Some("ch1"), "scoped fact").unwrap();

        let mut scope = ContextScope::new("draft_scene", AccessLevel::Privileged);
        assert!(store.render_memories(&scope).unwrap().is_empty());

        scope.chapter = Some("ch1".into());
        assert_eq!(store.render_memories(&scope).unwrap(), vec!["scoped fact"]);
    }

    #[test]
    fn test_recent_turns_newest_first() {
        let store = Store::open_in_memory().unwrap();
        store.add_turn("user", "one").unwrap();
        store.add_turn("assistant", "two").unwrap();
        store.add_turn("user", "three").unwrap();

        let turns = store.recent_turns(2).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "three");
        assert_eq!(turns[1].content, "two");
    }

    #[test]
    fn test_compact_session() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..10 {
            store.add_turn("user", &format!("turn {i}: {}", "x".repeat(200))).unwrap();
        }

        let report = store.compact_session(3).unwrap();
        assert_eq!(report.summarized, 7);
        assert_eq!(report.kept, 3);
        assert!(report.tokens_saved() > 0);

        // One digest + 3 verbatim turns remain, digest first in time order
        let turns = store.turns_ascending().unwrap();
        assert_eq!(turns.len(), 4);
        assert!(turns[0].1.content.starts_with("Condensed history of 7"));
        assert_eq!(turns[0].1.role, "system");
        assert_eq!(turns[3].1.content, format!("turn 9: {}", "x".repeat(200)));
    }

    #[test]
    fn test_compact_noop_when_short() {
        let store = Store::open_in_memory().unwrap();
        store.add_turn("user", "hello").unwrap();

        let report = store.compact_session(5).unwrap();
        assert_eq!(report.summarized, 0);
        assert_eq!(store.turns_ascending().unwrap().len(), 1);
    }

    #[test]
    fn test_digest_survives_recent_turns_query() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..5 {
            store.add_turn("user", &format!("turn {i}")).unwrap();
        }
        store.compact_session(2).unwrap();

        let turns = store.recent_turns(10).unwrap();
        assert_eq!(turns.len(), 3);
        // Newest-first: the digest is the oldest entry
        assert!(turns[2].content.starts_with("Condensed history"));
    }
}
