// crates/recall-server/src/db/schema.rs
// Database schema and migrations

use anyhow::Result;
use rusqlite::Connection;
use serde_json::Value;

use super::migration_helpers::{add_column_if_missing, column_exists};
use crate::util::content_hash;

/// Run all schema setup and migrations.
///
/// Called during pool creation. Idempotent - checks for existing
/// tables/columns before making changes, and the content-hash backfill is
/// safe to interrupt (it commits per batch).
pub fn run_all_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    migrate_memories_content_hash(conn)?;
    migrate_memories_embedding(conn)?;
    backfill_content_hashes(conn)?;

    Ok(())
}

/// Database schema SQL
pub const SCHEMA: &str = r#"
-- =======================================
-- MEMORIES
-- =======================================
CREATE TABLE IF NOT EXISTS memories (
    id INTEGER PRIMARY KEY,
    key TEXT NOT NULL UNIQUE,
    memory_type TEXT NOT NULL DEFAULT 'context',
    value TEXT NOT NULL,              -- canonical JSON
    content_hash TEXT,                -- hex sha256, backfilled for legacy rows
    project_id TEXT,
    scope TEXT NOT NULL DEFAULT 'universal',
    file_path TEXT,
    timestamp INTEGER NOT NULL,       -- ms epoch, bumped on dedup touch
    last_accessed INTEGER,
    access_count INTEGER NOT NULL DEFAULT 0,
    relevance_score REAL NOT NULL DEFAULT 1.0,
    is_active INTEGER NOT NULL DEFAULT 1,
    metadata TEXT,
    embedding BLOB                    -- little-endian f32 vector
);
-- idx_memories_hash is created by migrate_memories_content_hash, after the
-- column is guaranteed to exist on legacy databases
CREATE INDEX IF NOT EXISTS idx_memories_project_type ON memories(project_id, memory_type);
CREATE INDEX IF NOT EXISTS idx_memories_timestamp ON memories(timestamp);

-- =======================================
-- WORK QUEUE
-- =======================================
CREATE TABLE IF NOT EXISTS queue_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue_name TEXT NOT NULL,
    message_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    scheduled_at INTEGER NOT NULL,
    next_retry_at INTEGER,
    created_at INTEGER NOT NULL,
    processed_at INTEGER,
    correlation_id TEXT,
    metadata TEXT,
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_queue_claim
    ON queue_messages(queue_name, status, priority DESC, created_at ASC);
CREATE INDEX IF NOT EXISTS idx_queue_status ON queue_messages(status, processed_at);

CREATE TABLE IF NOT EXISTS dead_letters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER NOT NULL,
    queue_name TEXT NOT NULL,
    message_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    correlation_id TEXT,
    metadata TEXT,
    retry_count INTEGER NOT NULL,
    error_message TEXT,
    failed_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_dead_letters_queue ON dead_letters(queue_name, failed_at DESC);
"#;

/// Add the content_hash column to databases created before hashing existed.
pub fn migrate_memories_content_hash(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "memories", "content_hash", "TEXT")?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_memories_hash ON memories(content_hash)",
        [],
    )?;
    Ok(())
}

/// Add the embedding column to databases created before vector search.
pub fn migrate_memories_embedding(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "memories", "embedding", "BLOB")
}

/// Backfill batch size. Each batch commits independently so an interrupted
/// backfill resumes where it left off.
const BACKFILL_BATCH: usize = 200;

/// Populate content_hash for rows where it is NULL.
pub fn backfill_content_hashes(conn: &Connection) -> Result<()> {
    if !column_exists(conn, "memories", "content_hash") {
        return Ok(());
    }

    let mut total = 0usize;
    loop {
        let batch: Vec<(i64, String, String)> = {
            let mut stmt = conn.prepare(
                "SELECT id, memory_type, value FROM memories
                 WHERE content_hash IS NULL
                 LIMIT ?",
            )?;
            let rows = stmt.query_map([BACKFILL_BATCH as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        if batch.is_empty() {
            break;
        }

        for (id, memory_type, raw_value) in &batch {
            // Legacy rows may hold non-JSON text; hash them as a JSON string
            let value: Value = serde_json::from_str(raw_value)
                .unwrap_or_else(|_| Value::String(raw_value.clone()));
            let hash = content_hash(memory_type, &value);
            conn.execute(
                "UPDATE memories SET content_hash = ? WHERE id = ?",
                rusqlite::params![hash, id],
            )?;
        }
        total += batch.len();
    }

    if total > 0 {
        tracing::info!("Backfilled content_hash for {} memories", total);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();
        run_all_migrations(&conn).unwrap();
    }

    #[test]
    fn test_backfill_from_legacy_table() {
        let conn = Connection::open_in_memory().unwrap();

        // Simulate a database created before content_hash / embedding existed
        conn.execute_batch(
            "CREATE TABLE memories (
                id INTEGER PRIMARY KEY,
                key TEXT NOT NULL UNIQUE,
                memory_type TEXT NOT NULL DEFAULT 'context',
                value TEXT NOT NULL,
                project_id TEXT,
                scope TEXT NOT NULL DEFAULT 'universal',
                file_path TEXT,
                timestamp INTEGER NOT NULL,
                last_accessed INTEGER,
                access_count INTEGER NOT NULL DEFAULT 0,
                relevance_score REAL NOT NULL DEFAULT 1.0,
                is_active INTEGER NOT NULL DEFAULT 1,
                metadata TEXT
            );
            INSERT INTO memories (key, memory_type, value, timestamp)
                VALUES ('a', 'preference', '{\"pref\":\"tabs\"}', 1);
            INSERT INTO memories (key, memory_type, value, timestamp)
                VALUES ('b', 'context', 'not json', 2);",
        )
        .unwrap();

        run_all_migrations(&conn).unwrap();

        let missing: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memories WHERE content_hash IS NULL",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(missing, 0);

        // Hash matches a fresh computation over the same value
        let stored: String = conn
            .query_row(
                "SELECT content_hash FROM memories WHERE key = 'a'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        let expected = content_hash("preference", &serde_json::json!({"pref": "tabs"}));
        assert_eq!(stored, expected);

        // Embedding column was added too
        assert!(column_exists(&conn, "memories", "embedding"));
    }

    #[test]
    fn test_backfill_hashes_non_json_as_string() {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO memories (key, memory_type, value, timestamp) VALUES ('x', 'context', 'plain text', 1)",
            [],
        )
        .unwrap();
        backfill_content_hashes(&conn).unwrap();

        let stored: String = conn
            .query_row(
                "SELECT content_hash FROM memories WHERE key = 'x'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(
            stored,
            content_hash("context", &Value::String("plain text".to_string()))
        );
    }
}
