// crates/recall-server/src/db/memory/compact.rs
// Store statistics, clearing, and compaction

use std::collections::BTreeMap;

use recall_types::{CompactReport, MemoryStats};

/// Logical database size in bytes (page_count * page_size).
pub fn database_size_sync(conn: &rusqlite::Connection) -> rusqlite::Result<i64> {
    let page_count: i64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
    let page_size: i64 = conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
    Ok(page_count * page_size)
}

/// Store-wide statistics over active memories.
pub fn stats_sync(conn: &rusqlite::Connection) -> rusqlite::Result<MemoryStats> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM memories WHERE is_active = 1",
        [],
        |r| r.get(0),
    )?;

    let mut by_type = BTreeMap::new();
    let mut stmt = conn.prepare(
        "SELECT memory_type, COUNT(*) FROM memories
         WHERE is_active = 1
         GROUP BY memory_type",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        let (memory_type, count) = row?;
        by_type.insert(memory_type, count);
    }

    Ok(MemoryStats {
        total,
        by_type,
        size_bytes: database_size_sync(conn)?,
    })
}

/// Hard-delete memories, optionally filtered by type and/or age.
/// Returns the number of rows removed.
pub fn clear_memories_sync(
    conn: &rusqlite::Connection,
    memory_type: Option<&str>,
    older_than_ms: Option<i64>,
) -> rusqlite::Result<usize> {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(t) = memory_type {
        params.push(Box::new(t.to_string()));
        clauses.push(format!("memory_type = ?{}", params.len()));
    }
    if let Some(cutoff) = older_than_ms {
        params.push(Box::new(cutoff));
        clauses.push(format!("timestamp < ?{}", params.len()));
    }

    let sql = if clauses.is_empty() {
        "DELETE FROM memories".to_string()
    } else {
        format!("DELETE FROM memories WHERE {}", clauses.join(" AND "))
    };
    conn.execute(&sql, rusqlite::params_from_iter(params))
}

/// Compact the store:
/// (a) hard-delete soft-deleted rows older than `inactive_cutoff_ms`,
/// (b) collapse remaining groups with identical content_hash (keep the
///     earliest row, sum access counts, take the max timestamp),
/// (c) VACUUM.
///
/// With `dry_run` the projected numbers are returned and nothing mutates.
pub fn compact_sync(
    conn: &rusqlite::Connection,
    dry_run: bool,
    inactive_cutoff_ms: i64,
) -> rusqlite::Result<CompactReport> {
    let before_size = database_size_sync(conn)?;

    let removable: i64 = conn.query_row(
        "SELECT COUNT(*) FROM memories WHERE is_active = 0 AND timestamp < ?1",
        [inactive_cutoff_ms],
        |r| r.get(0),
    )?;

    // Surviving duplicate-hash groups among active rows
    let duplicate_extras: i64 = conn.query_row(
        "SELECT COALESCE(SUM(n - 1), 0) FROM (
             SELECT COUNT(*) AS n FROM memories
             WHERE is_active = 1 AND content_hash IS NOT NULL
             GROUP BY content_hash
             HAVING COUNT(*) > 1
         )",
        [],
        |r| r.get(0),
    )?;

    if dry_run {
        return Ok(CompactReport {
            removed: removable,
            deduplicated: duplicate_extras,
            before_size,
            after_size: before_size,
            dry_run: true,
        });
    }

    conn.execute(
        "DELETE FROM memories WHERE is_active = 0 AND timestamp < ?1",
        [inactive_cutoff_ms],
    )?;

    // Collapse each duplicate group onto its earliest row
    let groups: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT content_hash FROM memories
             WHERE is_active = 1 AND content_hash IS NOT NULL
             GROUP BY content_hash
             HAVING COUNT(*) > 1",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    let mut deduplicated = 0i64;
    for hash in &groups {
        let (keep_id, total_access, max_ts): (i64, i64, i64) = conn.query_row(
            "SELECT (SELECT id FROM memories
                     WHERE is_active = 1 AND content_hash = ?1
                     ORDER BY timestamp ASC, id ASC LIMIT 1),
                    SUM(access_count), MAX(timestamp)
             FROM memories WHERE is_active = 1 AND content_hash = ?1",
            [hash],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;

        conn.execute(
            "UPDATE memories SET access_count = ?1, timestamp = ?2 WHERE id = ?3",
            rusqlite::params![total_access, max_ts, keep_id],
        )?;
        let dropped = conn.execute(
            "DELETE FROM memories WHERE is_active = 1 AND content_hash = ?1 AND id != ?2",
            rusqlite::params![hash, keep_id],
        )?;
        deduplicated += dropped as i64;
    }

    // VACUUM cannot run inside a transaction; callers must not wrap this
    conn.execute_batch("VACUUM")?;

    Ok(CompactReport {
        removed: removable,
        deduplicated,
        before_size,
        after_size: database_size_sync(conn)?,
        dry_run: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{SaveMemoryParams, save_memory_sync};
    use crate::db::test_support::setup_test_connection;
    use recall_types::{MemoryType, Scope};
    use serde_json::json;

    fn save(conn: &rusqlite::Connection, key: &str, memory_type: &str, value: serde_json::Value, now: i64) {
        save_memory_sync(
            conn,
            &SaveMemoryParams {
                key: key.to_string(),
                memory_type: MemoryType::from(memory_type),
                value,
                project_id: None,
                scope: Scope::Universal,
                file_path: None,
                relevance_score: 1.0,
                metadata: None,
                embedding: None,
            },
            now,
        )
        .unwrap();
    }

    #[test]
    fn test_stats_counts_by_type() {
        let conn = setup_test_connection();
        save(&conn, "a", "preference", json!({"n": 1}), 10);
        save(&conn, "b", "preference", json!({"n": 2}), 20);
        save(&conn, "c", "pattern", json!({"n": 3}), 30);

        let stats = stats_sync(&conn).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_type.get("preference"), Some(&2));
        assert_eq!(stats.by_type.get("pattern"), Some(&1));
        assert!(stats.size_bytes > 0);
    }

    #[test]
    fn test_stats_skip_inactive() {
        let conn = setup_test_connection();
        save(&conn, "a", "preference", json!({"n": 1}), 10);
        conn.execute("UPDATE memories SET is_active = 0", []).unwrap();
        assert_eq!(stats_sync(&conn).unwrap().total, 0);
    }

    #[test]
    fn test_clear_filtered_by_type_and_age() {
        let conn = setup_test_connection();
        save(&conn, "a", "context", json!({"n": 1}), 10);
        save(&conn, "b", "context", json!({"n": 2}), 200);
        save(&conn, "c", "preference", json!({"n": 3}), 10);

        let removed = clear_memories_sync(&conn, Some("context"), Some(100)).unwrap();
        assert_eq!(removed, 1);

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 2);
    }

    #[test]
    fn test_compact_dry_run_does_not_mutate() {
        let conn = setup_test_connection();
        save(&conn, "a", "preference", json!({"n": 1}), 10);
        conn.execute("UPDATE memories SET is_active = 0 WHERE key = 'a'", [])
            .unwrap();

        let report = compact_sync(&conn, true, 100).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.removed, 1);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_compact_removes_old_inactive() {
        let conn = setup_test_connection();
        save(&conn, "old", "preference", json!({"n": 1}), 10);
        save(&conn, "new", "preference", json!({"n": 2}), 500);
        conn.execute("UPDATE memories SET is_active = 0", []).unwrap();

        let report = compact_sync(&conn, false, 100).unwrap();
        assert_eq!(report.removed, 1);
        assert!(!report.dry_run);

        let keys: Vec<String> = {
            let mut stmt = conn.prepare("SELECT key FROM memories").unwrap();
            let rows = stmt.query_map([], |r| r.get(0)).unwrap();
            rows.collect::<rusqlite::Result<Vec<_>>>().unwrap()
        };
        assert_eq!(keys, vec!["new".to_string()]);
    }

    #[test]
    fn test_compact_collapses_duplicate_hashes() {
        let conn = setup_test_connection();
        save(&conn, "first", "preference", json!({"n": 1}), 10);
        save(&conn, "second", "preference", json!({"n": 2}), 20);
        // Force a duplicate-hash group (normal saves would have deduped)
        conn.execute(
            "UPDATE memories
             SET content_hash = (SELECT content_hash FROM memories WHERE key = 'first'),
                 access_count = 3, timestamp = 99
             WHERE key = 'second'",
            [],
        )
        .unwrap();
        conn.execute(
            "UPDATE memories SET access_count = 2 WHERE key = 'first'",
            [],
        )
        .unwrap();

        let report = compact_sync(&conn, false, 0).unwrap();
        assert_eq!(report.deduplicated, 1);

        // Earliest row survives with summed access and max timestamp
        let (key, access, ts): (String, i64, i64) = conn
            .query_row(
                "SELECT key, access_count, timestamp FROM memories",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(key, "first");
        assert_eq!(access, 5);
        assert_eq!(ts, 99);
    }
}
