// crates/recall-server/src/db/memory/query.rs
// Memory read path: retrieve, context filters, keyword and vector candidates

use recall_types::Memory;
use rusqlite::OptionalExtension;

use super::{MEMORY_COLUMNS, cosine_similarity, log_and_discard, parse_memory_row};

/// Filter for unscored context lookups.
#[derive(Debug, Clone, Default)]
pub struct ContextFilter {
    pub project_id: Option<String>,
    pub file_path: Option<String>,
    pub memory_type: Option<String>,
    pub scope: Option<String>,
}

/// Retrieve a memory by key, recording the access (sync version for
/// pool.run()). Bumps access_count and sets last_accessed.
pub fn retrieve_memory_sync(
    conn: &rusqlite::Connection,
    key: &str,
    now_ms: i64,
) -> rusqlite::Result<Option<Memory>> {
    let updated = conn.execute(
        "UPDATE memories
         SET access_count = access_count + 1, last_accessed = ?1
         WHERE key = ?2 AND is_active = 1",
        rusqlite::params![now_ms, key],
    )?;
    if updated == 0 {
        return Ok(None);
    }
    get_memory_sync(conn, key)
}

/// Fetch a memory by key without touching access statistics.
pub fn get_memory_sync(
    conn: &rusqlite::Connection,
    key: &str,
) -> rusqlite::Result<Option<Memory>> {
    conn.query_row(
        &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE key = ?1 AND is_active = 1"),
        [key],
        parse_memory_row,
    )
    .optional()
}

/// Filtered, unscored listing of active memories.
pub fn search_by_context_sync(
    conn: &rusqlite::Connection,
    filter: &ContextFilter,
    limit: usize,
) -> rusqlite::Result<Vec<Memory>> {
    let mut clauses: Vec<String> = vec!["is_active = 1".to_string()];
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(project_id) = &filter.project_id {
        params.push(Box::new(project_id.clone()));
        clauses.push(format!("project_id = ?{}", params.len()));
    }
    if let Some(file_path) = &filter.file_path {
        params.push(Box::new(file_path.clone()));
        clauses.push(format!("file_path = ?{}", params.len()));
    }
    if let Some(memory_type) = &filter.memory_type {
        params.push(Box::new(memory_type.clone()));
        clauses.push(format!("memory_type = ?{}", params.len()));
    }
    if let Some(scope) = &filter.scope {
        params.push(Box::new(scope.clone()));
        clauses.push(format!("scope = ?{}", params.len()));
    }

    params.push(Box::new(limit as i64));
    let sql = format!(
        "SELECT {MEMORY_COLUMNS} FROM memories
         WHERE {}
         ORDER BY timestamp DESC
         LIMIT ?{}",
        clauses.join(" AND "),
        params.len()
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params), parse_memory_row)?;
    Ok(rows.filter_map(log_and_discard).collect())
}

/// Escape SQL LIKE wildcards in a single keyword
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Keyword candidate search over serialized values (sync version for
/// pool.run()).
///
/// Splits the query into tokens (>= 3 chars, up to 8) and OR-joins
/// case-insensitive LIKE clauses, ranking by match count then recency.
/// This is a first-pass candidate generator; the scoring function does
/// the real ranking. Falls back to a full-string LIKE for very short
/// queries.
pub fn keyword_candidates_sync(
    conn: &rusqlite::Connection,
    query: &str,
    limit: usize,
) -> rusqlite::Result<Vec<Memory>> {
    let keywords: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .take(8)
        .map(|w| format!("%{}%", escape_like(&w.to_lowercase())))
        .collect();

    if keywords.is_empty() {
        let pattern = format!("%{}%", escape_like(query.trim()));
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories
             WHERE is_active = 1 AND lower(value) LIKE lower(?1) ESCAPE '\\'
             ORDER BY timestamp DESC
             LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![pattern, limit as i64],
            parse_memory_row,
        )?;
        return Ok(rows.filter_map(log_and_discard).collect());
    }

    // Keywords appear twice in params: once for the WHERE filter, once for
    // the ORDER BY match-count scoring
    let where_clauses: Vec<String> = (0..keywords.len())
        .map(|i| format!("lower(value) LIKE ?{} ESCAPE '\\'", 1 + i))
        .collect();
    let score_cases: Vec<String> = (0..keywords.len())
        .map(|i| {
            format!(
                "CASE WHEN lower(value) LIKE ?{} ESCAPE '\\' THEN 1 ELSE 0 END",
                1 + keywords.len() + i
            )
        })
        .collect();

    let sql = format!(
        "SELECT {MEMORY_COLUMNS} FROM memories
         WHERE is_active = 1 AND ({})
         ORDER BY ({}) DESC, timestamp DESC
         LIMIT ?{}",
        where_clauses.join(" OR "),
        score_cases.join(" + "),
        1 + keywords.len() * 2
    );

    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    for kw in &keywords {
        params.push(Box::new(kw.clone()));
    }
    for kw in &keywords {
        params.push(Box::new(kw.clone()));
    }
    params.push(Box::new(limit as i64));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params), parse_memory_row)?;
    Ok(rows.filter_map(log_and_discard).collect())
}

/// Vector candidate search over embedded rows only (sync version for
/// pool.run()). Returns (memory, cosine_similarity) pairs, best first.
///
/// Rows whose stored blob does not match the declared dimension are an
/// internal invariant break: they are logged at error, soft-deleted, and
/// skipped.
pub fn similarity_candidates_sync(
    conn: &rusqlite::Connection,
    query_vector: &[f32],
    limit: usize,
    expected_dim: usize,
) -> rusqlite::Result<Vec<(Memory, f32)>> {
    let sql = format!(
        "SELECT {MEMORY_COLUMNS} FROM memories
         WHERE is_active = 1 AND embedding IS NOT NULL"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], parse_memory_row)?;

    let mut scored: Vec<(Memory, f32)> = Vec::new();
    let mut mismatched: Vec<String> = Vec::new();

    for memory in rows.filter_map(log_and_discard) {
        let Some(embedding) = memory.embedding.as_deref() else {
            continue;
        };
        if embedding.len() != expected_dim {
            tracing::error!(
                key = %memory.key,
                stored_dim = embedding.len(),
                expected_dim,
                "Embedding dimension mismatch, deactivating row"
            );
            mismatched.push(memory.key.clone());
            continue;
        }
        let similarity = cosine_similarity(query_vector, embedding);
        scored.push((memory, similarity));
    }

    for key in &mismatched {
        conn.execute("UPDATE memories SET is_active = 0 WHERE key = ?1", [key])?;
    }

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{SaveMemoryParams, save_memory_sync, store_embedding_sync};
    use crate::db::test_support::setup_test_connection;
    use recall_types::{MemoryType, Scope};
    use serde_json::json;

    fn save(conn: &rusqlite::Connection, key: &str, value: serde_json::Value, now: i64) {
        save_memory_sync(
            conn,
            &SaveMemoryParams {
                key: key.to_string(),
                memory_type: MemoryType::Preference,
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
    fn test_retrieve_touches_access_stats() {
        let conn = setup_test_connection();
        save(&conn, "a", json!({"pref": "tabs"}), 100);

        let m = retrieve_memory_sync(&conn, "a", 500).unwrap().unwrap();
        assert_eq!(m.access_count, 1);
        assert_eq!(m.last_accessed, Some(500));

        let m = retrieve_memory_sync(&conn, "a", 600).unwrap().unwrap();
        assert_eq!(m.access_count, 2);
        assert_eq!(m.last_accessed, Some(600));
    }

    #[test]
    fn test_retrieve_missing_returns_none() {
        let conn = setup_test_connection();
        assert!(retrieve_memory_sync(&conn, "nope", 1).unwrap().is_none());
    }

    #[test]
    fn test_get_does_not_touch() {
        let conn = setup_test_connection();
        save(&conn, "a", json!({"pref": "tabs"}), 100);
        let m = get_memory_sync(&conn, "a").unwrap().unwrap();
        assert_eq!(m.access_count, 0);
        assert!(m.last_accessed.is_none());
    }

    #[test]
    fn test_search_by_context_filters() {
        let conn = setup_test_connection();
        let mut p1 = SaveMemoryParams {
            key: "p1".to_string(),
            memory_type: MemoryType::from("code"),
            value: json!({"n": 1}),
            project_id: Some("proj-a".to_string()),
            scope: Scope::Project,
            file_path: Some("src/main.rs".to_string()),
            relevance_score: 1.0,
            metadata: None,
            embedding: None,
        };
        save_memory_sync(&conn, &p1, 10).unwrap();
        p1.key = "p2".to_string();
        p1.value = json!({"n": 2});
        p1.project_id = Some("proj-b".to_string());
        p1.file_path = None;
        save_memory_sync(&conn, &p1, 20).unwrap();

        let hits = search_by_context_sync(
            &conn,
            &ContextFilter {
                project_id: Some("proj-a".to_string()),
                ..Default::default()
            },
            10,
        )
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "p1");

        let hits = search_by_context_sync(
            &conn,
            &ContextFilter {
                file_path: Some("src/main.rs".to_string()),
                ..Default::default()
            },
            10,
        )
        .unwrap();
        assert_eq!(hits.len(), 1);

        let all = search_by_context_sync(&conn, &ContextFilter::default(), 10).unwrap();
        assert_eq!(all.len(), 2);
        // Newest first
        assert_eq!(all[0].key, "p2");
    }

    #[test]
    fn test_keyword_candidates_match_any_token() {
        let conn = setup_test_connection();
        save(&conn, "a", json!({"pref": "use tabs for indentation"}), 10);
        save(&conn, "b", json!({"pref": "maximum line width 100"}), 20);
        save(&conn, "c", json!({"note": "unrelated"}), 30);

        let hits = keyword_candidates_sync(&conn, "tabs indentation", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "a");

        // Match count ranks a two-token hit above a one-token hit
        let hits = keyword_candidates_sync(&conn, "tabs width", 10).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_keyword_candidates_case_insensitive() {
        let conn = setup_test_connection();
        save(&conn, "a", json!({"pref": "Use Tabs"}), 10);
        let hits = keyword_candidates_sync(&conn, "TABS", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_keyword_candidates_escapes_wildcards() {
        let conn = setup_test_connection();
        save(&conn, "a", json!({"pref": "plain"}), 10);
        // A bare '%' must not match everything
        let hits = keyword_candidates_sync(&conn, "100%", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_similarity_candidates_ranked() {
        let conn = setup_test_connection();
        save(&conn, "a", json!({"n": 1}), 10);
        save(&conn, "b", json!({"n": 2}), 20);
        save(&conn, "c", json!({"n": 3}), 30);
        store_embedding_sync(&conn, "a", &[1.0, 0.0], "test").unwrap();
        store_embedding_sync(&conn, "b", &[0.0, 1.0], "test").unwrap();
        // c stays un-embedded and must not appear

        let hits = similarity_candidates_sync(&conn, &[1.0, 0.1], 10, 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.key, "a");
        assert!(hits[0].1 > hits[1].1);
    }

    #[test]
    fn test_similarity_dimension_mismatch_deactivates() {
        let conn = setup_test_connection();
        save(&conn, "bad", json!({"n": 1}), 10);
        store_embedding_sync(&conn, "bad", &[1.0, 0.0, 0.0], "test").unwrap();

        let hits = similarity_candidates_sync(&conn, &[1.0, 0.0], 10, 2).unwrap();
        assert!(hits.is_empty());

        let active: i64 = conn
            .query_row(
                "SELECT is_active FROM memories WHERE key = 'bad'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(active, 0);
    }
}
