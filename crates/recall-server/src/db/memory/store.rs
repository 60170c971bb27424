// crates/recall-server/src/db/memory/store.rs
// Memory write path: save with content-hash dedup, delete, embed

use recall_types::{MemoryType, Scope};
use rusqlite::OptionalExtension;
use serde_json::Value;

use super::embedding_to_bytes;
use crate::util::{canonical_json, content_hash};

/// Parameters for saving a memory.
#[derive(Debug, Clone)]
pub struct SaveMemoryParams {
    pub key: String,
    pub memory_type: MemoryType,
    pub value: Value,
    pub project_id: Option<String>,
    pub scope: Scope,
    pub file_path: Option<String>,
    pub relevance_score: f64,
    pub metadata: Option<Value>,
    pub embedding: Option<Vec<f32>>,
}

/// How a save landed in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// New row inserted under the given key.
    Inserted { id: i64, key: String },
    /// Same-key row overwritten.
    Updated { id: i64, key: String },
    /// An active row under a different key already holds identical content;
    /// it was touched (timestamp bumped, access_count incremented) and no
    /// new row was written.
    Deduplicated { id: i64, key: String },
}

impl SaveOutcome {
    /// Key of the surviving record.
    pub fn key(&self) -> &str {
        match self {
            SaveOutcome::Inserted { key, .. }
            | SaveOutcome::Updated { key, .. }
            | SaveOutcome::Deduplicated { key, .. } => key,
        }
    }

    pub fn is_dedup(&self) -> bool {
        matches!(self, SaveOutcome::Deduplicated { .. })
    }
}

/// Save a memory (sync version for pool.run()).
///
/// Write path:
/// 1. Hash `type || 0x1F || canonical-JSON(value)`.
/// 2. An active row with the same hash under a *different* key absorbs the
///    save: its timestamp is bumped and access_count incremented, nothing
///    is inserted. Scope and project are excluded from the hash so
///    universal-vs-project duplicates collapse onto the surviving record.
/// 3. Otherwise upsert by key; same-key updates overwrite everything,
///    including the embedding.
pub fn save_memory_sync(
    conn: &rusqlite::Connection,
    params: &SaveMemoryParams,
    now_ms: i64,
) -> rusqlite::Result<SaveOutcome> {
    let hash = content_hash(params.memory_type.as_str(), &params.value);

    // Cross-key dedup against active rows only
    let duplicate: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, key FROM memories
             WHERE content_hash = ?1 AND key != ?2 AND is_active = 1
             LIMIT 1",
            rusqlite::params![hash, params.key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    if let Some((id, key)) = duplicate {
        conn.execute(
            "UPDATE memories
             SET timestamp = ?1, access_count = access_count + 1
             WHERE id = ?2",
            rusqlite::params![now_ms, id],
        )?;
        return Ok(SaveOutcome::Deduplicated { id, key });
    }

    let value_json = canonical_json(&params.value);
    let metadata_json = params.metadata.as_ref().map(|m| m.to_string());
    let embedding_blob = params.embedding.as_deref().map(embedding_to_bytes);

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM memories WHERE key = ?1",
            [&params.key],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(id) = existing {
        conn.execute(
            "UPDATE memories
             SET memory_type = ?1, value = ?2, content_hash = ?3, project_id = ?4,
                 scope = ?5, file_path = ?6, timestamp = ?7, relevance_score = ?8,
                 metadata = ?9, embedding = ?10, is_active = 1
             WHERE id = ?11",
            rusqlite::params![
                params.memory_type.as_str(),
                value_json,
                hash,
                params.project_id,
                params.scope.as_str(),
                params.file_path,
                now_ms,
                params.relevance_score,
                metadata_json,
                embedding_blob,
                id
            ],
        )?;
        return Ok(SaveOutcome::Updated {
            id,
            key: params.key.clone(),
        });
    }

    conn.execute(
        "INSERT INTO memories
             (key, memory_type, value, content_hash, project_id, scope, file_path,
              timestamp, access_count, relevance_score, is_active, metadata, embedding)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, 1, ?10, ?11)",
        rusqlite::params![
            params.key,
            params.memory_type.as_str(),
            value_json,
            hash,
            params.project_id,
            params.scope.as_str(),
            params.file_path,
            now_ms,
            params.relevance_score,
            metadata_json,
            embedding_blob
        ],
    )?;
    Ok(SaveOutcome::Inserted {
        id: conn.last_insert_rowid(),
        key: params.key.clone(),
    })
}

/// Store an embedding for an existing memory, recording the provider in its
/// metadata so mixed-model blobs can be skipped at read time.
pub fn store_embedding_sync(
    conn: &rusqlite::Connection,
    key: &str,
    embedding: &[f32],
    provider_id: &str,
) -> rusqlite::Result<bool> {
    let metadata: Option<Option<String>> = conn
        .query_row("SELECT metadata FROM memories WHERE key = ?1", [key], |r| {
            r.get(0)
        })
        .optional()?;

    let Some(metadata) = metadata else {
        return Ok(false);
    };

    let mut meta: Value = metadata
        .as_deref()
        .and_then(|m| serde_json::from_str(m).ok())
        .unwrap_or_else(|| Value::Object(Default::default()));
    if let Value::Object(map) = &mut meta {
        map.insert(
            "embedding_provider".to_string(),
            Value::String(provider_id.to_string()),
        );
    }

    let updated = conn.execute(
        "UPDATE memories SET embedding = ?1, metadata = ?2 WHERE key = ?3",
        rusqlite::params![embedding_to_bytes(embedding), meta.to_string(), key],
    )?;
    Ok(updated > 0)
}

/// Hard-delete a memory by key. Returns true if a row was removed.
pub fn delete_memory_sync(conn: &rusqlite::Connection, key: &str) -> rusqlite::Result<bool> {
    let deleted = conn.execute("DELETE FROM memories WHERE key = ?1", [key])?;
    Ok(deleted > 0)
}
