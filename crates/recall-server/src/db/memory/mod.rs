// crates/recall-server/src/db/memory/mod.rs
// Memory row operations: mapping, save/dedup, queries, ranking, compaction

mod compact;
mod query;
pub mod ranking;
mod store;

pub use compact::{clear_memories_sync, compact_sync, database_size_sync, stats_sync};
pub use query::{
    ContextFilter, get_memory_sync, keyword_candidates_sync, retrieve_memory_sync,
    search_by_context_sync, similarity_candidates_sync,
};
pub use store::{SaveMemoryParams, SaveOutcome, delete_memory_sync, save_memory_sync,
    store_embedding_sync};

use recall_types::{Memory, MemoryType, Scope};
use serde_json::Value;

/// Column list shared by every memory SELECT. Order matters:
/// `parse_memory_row` maps by index.
pub(crate) const MEMORY_COLUMNS: &str = "key, memory_type, value, content_hash, project_id, \
     scope, file_path, timestamp, last_accessed, access_count, relevance_score, is_active, \
     metadata, embedding";

/// Map a row selected with [`MEMORY_COLUMNS`] into a Memory.
pub fn parse_memory_row(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
    let memory_type: String = row.get(1)?;
    let raw_value: String = row.get(2)?;
    let scope: String = row.get(5)?;
    let metadata: Option<String> = row.get(12)?;
    let embedding: Option<Vec<u8>> = row.get(13)?;

    Ok(Memory {
        key: row.get(0)?,
        memory_type: MemoryType::from(memory_type.as_str()),
        value: parse_value(&raw_value),
        content_hash: row.get(3)?,
        project_id: row.get(4)?,
        scope: Scope::parse(&scope),
        file_path: row.get(6)?,
        timestamp: row.get(7)?,
        last_accessed: row.get(8)?,
        access_count: row.get(9)?,
        relevance_score: row.get(10)?,
        is_active: row.get::<_, i64>(11)? != 0,
        metadata: metadata.as_deref().map(parse_value),
        embedding: embedding.as_deref().map(bytes_to_embedding),
    })
}

/// Legacy rows may hold non-JSON text; treat it as a JSON string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Serialize an embedding as a little-endian f32 blob.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode a little-endian f32 blob back into a vector.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity between two vectors; 0.0 when either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Discard row-mapping errors with a log line (rows are never silently
/// half-parsed).
pub(crate) fn log_and_discard<T>(result: rusqlite::Result<T>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("Discarding unreadable row: {}", e);
            None
        }
    }
}
