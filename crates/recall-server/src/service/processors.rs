// crates/recall-server/src/service/processors.rs
// Queue processors for post-save work: embedding, extraction, compaction

use std::sync::Arc;

use async_trait::async_trait;
use recall_types::QueueMessage;

use crate::db;
use crate::queue::QueueProcessor;

use super::MemoryService;

/// Computes and persists the embedding for a freshly saved memory.
pub struct EmbedMemoryProcessor {
    service: Arc<MemoryService>,
}

impl EmbedMemoryProcessor {
    pub fn new(service: Arc<MemoryService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl QueueProcessor for EmbedMemoryProcessor {
    async fn process(&self, message: &QueueMessage) -> Result<(), String> {
        let key = message
            .payload
            .get("key")
            .and_then(|k| k.as_str())
            .ok_or_else(|| "embed_memory payload missing key".to_string())?
            .to_string();

        let Some(embedder) = self.service.embedder() else {
            // Provider went away after enqueue; nothing to do
            return Ok(());
        };

        let lookup_key = key.clone();
        let memory = self
            .service
            .pool()
            .run(move |conn| db::get_memory_sync(conn, &lookup_key))
            .await
            .map_err(|e| e.to_string())?;

        // Deleted between enqueue and processing: benign
        let Some(memory) = memory else {
            return Ok(());
        };

        let text = match &memory.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        let vector = embedder
            .embed(&text)
            .await
            .map_err(|e| format!("embedding failed for {key}: {e}"))?;
        if vector.len() != self.service.embedding_dim() {
            return Err(format!(
                "embedder produced {}-dim vector, expected {}",
                vector.len(),
                self.service.embedding_dim()
            ));
        }

        let provider = embedder.provider_id();
        let store_key = key.clone();
        self.service
            .pool()
            .run_with_retry(move |conn| {
                db::store_embedding_sync(conn, &store_key, &vector, provider)
            })
            .await
            .map_err(|e| e.to_string())?;

        tracing::debug!(key, "Stored memory embedding");
        Ok(())
    }
}

/// Runs heuristic preference extraction over queued text.
pub struct ExtractPreferencesProcessor {
    service: Arc<MemoryService>,
}

impl ExtractPreferencesProcessor {
    pub fn new(service: Arc<MemoryService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl QueueProcessor for ExtractPreferencesProcessor {
    async fn process(&self, message: &QueueMessage) -> Result<(), String> {
        let text = message
            .payload
            .get("text")
            .and_then(|t| t.as_str())
            .ok_or_else(|| "extract_preferences payload missing text".to_string())?;
        let project_id = message
            .payload
            .get("project_id")
            .and_then(|p| p.as_str())
            .map(String::from);

        let stored = self
            .service
            .extract_and_store(text, project_id)
            .await
            .map_err(|e| e.to_string())?;
        if stored > 0 {
            tracing::debug!(stored, "Stored extracted preference suggestions");
        }
        Ok(())
    }
}

/// Applies a scheduled store compaction.
pub struct CompactProcessor {
    service: Arc<MemoryService>,
}

impl CompactProcessor {
    pub fn new(service: Arc<MemoryService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl QueueProcessor for CompactProcessor {
    async fn process(&self, _message: &QueueMessage) -> Result<(), String> {
        let report = self
            .service
            .compact(false)
            .await
            .map_err(|e| e.to_string())?;
        tracing::info!(
            removed = report.removed,
            deduplicated = report.deduplicated,
            before = report.before_size,
            after = report.after_size,
            "Store compaction finished"
        );
        Ok(())
    }
}
