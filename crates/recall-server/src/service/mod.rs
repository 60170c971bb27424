// crates/recall-server/src/service/mod.rs
// Memory service: business logic on top of the store
//
// Stateless orchestration: validation and derived defaults on the way in,
// ranked retrieval on the way out. Post-save work (embedding, pattern
// extraction, compaction) is submitted to the queue, never run inline.

pub mod extraction;
pub mod processors;

use std::sync::Arc;

use recall_types::{CompactReport, Memory, MemoryStats, MemoryType, Scope, ScoredMemory};
use serde_json::Value;

use crate::db::memory::ranking::{self, QueryContext};
use crate::db::pool::DatabasePool;
use crate::db::queue::EnqueueParams;
use crate::db::{self, ContextFilter, SaveMemoryParams};
use crate::embeddings::Embedder;
use crate::error::{RecallError, Result};
use crate::ports::{Clock, IdGen};
use crate::queue::QueueService;

/// Queue carrying post-save embedding jobs.
pub const EMBED_QUEUE: &str = "embeddings";
/// Queue carrying preference-extraction jobs.
pub const EXTRACT_QUEUE: &str = "extract";
/// Queue carrying store-maintenance jobs.
pub const MAINTENANCE_QUEUE: &str = "maintenance";

/// Candidate pool sizes for hybrid retrieval.
const KEYWORD_CANDIDATES: usize = 20;
const VECTOR_CANDIDATES: usize = 20;

/// Soft-deleted rows older than this are eligible for hard deletion during
/// compaction.
const INACTIVE_RETENTION_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Caller-facing input for storing a memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryInput {
    /// Caller-supplied key; derived when absent.
    pub key: Option<String>,
    pub memory_type: Option<MemoryType>,
    pub value: Value,
    pub project_id: Option<String>,
    pub scope: Option<Scope>,
    pub file_path: Option<String>,
    pub relevance_score: Option<f64>,
    pub metadata: Option<Value>,
}

/// One entry of a store_preferences batch.
#[derive(Debug, Clone)]
pub struct PreferenceInput {
    pub key: String,
    pub value: Value,
    pub confidence: f64,
    pub reasoning: Option<String>,
}

/// Result of a store call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreResult {
    pub key: String,
    pub stored: bool,
    /// Identical content already existed under a different key.
    pub deduplicated: bool,
    /// A brand-new row was inserted (false for updates and dedups).
    pub created: bool,
}

/// Search filters accepted by ranked retrieval.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub project_id: Option<String>,
    pub file_path: Option<String>,
    pub memory_type: Option<String>,
}

/// Orchestrates ingest and retrieval over the store, queue, and embedder.
pub struct MemoryService {
    pool: Arc<DatabasePool>,
    queue: Arc<QueueService>,
    embedder: Option<Arc<dyn Embedder>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGen>,
    /// Project applied when the caller names none (from RECALL_PROJECT_ID).
    default_project: Option<String>,
    embedding_dim: usize,
}

impl MemoryService {
    pub fn new(
        pool: Arc<DatabasePool>,
        queue: Arc<QueueService>,
        embedder: Option<Arc<dyn Embedder>>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGen>,
        embedding_dim: usize,
    ) -> Self {
        let default_project = std::env::var("RECALL_PROJECT_ID")
            .ok()
            .filter(|v| !v.trim().is_empty());
        Self {
            pool,
            queue,
            embedder,
            clock,
            ids,
            default_project,
            embedding_dim,
        }
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    /// Validate, apply derived defaults, and save.
    ///
    /// Non-dedup saves of textual content schedule embedding and extraction
    /// jobs on the queue; both are fire-and-forget (enqueue failures are
    /// logged, never surfaced to the caller).
    pub async fn store(&self, input: MemoryInput) -> Result<StoreResult> {
        if input.value.is_null() {
            return Err(RecallError::Validation("value must not be null".into()));
        }
        if let Some(score) = input.relevance_score
            && !(0.0..=1.0).contains(&score)
        {
            return Err(RecallError::Validation(format!(
                "relevance_score must be in [0, 1], got {score}"
            )));
        }
        if let Some(key) = &input.key
            && key.trim().is_empty()
        {
            return Err(RecallError::Validation("key must not be empty".into()));
        }

        let key = input
            .key
            .clone()
            .unwrap_or_else(|| format!("mem-{}", self.ids.new_id()));
        let memory_type = input.memory_type.clone().unwrap_or(MemoryType::Context);
        let project_id = input.project_id.clone().or(self.default_project.clone());
        let scope = input.scope.unwrap_or(if project_id.is_some() {
            Scope::Project
        } else {
            Scope::Universal
        });

        let params = SaveMemoryParams {
            key: key.clone(),
            memory_type: memory_type.clone(),
            value: input.value.clone(),
            project_id: project_id.clone(),
            scope,
            file_path: input.file_path.clone(),
            relevance_score: input.relevance_score.unwrap_or(1.0),
            metadata: input.metadata.clone(),
            embedding: None,
        };

        let now = self.clock.now_ms();
        let outcome = self
            .pool
            .run_with_retry(move |conn| db::save_memory_sync(conn, &params, now))
            .await?;

        let deduplicated = outcome.is_dedup();
        let created = matches!(outcome, db::SaveOutcome::Inserted { .. });
        let surviving_key = outcome.key().to_string();

        if !deduplicated {
            self.schedule_post_save(&surviving_key, &memory_type, &input.value, &project_id)
                .await;
        }

        Ok(StoreResult {
            key: surviving_key,
            stored: true,
            deduplicated,
            created,
        })
    }

    /// Queue embedding and extraction work after a fresh insert or update.
    async fn schedule_post_save(
        &self,
        key: &str,
        memory_type: &MemoryType,
        value: &Value,
        project_id: &Option<String>,
    ) {
        if self.embedder.is_some() {
            let mut params = EnqueueParams::new(
                EMBED_QUEUE,
                "embed_memory",
                serde_json::json!({ "key": key }),
            );
            params.priority = 20;
            params.correlation_id = Some(key.to_string());
            if let Err(e) = self.queue.enqueue(params).await {
                tracing::warn!(key, "Failed to schedule embedding: {}", e);
            }
        }

        // Extraction feeds on user-authored content; suggestions and
        // preferences themselves never re-enter the extractor
        let extractable = !matches!(
            memory_type,
            MemoryType::AnalysisSuggestion | MemoryType::Preference
        );
        if extractable && let Some(text) = textual_content(value) {
            let mut params = EnqueueParams::new(
                EXTRACT_QUEUE,
                "extract_preferences",
                serde_json::json!({ "text": text, "project_id": project_id }),
            );
            params.priority = 10;
            params.correlation_id = Some(key.to_string());
            if let Err(e) = self.queue.enqueue(params).await {
                tracing::warn!(key, "Failed to schedule extraction: {}", e);
            }
        }
    }

    /// Retrieve one memory by key, recording the access.
    pub async fn retrieve(&self, key: &str) -> Result<Memory> {
        let key_owned = key.to_string();
        let now = self.clock.now_ms();
        let found = self
            .pool
            .run(move |conn| db::retrieve_memory_sync(conn, &key_owned, now))
            .await?;
        found.ok_or_else(|| RecallError::NotFound(key.to_string()))
    }

    /// Ranked hybrid search: keyword candidates, merged with vector
    /// candidates when an embedder is available. Embedding failures degrade
    /// to keyword-only with a warning.
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: Option<usize>,
    ) -> Result<Vec<ScoredMemory>> {
        let limit = limit
            .unwrap_or(ranking::DEFAULT_LIMIT)
            .clamp(1, ranking::MAX_LIMIT);

        let query_owned = query.to_string();
        let keyword_hits = self
            .pool
            .run(move |conn| db::keyword_candidates_sync(conn, &query_owned, KEYWORD_CANDIDATES))
            .await?;

        let mut candidates: Vec<(Memory, Option<f32>)> =
            keyword_hits.into_iter().map(|m| (m, None)).collect();

        if let Some(embedder) = &self.embedder {
            match embedder.embed(query).await {
                Ok(vector) => {
                    let dim = self.embedding_dim;
                    let vector_hits = self
                        .pool
                        .run(move |conn| {
                            db::similarity_candidates_sync(conn, &vector, VECTOR_CANDIDATES, dim)
                        })
                        .await?;
                    candidates.extend(
                        vector_hits
                            .into_iter()
                            .map(|(memory, similarity)| (memory, Some(similarity))),
                    );
                }
                Err(e) => {
                    tracing::warn!("Query embedding failed, keyword-only search: {}", e);
                }
            }
        }

        let ctx = QueryContext {
            project_id: filters.project_id.clone(),
            file_path: filters.file_path.clone(),
            memory_type: filters.memory_type.clone(),
            query: Some(query.to_string()),
        };
        Ok(ranking::rank(candidates, &ctx, self.clock.now_ms(), limit))
    }

    /// Rank memories for a caller context without a free-text query.
    ///
    /// With no context at all, recent active memories still rank by
    /// decay/recency/access.
    pub async fn find_relevant(
        &self,
        ctx: QueryContext,
        limit: Option<usize>,
    ) -> Result<Vec<ScoredMemory>> {
        let limit = limit
            .unwrap_or(ranking::DEFAULT_LIMIT)
            .clamp(1, ranking::MAX_LIMIT);

        let mut candidates: Vec<(Memory, Option<f32>)> = Vec::new();

        if let Some(query) = ctx.query.as_deref().filter(|q| !q.trim().is_empty()) {
            let query_owned = query.to_string();
            let hits = self
                .pool
                .run(move |conn| {
                    db::keyword_candidates_sync(conn, &query_owned, KEYWORD_CANDIDATES)
                })
                .await?;
            candidates.extend(hits.into_iter().map(|m| (m, None)));
        }

        // Recent actives are always candidates; the scoring function (not
        // the filter) decides how context matches rank
        let recent = self
            .pool
            .run(move |conn| db::search_by_context_sync(conn, &ContextFilter::default(), 100))
            .await?;
        candidates.extend(recent.into_iter().map(|m| (m, None)));

        // A context-filtered pool widens coverage when the store is larger
        // than the recent window
        if ctx.project_id.is_some() || ctx.file_path.is_some() || ctx.memory_type.is_some() {
            let filter = ContextFilter {
                project_id: ctx.project_id.clone(),
                file_path: ctx.file_path.clone(),
                memory_type: ctx.memory_type.clone(),
                scope: None,
            };
            let scoped = self
                .pool
                .run(move |conn| db::search_by_context_sync(conn, &filter, 100))
                .await?;
            candidates.extend(scoped.into_iter().map(|m| (m, None)));
        }

        Ok(ranking::rank(candidates, &ctx, self.clock.now_ms(), limit))
    }

    /// Unscored, filtered context lookup.
    pub async fn search_by_context(&self, filter: ContextFilter, limit: usize) -> Result<Vec<Memory>> {
        self.pool
            .run(move |conn| db::search_by_context_sync(conn, &filter, limit))
            .await
    }

    /// Batch path for confirmed preferences.
    pub async fn store_preferences(&self, preferences: Vec<PreferenceInput>) -> Result<usize> {
        for pref in &preferences {
            if !(0.0..=1.0).contains(&pref.confidence) {
                return Err(RecallError::Validation(format!(
                    "confidence must be in [0, 1], got {} for key {:?}",
                    pref.confidence, pref.key
                )));
            }
            if pref.key.trim().is_empty() {
                return Err(RecallError::Validation(
                    "preference key must not be empty".into(),
                ));
            }
        }

        let mut stored = 0;
        for pref in preferences {
            let mut metadata = serde_json::Map::new();
            metadata.insert("confidence".to_string(), serde_json::json!(pref.confidence));
            if let Some(reasoning) = &pref.reasoning {
                metadata.insert("reasoning".to_string(), Value::String(reasoning.clone()));
            }

            self.store(MemoryInput {
                key: Some(pref.key),
                memory_type: Some(MemoryType::Preference),
                value: pref.value,
                metadata: Some(Value::Object(metadata)),
                relevance_score: Some(pref.confidence),
                ..Default::default()
            })
            .await?;
            stored += 1;
        }
        Ok(stored)
    }

    /// Heuristic extraction; candidates are saved as analysis-suggestion
    /// memories. Returns the number of suggestions stored.
    pub async fn extract_and_store(&self, text: &str, project_id: Option<String>) -> Result<usize> {
        let candidates = extraction::extract_preferences(text);
        let mut stored = 0;
        for candidate in candidates {
            let result = self
                .store(MemoryInput {
                    key: Some(format!("suggestion-{}", candidate.key)),
                    memory_type: Some(MemoryType::AnalysisSuggestion),
                    value: Value::String(candidate.value),
                    project_id: project_id.clone(),
                    relevance_score: Some(candidate.confidence),
                    metadata: Some(serde_json::json!({
                        "confidence": candidate.confidence,
                        "reasoning": candidate.reasoning,
                    })),
                    ..Default::default()
                })
                .await?;
            if result.created {
                stored += 1;
            }
        }
        Ok(stored)
    }

    /// Store-wide statistics.
    pub async fn get_stats(&self) -> Result<MemoryStats> {
        self.pool.run(db::stats_sync).await
    }

    /// Compact the store (dry-run supported).
    pub async fn compact(&self, dry_run: bool) -> Result<CompactReport> {
        let cutoff = self.clock.now_ms() - INACTIVE_RETENTION_MS;
        self.pool
            .run(move |conn| db::compact_sync(conn, dry_run, cutoff))
            .await
    }

    /// Hard-delete one memory by key.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.pool
            .run_with_retry(move |conn| db::delete_memory_sync(conn, &key))
            .await
    }

    /// Clear context-typed memories (the clear_context tool).
    pub async fn clear_context(&self) -> Result<usize> {
        self.pool
            .run_with_retry(|conn| db::clear_memories_sync(conn, Some("context"), None))
            .await
    }

    /// Enqueue a compaction when the store exceeds its soft caps.
    /// Called by the maintenance janitor; errors are the caller's to log.
    pub async fn schedule_compaction_if_needed(
        &self,
        max_memories: i64,
        compact_size_bytes: i64,
    ) -> Result<bool> {
        let stats = self.get_stats().await?;
        if stats.total <= max_memories && stats.size_bytes <= compact_size_bytes {
            return Ok(false);
        }

        let mut params = EnqueueParams::new(
            MAINTENANCE_QUEUE,
            "compact",
            serde_json::json!({ "total": stats.total, "size_bytes": stats.size_bytes }),
        );
        params.priority = 5;
        self.queue.enqueue(params).await?;
        tracing::info!(
            total = stats.total,
            size_bytes = stats.size_bytes,
            "Scheduled store compaction"
        );
        Ok(true)
    }

    /// Release the database handle.
    pub fn close(&self) {
        self.pool.close();
    }

    pub(crate) fn pool(&self) -> &Arc<DatabasePool> {
        &self.pool
    }

    pub(crate) fn embedder(&self) -> Option<&Arc<dyn Embedder>> {
        self.embedder.as_ref()
    }

    pub(crate) fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }
}

/// Pull embeddable/extractable text out of a stored value: the string
/// itself, or common content fields of an object.
fn textual_content(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(map) => {
            for field in ["content", "text", "pref", "note", "description"] {
                if let Some(Value::String(s)) = map.get(field)
                    && !s.trim().is_empty()
                {
                    return Some(s.clone());
                }
            }
            None
        }
        _ => None,
    }
}
