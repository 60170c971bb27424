// crates/recall-server/src/db/memory/ranking.rs
// Retrieval scoring: context boosts, time decay, frequency, recency

use std::collections::HashSet;

use recall_types::{Memory, ScoredMemory};

/// Caller context a candidate memory is scored against.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub project_id: Option<String>,
    pub file_path: Option<String>,
    pub memory_type: Option<String>,
    pub query: Option<String>,
}

/// Default number of results returned by ranked retrieval.
pub const DEFAULT_LIMIT: usize = 5;

/// Hard cap on ranked retrieval results.
pub const MAX_LIMIT: usize = 10;

const MS_PER_DAY: f64 = 86_400_000.0;
const SIX_HOURS_MS: i64 = 6 * 60 * 60 * 1000;
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Matching project boosts 1.5x.
const PROJECT_BOOST: f64 = 1.5;
/// Matching file dominates: 2.0x.
const FILE_BOOST: f64 = 2.0;
/// Matching type boosts 1.3x.
const TYPE_BOOST: f64 = 1.3;

/// Lowercase alphanumeric tokens, length >= 2.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Fraction of query tokens present in the value's token set.
pub fn overlap_ratio(value_text: &str, query_tokens: &[String]) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let value_tokens: HashSet<String> = tokenize(value_text).into_iter().collect();
    let hits = query_tokens
        .iter()
        .filter(|t| value_tokens.contains(*t))
        .count();
    hits as f64 / query_tokens.len() as f64
}

/// Score one memory against a context.
///
/// Multiplicative boosts over a clamped base relevance:
/// project 1.5 / file 2.0 / type 1.3, time decay 0.9^(days/30),
/// access boost 1 + log10(1+n)*0.1, recency 1.2 within 6h / 1.1 within 24h,
/// keyword boost 1 + 0.5*overlap. When `similarity` is present (hybrid
/// search), the keyword boost becomes max(keyword, 1 + similarity).
pub fn score_memory(
    memory: &Memory,
    ctx: &QueryContext,
    now_ms: i64,
    similarity: Option<f32>,
) -> f64 {
    let base = if memory.relevance_score.is_finite() {
        memory.relevance_score.clamp(0.0, 1.0)
    } else {
        1.0
    };

    let project_boost = match (&ctx.project_id, &memory.project_id) {
        (Some(c), Some(m)) if c == m => PROJECT_BOOST,
        _ => 1.0,
    };
    let file_boost = match (&ctx.file_path, &memory.file_path) {
        (Some(c), Some(m)) if c == m => FILE_BOOST,
        _ => 1.0,
    };
    let type_boost = match &ctx.memory_type {
        Some(t) if t == memory.memory_type.as_str() => TYPE_BOOST,
        _ => 1.0,
    };

    let days = ((now_ms - memory.timestamp).max(0)) as f64 / MS_PER_DAY;
    let time_decay = 0.9_f64.powf(days / 30.0);

    let access_boost = 1.0 + ((1 + memory.access_count.max(0)) as f64).log10() * 0.1;

    let recency_boost = match memory.last_accessed {
        Some(at) if now_ms - at <= SIX_HOURS_MS => 1.2,
        Some(at) if now_ms - at <= DAY_MS => 1.1,
        _ => 1.0,
    };

    let keyword_boost = match ctx.query.as_deref().map(str::trim) {
        Some(q) if !q.is_empty() => {
            let query_tokens = tokenize(q);
            let value_text = memory.value.to_string();
            1.0 + 0.5 * overlap_ratio(&value_text, &query_tokens)
        }
        // Empty query: no keyword contribution
        _ => 1.0,
    };
    let match_boost = match similarity {
        Some(sim) => keyword_boost.max(1.0 + sim as f64),
        None => keyword_boost,
    };

    base * project_boost * file_boost * type_boost * time_decay * access_boost * recency_boost
        * match_boost
}

/// Rank candidates: dedupe by key (max score wins), sort by score
/// descending, ties broken by later timestamp.
pub fn rank(
    candidates: Vec<(Memory, Option<f32>)>,
    ctx: &QueryContext,
    now_ms: i64,
    limit: usize,
) -> Vec<ScoredMemory> {
    let mut best: std::collections::HashMap<String, ScoredMemory> = std::collections::HashMap::new();

    for (memory, similarity) in candidates {
        let score = score_memory(&memory, ctx, now_ms, similarity);
        match best.get(&memory.key) {
            Some(existing) if existing.score >= score => {}
            _ => {
                best.insert(memory.key.clone(), ScoredMemory { score, memory });
            }
        }
    }

    let mut ranked: Vec<ScoredMemory> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.memory.timestamp.cmp(&a.memory.timestamp))
    });
    ranked.truncate(limit.clamp(1, MAX_LIMIT));
    ranked
}
