// crates/recall-server/src/config.rs
// Environment-based configuration - single source of truth for all env vars

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, warn};

/// Default embedding dimension when EMBEDDING_DIM is unset.
pub const DEFAULT_EMBEDDING_DIM: usize = 384;

/// Core engine configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory holding memory.db (DATA_DIR, default ~/.claude-recall)
    pub data_dir: PathBuf,
    /// Soft cap on stored memories before compaction kicks in (MAX_MEMORIES)
    pub max_memories: i64,
    /// Database size threshold for auto-compact (COMPACT_SIZE_BYTES)
    pub compact_size_bytes: i64,
    /// Rate-limit window in milliseconds (RATE_WINDOW_MS)
    pub rate_window_ms: i64,
    /// Requests allowed per window per session (RATE_MAX)
    pub rate_max: u32,
    /// Declared embedding dimension; persisted blobs must match (EMBEDDING_DIM)
    pub embedding_dim: usize,
    /// Default retry budget for new queue messages (QUEUE_DEFAULT_MAX_RETRIES)
    pub queue_default_max_retries: i64,
    /// Log level: debug|info|warn|error (LOG_LEVEL)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_memories: 10_000,
            compact_size_bytes: 10 * 1024 * 1024,
            rate_window_ms: 60_000,
            rate_max: 100,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            queue_default_max_retries: 3,
            log_level: "warn".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults (with a warning) on unparsable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let data_dir = std::env::var("DATA_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let queue_default_max_retries =
            parse_env("QUEUE_DEFAULT_MAX_RETRIES", defaults.queue_default_max_retries);
        if !(0..=10).contains(&queue_default_max_retries) {
            warn!(
                value = queue_default_max_retries,
                "QUEUE_DEFAULT_MAX_RETRIES out of [0,10], using 3"
            );
        }

        Self {
            data_dir,
            max_memories: parse_env("MAX_MEMORIES", defaults.max_memories),
            compact_size_bytes: parse_env("COMPACT_SIZE_BYTES", defaults.compact_size_bytes),
            rate_window_ms: parse_env("RATE_WINDOW_MS", defaults.rate_window_ms),
            rate_max: parse_env("RATE_MAX", defaults.rate_max),
            embedding_dim: parse_env("EMBEDDING_DIM", defaults.embedding_dim),
            queue_default_max_retries: queue_default_max_retries.clamp(0, 10),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }

    /// Path of the SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("memory.db")
    }
}

/// Embedding provider credentials loaded from environment variables.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// OpenAI API key (OPENAI_API_KEY)
    pub openai: Option<String>,
    /// Ollama host, e.g. http://localhost:11434 (OLLAMA_HOST)
    pub ollama: Option<String>,
}

impl ApiKeys {
    /// Load provider keys from the environment.
    ///
    /// Set `RECALL_DISABLE_EMBEDDINGS=1` to force keyword-only retrieval.
    pub fn from_env() -> Self {
        if matches!(
            std::env::var("RECALL_DISABLE_EMBEDDINGS").as_deref(),
            Ok("1") | Ok("true")
        ) {
            debug!("RECALL_DISABLE_EMBEDDINGS is set, embeddings disabled");
            return Self::default();
        }

        Self {
            openai: read_key("OPENAI_API_KEY"),
            ollama: read_key("OLLAMA_HOST"),
        }
    }

    pub fn has_embeddings(&self) -> bool {
        self.openai.is_some() || self.ollama.is_some()
    }
}

/// Read a single key from the environment, filtering empty values.
fn read_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|k| !k.trim().is_empty())
}

/// Parse an env var, falling back to a default with a warning.
fn parse_env<T: FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(var = name, value = %raw, "Unparsable value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Default data directory: ~/.claude-recall (CWD-relative fallback when no
/// home directory is available).
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".claude-recall"))
        .unwrap_or_else(|| PathBuf::from(".claude-recall"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.max_memories, 10_000);
        assert_eq!(c.compact_size_bytes, 10 * 1024 * 1024);
        assert_eq!(c.rate_window_ms, 60_000);
        assert_eq!(c.rate_max, 100);
        assert_eq!(c.embedding_dim, 384);
        assert_eq!(c.queue_default_max_retries, 3);
        assert!(c.db_path().ends_with("memory.db"));
    }

    #[test]
    fn test_data_dir_defaults_under_home() {
        let c = Config::default();
        assert!(c.data_dir.ends_with(".claude-recall"));
    }
}
