// crates/recall-server/src/embeddings/mod.rs
// Embedding provider module

mod ollama;
mod openai;

pub use self::ollama::OllamaEmbeddings;
pub use self::openai::OpenAiEmbeddings;

use crate::config::ApiKeys;
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Capability that turns text into a fixed-dimension vector.
///
/// May be absent at runtime; retrieval degrades to keyword-only.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    /// Declared output dimension; persisted blobs must match.
    fn dimensions(&self) -> usize;
    /// Stable provider identifier, recorded next to each stored vector.
    fn provider_id(&self) -> &'static str;
}

/// Backend-specific embedding implementation
enum EmbeddingBackend {
    OpenAi(OpenAiEmbeddings),
    Ollama(OllamaEmbeddings),
}

/// Embedding client with automatic provider selection
///
/// Priority: OpenAI (highest quality) > Ollama (local, no key needed)
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
}

impl EmbeddingClient {
    /// Create a client from pre-loaded configuration.
    ///
    /// Returns None when no provider is configured; the engine then runs
    /// keyword-only.
    pub fn from_config(api_keys: &ApiKeys, dimensions: usize) -> Option<Self> {
        if let Some(api_key) = api_keys.openai.as_ref() {
            info!(dimensions, "Using OpenAI embeddings (text-embedding-3-small)");
            return Some(Self {
                backend: EmbeddingBackend::OpenAi(OpenAiEmbeddings::new(
                    api_key.clone(),
                    dimensions,
                )),
            });
        }

        if let Some(host) = api_keys.ollama.as_ref() {
            let client = OllamaEmbeddings::new(host.clone(), None, dimensions);
            info!(
                model = client.model_name(),
                dimensions, "Using Ollama embeddings"
            );
            return Some(Self {
                backend: EmbeddingBackend::Ollama(client),
            });
        }

        None
    }

    /// Create a client from environment configuration.
    pub fn from_env(dimensions: usize) -> Option<Self> {
        Self::from_config(&ApiKeys::from_env(), dimensions)
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match &self.backend {
            EmbeddingBackend::OpenAi(c) => c.embed(text).await,
            EmbeddingBackend::Ollama(c) => c.embed(text).await,
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match &self.backend {
            EmbeddingBackend::OpenAi(c) => c.embed_batch(texts).await,
            EmbeddingBackend::Ollama(c) => c.embed_batch(texts).await,
        }
    }

    fn dimensions(&self) -> usize {
        match &self.backend {
            EmbeddingBackend::OpenAi(c) => c.dimensions(),
            EmbeddingBackend::Ollama(c) => c.dimensions(),
        }
    }

    fn provider_id(&self) -> &'static str {
        match &self.backend {
            EmbeddingBackend::OpenAi(_) => "openai",
            EmbeddingBackend::Ollama(_) => "ollama",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_keys_no_client() {
        let keys = ApiKeys::default();
        assert!(EmbeddingClient::from_config(&keys, 384).is_none());
    }

    #[test]
    fn test_openai_takes_priority() {
        let keys = ApiKeys {
            openai: Some("sk-test".to_string()),
            ollama: Some("http://localhost:11434".to_string()),
        };
        let client = EmbeddingClient::from_config(&keys, 384).unwrap();
        assert_eq!(client.provider_id(), "openai");
        assert_eq!(client.dimensions(), 384);
    }

    #[test]
    fn test_ollama_fallback() {
        let keys = ApiKeys {
            openai: None,
            ollama: Some("http://localhost:11434".to_string()),
        };
        let client = EmbeddingClient::from_config(&keys, 768).unwrap();
        assert_eq!(client.provider_id(), "ollama");
        assert_eq!(client.dimensions(), 768);
    }
}
