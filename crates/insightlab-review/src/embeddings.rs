//! Embedding strategies.
//!
//! Two implementations behind one trait, picked by configuration:
//! - [`DeterministicEmbedder`]: SHA-256 of the text, bytes scaled to `[0, 1]`.
//!   No network, stable across runs, useful only for exact-text recall.
//! - [`RemoteEmbedder`]: an OpenAI-compatible `/embeddings` endpoint.
//!
//! Either can be wrapped in [`CachedEmbedder`], which memoizes vectors in the
//! embeddings cache partition.

use crate::llm::providers::{ConfigError, LLMConfig, OpenAIClient};
use crate::llm::LLMError;
use async_trait::async_trait;
use insightlab_storage::{cache_key, EvidenceCache};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::sync::Arc;

pub const DETERMINISTIC_DIM: usize = 32;
pub const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifies the vector space; vectors from different names never mix.
    fn name(&self) -> String;

    /// One vector per input text, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LLMError>;
}

// ============================================================================
// Strategy selection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingStrategy {
    #[default]
    Deterministic,
    Remote,
}

impl FromStr for EmbeddingStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "deterministic" | "hash" => Ok(EmbeddingStrategy::Deterministic),
            "remote" | "openai" => Ok(EmbeddingStrategy::Remote),
            other => Err(ConfigError::Invalid(format!(
                "unknown embedding strategy '{other}' (expected deterministic or remote)"
            ))),
        }
    }
}

/// Build the configured embedder, wrapped in the embeddings cache.
pub fn build_embedder(
    strategy: EmbeddingStrategy,
    model: &str,
    cache: Arc<EvidenceCache>,
) -> Result<Arc<dyn EmbeddingProvider>, ConfigError> {
    let inner: Arc<dyn EmbeddingProvider> = match strategy {
        EmbeddingStrategy::Deterministic => Arc::new(DeterministicEmbedder::default()),
        EmbeddingStrategy::Remote => Arc::new(RemoteEmbedder::from_env(model)?),
    };
    Ok(Arc::new(CachedEmbedder::new(inner, cache)))
}

// ============================================================================
// Deterministic
// ============================================================================

/// Hash-derived vector of length `dim`; the digest repeats when `dim > 32`.
pub fn hash_embedding(text: &str, dim: usize) -> Vec<f32> {
    let digest = Sha256::digest(text.as_bytes());
    digest
        .iter()
        .cycle()
        .take(dim)
        .map(|b| *b as f32 / 255.0)
        .collect()
}

#[derive(Debug, Clone)]
pub struct DeterministicEmbedder {
    dim: usize,
}

impl Default for DeterministicEmbedder {
    fn default() -> Self {
        Self {
            dim: DETERMINISTIC_DIM,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for DeterministicEmbedder {
    fn name(&self) -> String {
        format!("deterministic-sha256-{}", self.dim)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LLMError> {
        Ok(texts.iter().map(|t| hash_embedding(t, self.dim)).collect())
    }
}

// ============================================================================
// Remote
// ============================================================================

pub struct RemoteEmbedder {
    client: OpenAIClient,
    model: String,
}

impl RemoteEmbedder {
    pub fn new(config: LLMConfig, model: &str) -> Self {
        Self {
            client: OpenAIClient::new(config),
            model: model.to_string(),
        }
    }

    /// Uses `OPENAI_API_KEY` and, when set, `OPENAI_BASE_URL`.
    pub fn from_env(model: &str) -> Result<Self, ConfigError> {
        let key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ConfigError::Invalid("remote embeddings require OPENAI_API_KEY".to_string())
            })?;
        let mut config = LLMConfig::openai(&key, model);
        config.base_url = std::env::var("OPENAI_BASE_URL").ok();
        Ok(Self::new(config, model))
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedder {
    fn name(&self) -> String {
        format!("remote-{}", self.model)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LLMError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.client.embed(&self.model, texts).await?;
        tracing::info!(count = vectors.len(), model = %self.model, "generated embeddings");
        Ok(vectors)
    }
}

// ============================================================================
// Cache wrapper
// ============================================================================

pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Arc<EvidenceCache>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, cache: Arc<EvidenceCache>) -> Self {
        Self { inner, cache }
    }

    fn key(&self, text: &str) -> String {
        cache_key(&[&self.inner.name(), text])
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    fn name(&self) -> String {
        self.inner.name()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LLMError> {
        let mut out: Vec<Option<Vec<f32>>> =
            texts.iter().map(|t| self.cache.get_as(&self.key(t))).collect();

        let misses: Vec<usize> = (0..texts.len()).filter(|&i| out[i].is_none()).collect();
        if !misses.is_empty() {
            let batch: Vec<String> = misses.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.inner.embed(&batch).await?;
            if vectors.len() != batch.len() {
                return Err(LLMError::InvalidResponse(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }
            for (&i, vector) in misses.iter().zip(vectors) {
                self.cache.set_as(&self.key(&texts[i]), &vector);
                out[i] = Some(vector);
            }
        }
        tracing::debug!(hits = texts.len() - misses.len(), misses = misses.len(), "embedding cache");

        Ok(out.into_iter().flatten().collect())
    }
}
