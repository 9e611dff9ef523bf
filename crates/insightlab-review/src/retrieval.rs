//! Chunk retrieval.
//!
//! [`Retriever`] is the seam every consumer depends on. [`ChunkIndex`] is
//! the bundled implementation: an in-memory vector index persisted as one
//! JSON file, searched by brute-force L2 distance, with a keyword fallback
//! when the query cannot be embedded into the index's vector space.

use crate::embeddings::EmbeddingProvider;
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use insightlab_storage::{cache_key, ChunkRecord, EvidenceCache};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::{Arc, OnceLock};

pub const INDEX_FILE_VERSION_V1: &str = "insightlab_index_v1";
pub const DEFAULT_K: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("query must not be empty")]
    EmptyQuery,
    #[error("retrieval backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Up to `k` chunks, best first. Errors only on an empty query.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<ChunkRecord>, RetrievalError>;
}

// ============================================================================
// Index file
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub chunk: ChunkRecord,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexFileV1 {
    pub version: String,
    pub embedder: String,
    pub dim: usize,
    pub updated_at: String,
    pub items: Vec<IndexedChunk>,
}

impl IndexFileV1 {
    fn empty(embedder: String) -> Self {
        Self {
            version: INDEX_FILE_VERSION_V1.to_string(),
            embedder,
            dim: 0,
            updated_at: Utc::now().to_rfc3339(),
            items: Vec::new(),
        }
    }

    fn fingerprint(&self) -> String {
        let mut parts: Vec<String> = vec![self.embedder.clone(), self.dim.to_string()];
        for item in &self.items {
            parts.push(item.chunk.id.clone());
            parts.push(cache_key(&[&item.chunk.text]));
        }
        let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
        cache_key(&refs)
    }
}

struct IndexState {
    file: IndexFileV1,
    fingerprint: String,
}

impl IndexState {
    fn new(file: IndexFileV1) -> Self {
        let fingerprint = file.fingerprint();
        Self { file, fingerprint }
    }
}

// ============================================================================
// Chunk index
// ============================================================================

pub struct ChunkIndex {
    state: RwLock<IndexState>,
    embedder: Arc<dyn EmbeddingProvider>,
    cache: Option<Arc<EvidenceCache>>,
}

impl ChunkIndex {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            state: RwLock::new(IndexState::new(IndexFileV1::empty(embedder.name()))),
            embedder,
            cache: None,
        }
    }

    /// Memoize search results in the retrieval cache partition.
    pub fn with_cache(mut self, cache: Arc<EvidenceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Load a persisted index. A missing file is an empty index.
    pub fn load(path: &Path, embedder: Arc<dyn EmbeddingProvider>) -> anyhow::Result<Self> {
        let index = Self::new(embedder);
        if !path.exists() {
            return Ok(index);
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading index {}", path.display()))?;
        let file: IndexFileV1 = serde_json::from_str(&contents)
            .with_context(|| format!("parsing index {}", path.display()))?;
        if file.version != INDEX_FILE_VERSION_V1 {
            anyhow::bail!(
                "unsupported index version: {} (expected {INDEX_FILE_VERSION_V1})",
                file.version
            );
        }
        if file.embedder != index.embedder.name() {
            tracing::warn!(
                stored = %file.embedder,
                configured = %index.embedder.name(),
                "index was built with a different embedder; dense search will fall back to keywords"
            );
        }
        *index.state.write() = IndexState::new(file);
        Ok(index)
    }

    /// Independent copy of the current contents, sharing the embedder and
    /// retrieval cache. Later upserts to either side do not affect the other.
    pub fn snapshot(&self) -> Self {
        let state = self.state.read();
        Self {
            state: RwLock::new(IndexState {
                file: state.file.clone(),
                fingerprint: state.fingerprint.clone(),
            }),
            embedder: Arc::clone(&self.embedder),
            cache: self.cache.clone(),
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string(&self.state.read().file)?;
        std::fs::write(path, json).with_context(|| format!("writing index {}", path.display()))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.read().file.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fingerprint(&self) -> String {
        self.state.read().fingerprint.clone()
    }

    pub fn chunks(&self) -> Vec<ChunkRecord> {
        self.state
            .read()
            .file
            .items
            .iter()
            .map(|i| i.chunk.clone())
            .collect()
    }

    /// Embed and upsert chunks by id. Returns the number upserted.
    ///
    /// If the embedder's vector space differs from the stored one, the index
    /// is rebuilt from the new chunks alone.
    pub async fn add_chunks(&self, chunks: &[ChunkRecord]) -> anyhow::Result<usize> {
        if chunks.is_empty() {
            tracing::warn!("no chunks provided for indexing");
            return Ok(0);
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .context("embedding chunks")?;
        let dim = vectors.first().map_or(0, Vec::len);
        let name = self.embedder.name();

        let mut state = self.state.write();
        let file = &mut state.file;
        if !file.items.is_empty() && (file.dim != dim || file.embedder != name) {
            tracing::warn!(
                old_dim = file.dim,
                new_dim = dim,
                "embedding space changed; resetting index"
            );
            file.items.clear();
        }
        file.dim = dim;
        file.embedder = name;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            let item = IndexedChunk {
                chunk: chunk.clone(),
                vector,
            };
            match file.items.iter_mut().find(|i| i.chunk.id == chunk.id) {
                Some(existing) => *existing = item,
                None => file.items.push(item),
            }
        }
        file.updated_at = Utc::now().to_rfc3339();
        state.fingerprint = state.file.fingerprint();
        tracing::info!(upserted = chunks.len(), total = state.file.items.len(), "indexed chunks");
        Ok(chunks.len())
    }

    fn dense(&self, query_vector: &[f32], k: usize) -> Option<Vec<ChunkRecord>> {
        let state = self.state.read();
        let file = &state.file;
        if file.items.is_empty() || query_vector.len() != file.dim {
            return None;
        }
        // Equal dimensions do not imply a shared vector space.
        if file.embedder != self.embedder.name() {
            return None;
        }
        let mut hits: Vec<ChunkRecord> = file
            .items
            .iter()
            .map(|item| {
                let distance = l2_distance(query_vector, &item.vector);
                ChunkRecord {
                    score: 1.0 / (1.0 + distance),
                    ..item.chunk.clone()
                }
            })
            .collect();
        rank(&mut hits);
        hits.truncate(k);
        Some(hits)
    }

    fn keyword_fallback(&self, query: &str, k: usize) -> Vec<ChunkRecord> {
        let terms: Vec<String> = word_pattern()
            .find_iter(query)
            .map(|m| m.as_str().to_lowercase())
            .collect();
        if terms.is_empty() {
            return Vec::new();
        }
        let state = self.state.read();
        let mut hits: Vec<ChunkRecord> = state
            .file
            .items
            .iter()
            .filter_map(|item| {
                let lowered = item.chunk.text.to_lowercase();
                let score: usize = terms.iter().map(|t| lowered.matches(t.as_str()).count()).sum();
                (score > 0).then(|| ChunkRecord {
                    score: score as f64,
                    ..item.chunk.clone()
                })
            })
            .collect();
        rank(&mut hits);
        hits.truncate(k);
        hits
    }
}

fn word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\w+").expect("static word regex"))
}

fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = (*x - *y) as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Best score first, ties by id.
fn rank(hits: &mut [ChunkRecord]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[async_trait]
impl Retriever for ChunkIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<ChunkRecord>, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::EmptyQuery);
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let key = cache_key(&["search", query, &k.to_string(), &self.fingerprint()]);
        if let Some(cache) = &self.cache {
            if let Some(hits) = cache.get_as::<Vec<ChunkRecord>>(&key) {
                tracing::debug!(query, "retrieval cache hit");
                return Ok(hits);
            }
        }

        let dense = match self.embedder.embed(&[query.to_string()]).await {
            Ok(mut vectors) => vectors.pop().and_then(|v| self.dense(&v, k)),
            Err(err) => {
                tracing::warn!(error = %err, "query embedding failed; falling back to keyword search");
                None
            }
        };
        let hits = match dense {
            Some(hits) if !hits.is_empty() => hits,
            _ => self.keyword_fallback(query, k),
        };
        if hits.is_empty() {
            tracing::info!(query, "no results found");
        }

        if let Some(cache) = &self.cache {
            cache.set_as(&key, &hits);
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::DeterministicEmbedder;
    use crate::llm::LLMError;
    use tempfile::tempdir;

    struct BrokenEmbedder;

    #[async_trait]
    impl EmbeddingProvider for BrokenEmbedder {
        fn name(&self) -> String {
            "broken".into()
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, LLMError> {
            Err(LLMError::Network("offline".into()))
        }
    }

    /// Same vectors as the deterministic embedder under another name.
    struct RenamedEmbedder(DeterministicEmbedder);

    #[async_trait]
    impl EmbeddingProvider for RenamedEmbedder {
        fn name(&self) -> String {
            "renamed-model".into()
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LLMError> {
            self.0.embed(texts).await
        }
    }

    fn chunk(id: &str, text: &str) -> ChunkRecord {
        ChunkRecord {
            id: id.into(),
            text: text.into(),
            score: 0.0,
            source_id: "doc".into(),
            page: 1,
            char_start: 0,
            char_end: text.chars().count() as i64,
        }
    }

    #[tokio::test]
    async fn empty_query_is_an_error() {
        let index = ChunkIndex::new(Arc::new(DeterministicEmbedder::default()));
        assert!(matches!(
            index.search("   ", 3).await,
            Err(RetrievalError::EmptyQuery)
        ));
        assert!(index.search("anything", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exact_text_ranks_first_with_unit_score() {
        let index = ChunkIndex::new(Arc::new(DeterministicEmbedder::default()));
        index
            .add_chunks(&[chunk("a", "solar output rose"), chunk("b", "wind output fell")])
            .await
            .unwrap();
        let hits = index.search("wind output fell", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "b");
        assert!((hits[0].score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let index = ChunkIndex::new(Arc::new(DeterministicEmbedder::default()));
        index.add_chunks(&[chunk("a", "old")]).await.unwrap();
        let before = index.fingerprint();
        index.add_chunks(&[chunk("a", "new")]).await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.chunks()[0].text, "new");
        assert_ne!(before, index.fingerprint());
    }

    #[tokio::test]
    async fn snapshot_is_independent() {
        let index = ChunkIndex::new(Arc::new(DeterministicEmbedder::default()));
        index.add_chunks(&[chunk("a", "alpha")]).await.unwrap();
        let copy = index.snapshot();
        assert_eq!(copy.fingerprint(), index.fingerprint());

        copy.add_chunks(&[chunk("b", "bravo")]).await.unwrap();
        assert_eq!(copy.len(), 2);
        assert_eq!(index.len(), 1);
        assert_ne!(copy.fingerprint(), index.fingerprint());
    }

    #[tokio::test]
    async fn keyword_fallback_counts_terms() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.json");
        let built = ChunkIndex::new(Arc::new(DeterministicEmbedder::default()));
        built
            .add_chunks(&[
                chunk("a", "tariffs raised prices"),
                chunk("b", "tariffs tariffs and more tariffs"),
                chunk("c", "unrelated text"),
            ])
            .await
            .unwrap();
        built.save(&path).unwrap();

        let index = ChunkIndex::load(&path, Arc::new(BrokenEmbedder)).unwrap();
        let hits = index.search("Tariffs", 5).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!((hits[0].score - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn foreign_embedder_with_same_dimension_uses_keywords() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.json");
        let built = ChunkIndex::new(Arc::new(DeterministicEmbedder::default()));
        built
            .add_chunks(&[chunk("a", "solar output rose"), chunk("b", "wind output fell")])
            .await
            .unwrap();
        built.save(&path).unwrap();

        let index =
            ChunkIndex::load(&path, Arc::new(RenamedEmbedder(DeterministicEmbedder::default())))
                .unwrap();
        let hits = index.search("wind output fell", 2).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        // Keyword scores are term counts, not 1 / (1 + distance).
        assert!((hits[0].score - 3.0).abs() < 1e-9);
        assert!((hits[1].score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn results_are_memoized() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(EvidenceCache::open(dir.path().join("retrieval_cache.json")));
        let index = ChunkIndex::new(Arc::new(DeterministicEmbedder::default()))
            .with_cache(cache.clone());
        index.add_chunks(&[chunk("a", "alpha")]).await.unwrap();

        let first = index.search("alpha", 1).await.unwrap();
        assert_eq!(cache.len(), 1);
        let second = index.search("alpha", 1).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }
}
