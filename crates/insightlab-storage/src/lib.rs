//! Insight Lab Storage Layer
//!
//! Everything that touches disk lives here:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                         STORAGE                                   │
//! ├───────────────────────────────────────────────────────────────────┤
//! │                                                                   │
//! │  ┌────────────┐    ┌──────────────────────────┐                   │
//! │  │ Validator  │───►│ CacheSet                 │                   │
//! │  │ Embedder   │    │  embedding_cache.json    │                   │
//! │  │ Retriever  │    │  retrieval_cache.json    │                   │
//! │  └────────────┘    │  reviewer_cache.json     │                   │
//! │                    └──────────────────────────┘                   │
//! │  ┌────────────┐    ┌──────────────────────────┐                   │
//! │  │ Ingestion  │───►│ PageTextStore            │◄── span context   │
//! │  └────────────┘    │  <source_id>.json        │                   │
//! │                    └──────────────────────────┘                   │
//! │  ┌────────────┐    ┌──────────────────────────┐                   │
//! │  │  Pipeline  │───►│ ArtifactStore + TraceLog │                   │
//! │  └────────────┘    └──────────────────────────┘                   │
//! │                                                                   │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Features
//!
//! - **Durable**: every cache write is flushed before `set` returns
//! - **Atomic**: files are replaced via rename, never written in place
//! - **Forgiving**: corrupt caches read as empty instead of failing

pub mod artifacts;
pub mod cache;
pub mod model;
pub mod pages;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use artifacts::{
    ArtifactStore, PayloadInsight, Report, RunPayload, SourceFile, TraceEvent, TraceLog,
};
pub use cache::{cache_key, CachePartition, CacheSet, EvidenceCache};
pub use model::{
    ActionItem, ChunkRecord, Claim, ClaimStatus, EvidenceSpan, Insight, Priority, RedTeamFinding,
    ReviewedClaim, Verdict, QUOTE_MAX_CHARS,
};
pub use pages::{NoPages, PageText, PageTextLookup, PageTextStore, StaticPages};

// ============================================================================
// Storage Configuration
// ============================================================================

/// Where each kind of durable state lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the cache partitions
    pub cache_dir: PathBuf,
    /// Directory for cached page text
    pub page_cache_dir: PathBuf,
    /// Directory for run artifacts
    pub artifacts_dir: PathBuf,
    /// JSONL trace log
    pub trace_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::rooted(PathBuf::from(".data"), PathBuf::from("artifacts"))
    }
}

impl StorageConfig {
    /// Standard layout under a data dir and an artifacts dir.
    pub fn rooted(data_dir: PathBuf, artifacts_dir: PathBuf) -> Self {
        Self {
            cache_dir: data_dir.join("cache"),
            page_cache_dir: data_dir.join("page_cache"),
            trace_path: artifacts_dir.join("traces.jsonl"),
            artifacts_dir,
        }
    }

    /// Load from environment variables, falling back to the standard layout.
    ///
    /// `INSIGHTLAB_DATA_DIR`, `CACHE_DIR`, `TEXT_CACHE_DIR`, `ARTIFACTS_DIR`, `TRACE_PATH`.
    pub fn from_env() -> Self {
        let env_path = |key: &str| std::env::var(key).ok().map(PathBuf::from);
        let data_dir = env_path("INSIGHTLAB_DATA_DIR").unwrap_or_else(|| PathBuf::from(".data"));
        let artifacts_dir = env_path("ARTIFACTS_DIR").unwrap_or_else(|| PathBuf::from("artifacts"));
        let mut config = Self::rooted(data_dir, artifacts_dir);
        if let Some(dir) = env_path("CACHE_DIR") {
            config.cache_dir = dir;
        }
        if let Some(dir) = env_path("TEXT_CACHE_DIR") {
            config.page_cache_dir = dir;
        }
        if let Some(path) = env_path("TRACE_PATH") {
            config.trace_path = path;
        }
        config
    }

    /// Layout for one run rooted at `run_dir`: its own artifacts and trace,
    /// caches and page text shared with `self`.
    pub fn for_run(&self, run_dir: &Path) -> Self {
        let artifacts_dir = run_dir.join("artifacts");
        Self {
            cache_dir: self.cache_dir.clone(),
            page_cache_dir: self.page_cache_dir.clone(),
            trace_path: artifacts_dir.join("traces.jsonl"),
            artifacts_dir,
        }
    }

    pub fn open_caches(&self) -> CacheSet {
        CacheSet::open(&self.cache_dir)
    }

    pub fn page_store(&self) -> PageTextStore {
        PageTextStore::new(&self.page_cache_dir)
    }

    pub fn artifacts(&self) -> ArtifactStore {
        ArtifactStore::new(&self.artifacts_dir)
    }

    pub fn trace_log(&self) -> TraceLog {
        TraceLog::new(&self.trace_path)
    }
}
