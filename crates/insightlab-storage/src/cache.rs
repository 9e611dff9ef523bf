//! Durable JSON key/value caches.
//!
//! Each [`EvidenceCache`] is one partition backed by one JSON file. The map is
//! hydrated lazily on first access and written back on every `set`, through a
//! temporary sibling file that is renamed over the target so a concurrent
//! reader never observes a torn file. A corrupt or unreadable file is treated
//! as an empty cache.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Named cache partitions. Partitions never share keys or files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachePartition {
    Embeddings,
    Retrieval,
    Validation,
}

impl CachePartition {
    pub fn file_name(&self) -> &'static str {
        match self {
            CachePartition::Embeddings => "embedding_cache.json",
            CachePartition::Retrieval => "retrieval_cache.json",
            CachePartition::Validation => "reviewer_cache.json",
        }
    }
}

/// Deterministic cache key: hex SHA-256 over the parts, unit-separator joined.
pub fn cache_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

// ============================================================================
// Single partition
// ============================================================================

pub struct EvidenceCache {
    path: PathBuf,
    entries: RwLock<Option<BTreeMap<String, Value>>>,
}

impl EvidenceCache {
    /// Open a cache file. Nothing is read until the first access.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn hydrate(path: &Path) -> BTreeMap<String, Value> {
        if !path.exists() {
            return BTreeMap::new();
        }
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "cache unreadable; starting empty");
                return BTreeMap::new();
            }
        };
        match serde_json::from_str(&contents) {
            Ok(map) => map,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "cache corrupt; starting empty");
                BTreeMap::new()
            }
        }
    }

    fn ensure_loaded(&self) {
        if self.entries.read().is_some() {
            return;
        }
        let mut guard = self.entries.write();
        if guard.is_none() {
            *guard = Some(Self::hydrate(&self.path));
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.ensure_loaded();
        self.entries
            .read()
            .as_ref()
            .and_then(|map| map.get(key).cloned())
    }

    /// Typed lookup. A stored value of the wrong shape counts as a miss.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(err) => {
                tracing::debug!(key, error = %err, "ignoring malformed cache entry");
                None
            }
        }
    }

    /// Insert and flush. Flush failures are logged, never returned.
    pub fn set(&self, key: &str, value: Value) {
        self.ensure_loaded();
        let mut guard = self.entries.write();
        let map = guard.get_or_insert_with(BTreeMap::new);
        map.insert(key.to_string(), value);
        if let Err(err) = Self::write_atomic(&self.path, map) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to flush cache");
        }
    }

    pub fn set_as<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(v) => self.set(key, v),
            Err(err) => tracing::warn!(key, error = %err, "value not serializable; not cached"),
        }
    }

    pub fn len(&self) -> usize {
        self.ensure_loaded();
        self.entries.read().as_ref().map_or(0, |m| m.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the current contents to disk. A never-loaded cache is a no-op.
    pub fn flush(&self) -> anyhow::Result<()> {
        let guard = self.entries.read();
        match guard.as_ref() {
            Some(map) => Self::write_atomic(&self.path, map),
            None => Ok(()),
        }
    }

    fn write_atomic(path: &Path, map: &BTreeMap<String, Value>) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(map)?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

// ============================================================================
// Partition set
// ============================================================================

/// The three process-wide cache partitions, opened once and shared.
#[derive(Clone)]
pub struct CacheSet {
    embeddings: Arc<EvidenceCache>,
    retrieval: Arc<EvidenceCache>,
    validation: Arc<EvidenceCache>,
}

impl CacheSet {
    pub fn open(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let open = |p: CachePartition| Arc::new(EvidenceCache::open(dir.join(p.file_name())));
        Self {
            embeddings: open(CachePartition::Embeddings),
            retrieval: open(CachePartition::Retrieval),
            validation: open(CachePartition::Validation),
        }
    }

    pub fn partition(&self, partition: CachePartition) -> Arc<EvidenceCache> {
        match partition {
            CachePartition::Embeddings => Arc::clone(&self.embeddings),
            CachePartition::Retrieval => Arc::clone(&self.retrieval),
            CachePartition::Validation => Arc::clone(&self.validation),
        }
    }

    pub fn flush(&self) -> anyhow::Result<()> {
        self.embeddings.flush()?;
        self.retrieval.flush()?;
        self.validation.flush()?;
        Ok(())
    }
}
