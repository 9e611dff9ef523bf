//! Cached page text, one JSON file per source document.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Read access to full page text. Used to rebuild context around legacy
/// spans that do not carry their chunk text.
pub trait PageTextLookup: Send + Sync {
    fn load_page_text(&self, source_id: &str, page: i64) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    pub page: i64,
    pub text: String,
}

/// `<dir>/<source_id>.json` holding `[{"page": n, "text": "..."}]`.
pub struct PageTextStore {
    dir: PathBuf,
}

impl PageTextStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn source_path(&self, source_id: &str) -> PathBuf {
        self.dir.join(format!("{source_id}.json"))
    }

    /// Persist page texts for a source. Empty pages are skipped.
    pub fn cache_page_texts(&self, source_id: &str, pages: &[PageText]) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let payload: Vec<&PageText> = pages.iter().filter(|p| !p.text.is_empty()).collect();
        let target = self.source_path(source_id);
        std::fs::write(&target, serde_json::to_string_pretty(&payload)?)?;
        Ok(target)
    }
}

impl PageTextLookup for PageTextStore {
    fn load_page_text(&self, source_id: &str, page: i64) -> Option<String> {
        let path = self.source_path(source_id);
        let contents = std::fs::read_to_string(&path).ok()?;
        let pages: Vec<PageText> = match serde_json::from_str(&contents) {
            Ok(pages) => pages,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "page cache corrupt");
                return None;
            }
        };
        pages.into_iter().find(|p| p.page == page).map(|p| p.text)
    }
}

/// In-memory page table, handy when the corpus is already loaded.
#[derive(Default)]
pub struct StaticPages {
    pages: RwLock<HashMap<(String, i64), String>>,
}

impl StaticPages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, source_id: &str, page: i64, text: impl Into<String>) {
        self.pages
            .write()
            .insert((source_id.to_string(), page), text.into());
    }
}

impl PageTextLookup for StaticPages {
    fn load_page_text(&self, source_id: &str, page: i64) -> Option<String> {
        self.pages
            .read()
            .get(&(source_id.to_string(), page))
            .cloned()
    }
}

/// No page cache at all; every lookup misses.
pub struct NoPages;

impl PageTextLookup for NoPages {
    fn load_page_text(&self, _source_id: &str, _page: i64) -> Option<String> {
        None
    }
}
