//! Document ingestion for Insight Lab
//!
//! Loads source documents page by page and cuts them into chunk records:
//! - Plain text and Markdown (pages separated by form feeds)
//! - PDF documents (with `--features pdf`)
//!
//! Output:
//! - [`ChunkRecord`]s with page-relative char offsets, ready for indexing
//! - Raw page text in the page cache, used later to rebuild span context
//!
//! Source ids are file stems, so `reports/q3.pdf` becomes `q3`.

use anyhow::{Context, Result};
use insightlab_storage::{ChunkRecord, PageText, PageTextStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub mod chunking;
pub mod pdf;

pub use chunking::{chunk_id, chunk_pages, ChunkError, CHUNK_OVERLAP, TARGET_TOKENS};
pub use pdf::PdfError;

/// A loaded document: one entry per page, numbered from 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub source_id: String,
    pub pages: Vec<PageText>,
}

impl SourceDocument {
    /// Build from raw page strings, numbering pages from 1.
    pub fn from_pages(source_id: impl Into<String>, pages: Vec<String>) -> Self {
        Self {
            source_id: source_id.into(),
            pages: pages
                .into_iter()
                .enumerate()
                .map(|(i, text)| PageText {
                    page: i as i64 + 1,
                    text,
                })
                .collect(),
        }
    }

    /// Chunk with the default window.
    pub fn chunks(&self) -> Result<Vec<ChunkRecord>, ChunkError> {
        chunk_pages(&self.source_id, &self.pages, TARGET_TOKENS, CHUNK_OVERLAP)
    }
}

/// Kinds of files the loader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Text,
    Pdf,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "md" | "markdown" => Some(DocumentKind::Text),
            "pdf" => Some(DocumentKind::Pdf),
            _ => None,
        }
    }
}

/// Load one document from disk.
pub fn load_document(path: &Path) -> Result<SourceDocument> {
    let kind = DocumentKind::from_path(path)
        .with_context(|| format!("unsupported document type: {}", path.display()))?;
    let source_id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .with_context(|| format!("no usable file stem: {}", path.display()))?;

    let pages = match kind {
        DocumentKind::Text => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            pdf::split_pages(&text)
        }
        DocumentKind::Pdf => pdf::extract_pages(path)
            .with_context(|| format!("extracting {}", path.display()))?,
    };
    tracing::info!(path = %path.display(), pages = pages.len(), "loaded document");
    Ok(SourceDocument::from_pages(source_id, pages))
}

/// Result of ingesting a directory.
#[derive(Debug, Clone, Default)]
pub struct IngestedCorpus {
    pub chunks: Vec<ChunkRecord>,
    /// Source id → original file name, for every document that loaded
    pub sources: BTreeMap<String, String>,
}

/// Supported files under `dir`, sorted.
pub fn discover_documents(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        anyhow::bail!("Input directory not found: {}", dir.display());
    }
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| DocumentKind::from_path(p).is_some())
        .collect();
    files.sort();
    Ok(files)
}

/// Walk `dir` (sorted), load every supported file, cache its page text and
/// return all chunks.
///
/// A file that fails to load is logged and skipped; the rest still ingest.
pub fn ingest_dir(dir: &Path, page_store: &PageTextStore) -> Result<Vec<ChunkRecord>> {
    Ok(ingest_corpus(dir, page_store)?.chunks)
}

/// [`ingest_dir`], also reporting which file each source id came from.
pub fn ingest_corpus(dir: &Path, page_store: &PageTextStore) -> Result<IngestedCorpus> {
    let files = discover_documents(dir)?;
    if files.is_empty() {
        tracing::warn!(dir = %dir.display(), "no documents found");
        return Ok(IngestedCorpus::default());
    }

    let mut corpus = IngestedCorpus::default();
    for path in &files {
        let document = match load_document(path) {
            Ok(doc) => doc,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping document");
                continue;
            }
        };
        page_store.cache_page_texts(&document.source_id, &document.pages)?;
        let chunks = document.chunks()?;
        tracing::info!(
            source_id = %document.source_id,
            chunks = chunks.len(),
            total = corpus.chunks.len() + chunks.len(),
            "ingested document"
        );
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        corpus.sources.insert(document.source_id, file_name);
        corpus.chunks.extend(chunks);
    }
    Ok(corpus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use insightlab_storage::PageTextLookup;
    use tempfile::tempdir;

    #[test]
    fn test_document_kind() {
        assert_eq!(DocumentKind::from_path(Path::new("a/b.MD")), Some(DocumentKind::Text));
        assert_eq!(DocumentKind::from_path(Path::new("b.pdf")), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_path(Path::new("b.docx")), None);
    }

    #[test]
    fn test_load_text_document_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "Page one text.\x0CPage two text.").unwrap();

        let doc = load_document(&path).unwrap();
        assert_eq!(doc.source_id, "notes");
        assert_eq!(doc.pages.len(), 2);
        assert_eq!(doc.pages[1].page, 2);
        assert_eq!(doc.pages[1].text, "Page two text.");
    }

    #[test]
    fn test_ingest_dir_caches_pages_and_chunks() {
        let input = tempdir().unwrap();
        let cache = tempdir().unwrap();
        std::fs::write(input.path().join("b.md"), "# Beta\n\nBeta body.").unwrap();
        std::fs::write(input.path().join("a.txt"), "Alpha body text.").unwrap();
        std::fs::write(input.path().join("ignored.csv"), "x,y").unwrap();

        let store = PageTextStore::new(cache.path());
        let chunks = ingest_dir(input.path(), &store).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, "a:p0001:c0000");
        assert_eq!(chunks[1].source_id, "b");
        assert_eq!(store.load_page_text("a", 1).as_deref(), Some("Alpha body text."));
    }

    #[test]
    fn test_ingest_corpus_maps_sources_to_files() {
        let input = tempdir().unwrap();
        let cache = tempdir().unwrap();
        std::fs::write(input.path().join("Field Notes.md"), "Notes body.").unwrap();
        std::fs::write(input.path().join("memo.txt"), "Memo body.").unwrap();

        let store = PageTextStore::new(cache.path());
        let corpus = ingest_corpus(input.path(), &store).unwrap();

        assert_eq!(corpus.chunks.len(), 2);
        assert_eq!(corpus.sources.len(), 2);
        assert_eq!(corpus.sources["Field Notes"], "Field Notes.md");
        assert_eq!(corpus.sources["memo"], "memo.txt");
    }

    #[test]
    fn test_discover_skips_unsupported_files() {
        let input = tempdir().unwrap();
        std::fs::write(input.path().join("z.txt"), "z").unwrap();
        std::fs::write(input.path().join("a.csv"), "a").unwrap();
        let files = discover_documents(input.path()).unwrap();
        assert_eq!(files, vec![input.path().join("z.txt")]);
    }

    #[test]
    fn test_ingest_missing_dir_fails() {
        let cache = tempdir().unwrap();
        let store = PageTextStore::new(cache.path());
        assert!(ingest_dir(Path::new("/definitely/not/here"), &store).is_err());
    }
}
