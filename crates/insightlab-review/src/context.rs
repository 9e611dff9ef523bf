//! Span context resolution.
//!
//! ```text
//!   span.chunk_text? ──yes──► chunk text (unmodified)
//!        │ no
//!        ▼
//!   page text cached? ──no──► span.quote (degraded)
//!        │ yes
//!        ▼
//!   page[char_start - window .. char_end + window], clamped
//! ```

use insightlab_storage::{EvidenceSpan, PageTextLookup};
use std::sync::Arc;

pub const DEFAULT_WINDOW: usize = 280;

/// Rebuilds the text surrounding an evidence span. Never fails.
#[derive(Clone)]
pub struct SpanContextResolver {
    pages: Arc<dyn PageTextLookup>,
    window: usize,
}

impl SpanContextResolver {
    pub fn new(pages: Arc<dyn PageTextLookup>) -> Self {
        Self {
            pages,
            window: DEFAULT_WINDOW,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn resolve(&self, span: &EvidenceSpan) -> String {
        self.resolve_with_window(span, self.window)
    }

    pub fn resolve_with_window(&self, span: &EvidenceSpan, window: usize) -> String {
        if let Some(chunk_text) = &span.chunk_text {
            return chunk_text.clone();
        }
        match self.pages.load_page_text(&span.source_id, span.page) {
            Some(page_text) => slice_window(&page_text, span.char_start, span.char_end, window),
            None => {
                tracing::debug!(
                    source_id = %span.source_id,
                    page = span.page,
                    "no page text cached; using quote as context"
                );
                span.quote.clone()
            }
        }
    }
}

/// Char-indexed `[start - window, end + window]`, clamped to the text.
/// An inverted window yields an empty string.
pub fn slice_window(text: &str, char_start: i64, char_end: i64, window: usize) -> String {
    let len = text.chars().count() as i64;
    let window = window as i64;
    let lo = char_start.saturating_sub(window).clamp(0, len);
    let hi = char_end.saturating_add(window).clamp(0, len);
    if hi <= lo {
        return String::new();
    }
    text.chars()
        .skip(lo as usize)
        .take((hi - lo) as usize)
        .collect()
}
