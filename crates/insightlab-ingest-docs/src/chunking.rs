//! Greedy token-window chunking with overlap.
//!
//! A token is a run of non-whitespace plus its trailing whitespace, so the
//! chunk text is always a contiguous slice of the page. Offsets are in chars,
//! relative to the page text.

use insightlab_storage::{ChunkRecord, PageText};
use regex::Regex;
use std::sync::OnceLock;

pub const TARGET_TOKENS: usize = 350;
pub const CHUNK_OVERLAP: usize = 60;

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("overlap ({overlap}) must be smaller than target_tokens ({target})")]
    InvalidOverlap { target: usize, overlap: usize },
}

/// Chunk id in the canonical `{source}:p{page:04}:c{idx:04}` form.
pub fn chunk_id(source_id: &str, page: i64, idx: usize) -> String {
    format!("{source_id}:p{page:04}:c{idx:04}")
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\S+\s*").expect("static token regex"))
}

struct Token {
    byte_start: usize,
    byte_end: usize,
    char_start: usize,
    char_end: usize,
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars_seen = 0;
    let mut bytes_seen = 0;
    for m in token_pattern().find_iter(text) {
        chars_seen += text[bytes_seen..m.start()].chars().count();
        let char_start = chars_seen;
        let char_end = char_start + m.as_str().chars().count();
        tokens.push(Token {
            byte_start: m.start(),
            byte_end: m.end(),
            char_start,
            char_end,
        });
        chars_seen = char_end;
        bytes_seen = m.end();
    }
    tokens
}

/// Chunk every non-empty page of one source.
pub fn chunk_pages(
    source_id: &str,
    pages: &[PageText],
    target_tokens: usize,
    overlap: usize,
) -> Result<Vec<ChunkRecord>, ChunkError> {
    if overlap >= target_tokens {
        return Err(ChunkError::InvalidOverlap {
            target: target_tokens,
            overlap,
        });
    }

    let mut chunks = Vec::new();
    for page in pages {
        if page.text.trim().is_empty() {
            continue;
        }
        let tokens = tokenize(&page.text);
        if tokens.is_empty() {
            continue;
        }

        let mut start_idx = 0;
        let mut chunk_idx = 0;
        while start_idx < tokens.len() {
            let end_idx = (start_idx + target_tokens).min(tokens.len());
            let window = &tokens[start_idx..end_idx];
            let (first, last) = (&window[0], &window[window.len() - 1]);
            let text = page.text[first.byte_start..last.byte_end].trim();
            if text.is_empty() {
                break;
            }
            chunks.push(ChunkRecord {
                id: chunk_id(source_id, page.page, chunk_idx),
                text: text.to_string(),
                score: 0.0,
                source_id: source_id.to_string(),
                page: page.page,
                char_start: first.char_start as i64,
                char_end: last.char_end as i64,
            });
            chunk_idx += 1;
            if end_idx >= tokens.len() {
                break;
            }
            start_idx = end_idx - overlap;
        }
    }
    tracing::debug!(source_id, chunks = chunks.len(), "chunked pages");
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: i64, text: &str) -> PageText {
        PageText {
            page: n,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_overlap_must_be_smaller_than_window() {
        let err = chunk_pages("doc", &[page(1, "a b c")], 10, 10).unwrap_err();
        assert!(matches!(err, ChunkError::InvalidOverlap { .. }));
    }

    #[test]
    fn test_windows_overlap_and_ids() {
        let text = "one two three four five six seven";
        let chunks = chunk_pages("doc", &[page(2, text)], 4, 1).unwrap();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["one two three four", "four five six seven"]
        );
        assert_eq!(chunks[0].id, "doc:p0002:c0000");
        assert_eq!(chunks[1].id, "doc:p0002:c0001");
    }

    #[test]
    fn test_offsets_are_char_based_and_page_relative() {
        let text = "héllo wörld again";
        let chunks = chunk_pages("doc", &[page(1, text)], 2, 1).unwrap();
        let chars: Vec<char> = text.chars().collect();
        for chunk in &chunks {
            let slice: String = chars[chunk.char_start as usize..chunk.char_end as usize]
                .iter()
                .collect();
            assert_eq!(slice.trim(), chunk.text);
        }
        assert_eq!(chunks[1].char_start, 6);
    }

    #[test]
    fn test_empty_pages_skipped() {
        let chunks = chunk_pages("doc", &[page(1, "   "), page(2, "text")], 5, 1).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page, 2);
    }
}
