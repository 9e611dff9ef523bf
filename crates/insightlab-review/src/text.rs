//! Text normalization helpers shared by drafting and validation.
//!
//! All functions are pure. Offsets returned here count chars, matching the
//! convention used by [`insightlab_storage::EvidenceSpan`].

use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall",
    "can", "what", "when", "where", "which", "who", "whom", "whose", "why", "how", "this", "that",
    "these", "those", "you", "she", "they", "them", "his", "her", "its", "our", "their", "and",
    "but", "then", "than", "for", "with", "about", "from", "into", "onto", "not", "also", "such",
];

/// Collapse whitespace runs to single spaces and trim.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercased [`normalize`]; the comparison form used by the structural check.
///
/// Final sigma folds to `σ` so a match does not depend on where a word ends.
pub fn normalize_for_match(text: &str) -> String {
    normalize(text).chars().flat_map(fold_case).collect()
}

/// Per-char lowercase with `ς` folded to `σ`.
fn fold_case(c: char) -> impl Iterator<Item = char> {
    c.to_lowercase().map(|l| if l == 'ς' { 'σ' } else { l })
}

/// Split into sentences after `.`, `!` or `?` followed by whitespace.
///
/// Empty input yields no sentences; text without a boundary is one sentence.
pub fn sentence_split(text: &str) -> Vec<String> {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return Vec::new();
    }

    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = normalized.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek() == Some(&' ') {
            chars.next();
            sentences.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        sentences.push(current);
    }
    sentences
}

/// Lowercased alphanumeric tokens of at least three chars, stopwords removed.
pub fn extract_keywords(text: &str) -> BTreeSet<String> {
    normalize(text)
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(w))
        .map(String::from)
        .collect()
}

/// Clip to at most `max_chars` chars.
pub fn clip_quote(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Find `needle` in `haystack` ignoring case and whitespace differences.
///
/// Returns `(start, end)` char offsets into the original `haystack`, end
/// exclusive.
pub fn locate_normalized(haystack: &str, needle: &str) -> Option<(usize, usize)> {
    let target: Vec<char> = normalize_for_match(needle).chars().collect();
    if target.is_empty() {
        return None;
    }

    // Normalized haystack chars, each mapped back to its source char index.
    let mut norm: Vec<char> = Vec::new();
    let mut origin: Vec<usize> = Vec::new();
    let mut in_space = false;
    for (idx, c) in haystack.chars().enumerate() {
        if c.is_whitespace() {
            if !in_space && !norm.is_empty() {
                norm.push(' ');
                origin.push(idx);
            }
            in_space = true;
            continue;
        }
        in_space = false;
        for lower in fold_case(c) {
            norm.push(lower);
            origin.push(idx);
        }
    }

    if target.len() > norm.len() {
        return None;
    }
    (0..=norm.len() - target.len())
        .find(|&start| norm[start..start + target.len()] == target[..])
        .map(|start| (origin[start], origin[start + target.len() - 1] + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize("  a \n\t b  c "), "a b c");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn sentence_split_boundaries() {
        assert!(sentence_split("").is_empty());
        assert!(sentence_split("  \n ").is_empty());
        assert_eq!(sentence_split("no boundary here"), vec!["no boundary here"]);
        assert_eq!(
            sentence_split("First one.  Second?\nThird! Tail"),
            vec!["First one.", "Second?", "Third!", "Tail"]
        );
        // Decimal points are not boundaries.
        assert_eq!(sentence_split("Up 3.5 percent."), vec!["Up 3.5 percent."]);
    }

    #[test]
    fn keywords_drop_short_tokens_and_stopwords() {
        let kw = extract_keywords("The Event X occurred in 2020, and the event was big.");
        let expected: BTreeSet<String> = ["event", "occurred", "2020", "big"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(kw, expected);
    }

    #[test]
    fn locate_ignores_case_and_spacing() {
        let hay = "Intro.  Revenue   GREW\nby 4% in 2020.";
        let (start, end) = locate_normalized(hay, "revenue grew by 4%").unwrap();
        let found: String = hay.chars().skip(start).take(end - start).collect();
        assert_eq!(found, "Revenue   GREW\nby 4%");
        assert!(locate_normalized(hay, "shrank").is_none());
        assert!(locate_normalized(hay, "   ").is_none());
    }

    #[test]
    fn final_sigma_matches_mid_word_sigma() {
        let hay = "ΣΤΗΝ ΟΔΟΣ ΑΘΗΝΑΣ";
        assert_eq!(locate_normalized(hay, "ΟΔΟΣ"), Some((5, 9)));
        assert_eq!(locate_normalized(hay, "οδος αθηνας"), Some((5, 16)));
        // Σ lowercases to ς at a word end and σ elsewhere; both compare equal.
        assert_eq!(normalize_for_match("ΟΔΟΣ"), normalize_for_match("ΟΔΟΣΑ").trim_end_matches('α'));
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip_quote("héllo", 2), "hé");
        assert_eq!(clip_quote("ab", 10), "ab");
    }
}
