//! Claim drafting from retrieved passages.
//!
//! The model proposes claims with verbatim quotes keyed to numbered
//! passages. Every quote is located in its passage to mint a span with
//! page-relative offsets; quotes that cannot be found are dropped. When the
//! model is unavailable or returns nothing usable, claims are drafted
//! deterministically from the leading sentences of each passage.

use crate::llm::StructuredLlm;
use crate::retrieval::{RetrievalError, Retriever};
use crate::text::{clip_quote, locate_normalized, sentence_split};
use insightlab_storage::{
    ArtifactStore, ChunkRecord, Claim, ClaimStatus, EvidenceSpan, QUOTE_MAX_CHARS,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

pub const DEFAULT_RESEARCH_K: usize = 8;
pub const DEFAULT_MAX_CLAIMS: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("topic must not be empty")]
    EmptyTopic,
    #[error("no retrieval results for topic '{0}'")]
    NoEvidence(String),
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    #[error("failed to persist claims: {0}")]
    Persist(String),
}

/// Span over `quote` inside a retrieval hit, offsets relative to the page.
///
/// `None` when the quote does not occur in the hit text.
pub fn mint_span(hit: &ChunkRecord, quote: &str) -> Option<EvidenceSpan> {
    let (start, end) = locate_normalized(&hit.text, quote)?;
    let verbatim: String = hit.text.chars().skip(start).take(end - start).collect();
    Some(EvidenceSpan {
        source_id: hit.source_id.clone(),
        page: hit.page,
        char_start: hit.char_start + start as i64,
        char_end: hit.char_start + end as i64,
        quote: clip_quote(&verbatim, QUOTE_MAX_CHARS),
        chunk_id: Some(hit.id.clone()),
        chunk_text: Some(hit.text.clone()),
    })
}

/// Span covering a whole hit.
pub fn whole_hit_span(hit: &ChunkRecord) -> EvidenceSpan {
    EvidenceSpan {
        source_id: hit.source_id.clone(),
        page: hit.page,
        char_start: hit.char_start,
        char_end: hit.char_end,
        quote: clip_quote(&hit.text, QUOTE_MAX_CHARS),
        chunk_id: Some(hit.id.clone()),
        chunk_text: Some(hit.text.clone()),
    }
}

// ============================================================================
// Model output
// ============================================================================

#[derive(Debug, Deserialize)]
struct DraftedEvidence {
    passage: usize,
    quote: String,
}

#[derive(Debug, Deserialize)]
struct DraftedClaim {
    text: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    subpoints: Vec<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    evidence: Vec<DraftedEvidence>,
}

const DRAFT_SYSTEM_PROMPT: &str = "You draft research claims grounded in the numbered \
passages you are given. Use only those passages. Every claim must cite at least one \
verbatim quote copied exactly from a passage. Respond with JSON only: {\"claims\": \
[{\"text\": \"...\", \"summary\": \"...\", \"subpoints\": [\"...\"], \"confidence\": 0.0, \
\"evidence\": [{\"passage\": 1, \"quote\": \"...\"}]}]}.";

fn draft_prompt(topic: &str, hits: &[ChunkRecord], max_claims: usize) -> String {
    let mut prompt = format!("Topic: {topic}\nDraft at most {max_claims} claims.\n\nPassages:\n");
    for (i, hit) in hits.iter().enumerate() {
        prompt.push_str(&format!(
            "[{}] ({} p{})\n{}\n\n",
            i + 1,
            hit.source_id,
            hit.page,
            hit.text
        ));
    }
    prompt
}

// ============================================================================
// Researcher
// ============================================================================

pub struct Researcher {
    retriever: Arc<dyn Retriever>,
    llm: Arc<dyn StructuredLlm>,
    artifacts: Option<ArtifactStore>,
    k: usize,
    max_claims: usize,
}

impl Researcher {
    pub fn new(retriever: Arc<dyn Retriever>, llm: Arc<dyn StructuredLlm>) -> Self {
        Self {
            retriever,
            llm,
            artifacts: None,
            k: DEFAULT_RESEARCH_K,
            max_claims: DEFAULT_MAX_CLAIMS,
        }
    }

    pub fn with_artifacts(mut self, artifacts: ArtifactStore) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn with_limits(mut self, k: usize, max_claims: usize) -> Self {
        self.k = k.max(1);
        self.max_claims = max_claims.max(1);
        self
    }

    pub async fn draft(&self, topic: &str) -> Result<Vec<Claim>, ResearchError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ResearchError::EmptyTopic);
        }
        let hits = self.retriever.search(topic, self.k).await?;
        if hits.is_empty() {
            return Err(ResearchError::NoEvidence(topic.to_string()));
        }

        let mut drafts = match self.draft_with_model(topic, &hits).await {
            Some(drafts) if !drafts.is_empty() => drafts,
            _ => {
                tracing::info!(topic, "drafting claims deterministically");
                self.draft_from_sentences(topic, &hits)
            }
        };
        drafts.truncate(self.max_claims);
        for (i, claim) in drafts.iter_mut().enumerate() {
            claim.id = Claim::sequential_id(i + 1);
        }

        if let Some(artifacts) = &self.artifacts {
            artifacts
                .save_claims(&drafts)
                .map_err(|e| ResearchError::Persist(format!("{e:#}")))?;
        }
        tracing::info!(topic, claims = drafts.len(), "drafted claims");
        Ok(drafts)
    }

    async fn draft_with_model(&self, topic: &str, hits: &[ChunkRecord]) -> Option<Vec<Claim>> {
        let user = draft_prompt(topic, hits, self.max_claims);
        let value = match self.llm.call_structured(DRAFT_SYSTEM_PROMPT, &user).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(model = %self.llm.name(), error = %err, "claim drafting call failed");
                return None;
            }
        };
        let items = match value {
            Value::Object(mut map) => map.remove("claims")?,
            array @ Value::Array(_) => array,
            _ => return None,
        };
        let drafted: Vec<DraftedClaim> = match serde_json::from_value(items) {
            Ok(drafted) => drafted,
            Err(err) => {
                tracing::warn!(error = %err, "unusable drafting response");
                return None;
            }
        };

        let claims = drafted
            .into_iter()
            .filter(|d| !d.text.trim().is_empty())
            .map(|d| {
                let citations: Vec<EvidenceSpan> = d
                    .evidence
                    .iter()
                    .filter_map(|e| {
                        let hit = hits.get(e.passage.checked_sub(1)?)?;
                        let span = mint_span(hit, &e.quote);
                        if span.is_none() {
                            tracing::debug!(chunk_id = %hit.id, "dropping quote not found in passage");
                        }
                        span
                    })
                    .collect();
                Claim {
                    id: String::new(),
                    topic: topic.to_string(),
                    summary: d.summary.filter(|s| !s.trim().is_empty()),
                    text: d.text.trim().to_string(),
                    subpoints: d.subpoints,
                    citations,
                    confidence: d.confidence.map(|c| c.clamp(0.0, 1.0)),
                    status: ClaimStatus::Draft,
                }
            })
            .collect();
        Some(claims)
    }

    /// First sentence of each passage as the claim, the next two as subpoints.
    pub fn draft_from_sentences(&self, topic: &str, hits: &[ChunkRecord]) -> Vec<Claim> {
        hits.iter()
            .filter_map(|hit| {
                let sentences = sentence_split(&hit.text);
                let first = sentences.first()?;
                let citation = mint_span(hit, first).unwrap_or_else(|| whole_hit_span(hit));
                Some(Claim {
                    id: String::new(),
                    topic: topic.to_string(),
                    summary: None,
                    text: first.clone(),
                    subpoints: sentences.iter().skip(1).take(2).cloned().collect(),
                    citations: vec![citation],
                    confidence: Some(hit.score.clamp(0.0, 1.0)),
                    status: ClaimStatus::Draft,
                })
            })
            .take(self.max_claims)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(text: &str, char_start: i64) -> ChunkRecord {
        ChunkRecord {
            id: "doc:p0002:c0001".into(),
            text: text.into(),
            score: 0.7,
            source_id: "doc".into(),
            page: 2,
            char_start,
            char_end: char_start + text.chars().count() as i64,
        }
    }

    #[test]
    fn mint_span_offsets_are_page_relative() {
        let h = hit("Costs fell. Revenue  grew by 4%.", 100);
        let span = mint_span(&h, "revenue grew by 4%").unwrap();
        assert_eq!(span.char_start, 112);
        assert_eq!(span.char_end, 131);
        assert_eq!(span.quote, "Revenue  grew by 4%");
        assert_eq!(span.chunk_id.as_deref(), Some("doc:p0002:c0001"));
        assert!(mint_span(&h, "profits doubled").is_none());
    }

    #[test]
    fn draft_prompt_numbers_passages() {
        let prompt = draft_prompt("energy", &[hit("a", 0), hit("b", 0)], 3);
        assert!(prompt.contains("[1] (doc p2)"));
        assert!(prompt.contains("[2] (doc p2)"));
        assert!(prompt.contains("at most 3 claims"));
    }
}
