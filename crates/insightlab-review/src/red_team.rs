//! Red team: look for evidence against claims the reviewer accepted.

use crate::researcher::{mint_span, whole_hit_span};
use crate::retrieval::Retriever;
use crate::text::{clip_quote, sentence_split};
use crate::validator::MultilevelValidator;
use insightlab_storage::{
    ArtifactStore, ChunkRecord, Claim, EvidenceSpan, RedTeamFinding, ReviewedClaim, Verdict,
};
use std::collections::HashSet;
use std::sync::Arc;

pub const DEFAULT_COUNTER_TOTAL: usize = 6;
pub const QUERY_PREFIX_CHARS: usize = 160;

/// Query variants issued for one claim, in order.
pub fn counter_queries(claim_text: &str) -> Vec<String> {
    let prefix = clip_quote(claim_text.trim(), QUERY_PREFIX_CHARS);
    vec![
        claim_text.to_string(),
        format!("limitations of {prefix}"),
        format!("counter argument to {prefix}"),
    ]
}

/// Whether `hit` is one of the claim's own citations.
fn is_cited(hit: &ChunkRecord, citations: &[EvidenceSpan]) -> bool {
    citations.iter().any(|span| match &span.chunk_id {
        Some(chunk_id) => *chunk_id == hit.id,
        None => {
            span.source_id == hit.source_id
                && span.page == hit.page
                && span.char_start == hit.char_start
                && span.char_end == hit.char_end
        }
    })
}

pub struct CounterEvidenceGatherer {
    retriever: Arc<dyn Retriever>,
}

impl CounterEvidenceGatherer {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self { retriever }
    }

    /// Up to `total` novel hits across the query variants. Best effort:
    /// failed variants are skipped and a short or empty result is normal.
    pub async fn gather_counter_evidence(&self, claim: &Claim, total: usize) -> Vec<ChunkRecord> {
        let mut found: Vec<ChunkRecord> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let cited = claim.citations.len();

        for query in counter_queries(&claim.text) {
            if found.len() >= total {
                break;
            }
            let k = (total - found.len()) + cited + seen.len();
            let hits = match self.retriever.search(&query, k).await {
                Ok(hits) => hits,
                Err(err) => {
                    tracing::warn!(claim_id = %claim.id, query = %query, error = %err, "counter query failed");
                    continue;
                }
            };
            for hit in hits {
                if !seen.insert(hit.id.clone()) || is_cited(&hit, &claim.citations) {
                    continue;
                }
                found.push(hit);
                if found.len() >= total {
                    break;
                }
            }
        }
        tracing::debug!(claim_id = %claim.id, found = found.len(), "gathered counter evidence");
        found
    }
}

/// Span quoting the first sentence of a hit.
fn counter_span(hit: &ChunkRecord) -> EvidenceSpan {
    sentence_split(&hit.text)
        .first()
        .and_then(|first| mint_span(hit, first))
        .unwrap_or_else(|| whole_hit_span(hit))
}

pub struct RedTeam {
    gatherer: CounterEvidenceGatherer,
    validator: Arc<MultilevelValidator>,
    artifacts: Option<ArtifactStore>,
    total: usize,
}

impl RedTeam {
    pub fn new(retriever: Arc<dyn Retriever>, validator: Arc<MultilevelValidator>) -> Self {
        Self {
            gatherer: CounterEvidenceGatherer::new(retriever),
            validator,
            artifacts: None,
            total: DEFAULT_COUNTER_TOTAL,
        }
    }

    pub fn with_artifacts(mut self, artifacts: ArtifactStore) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn with_total(mut self, total: usize) -> Self {
        self.total = total;
        self
    }

    pub fn gatherer(&self) -> &CounterEvidenceGatherer {
        &self.gatherer
    }

    async fn challenge(&self, topic: &str, reviewed: &ReviewedClaim) -> Option<RedTeamFinding> {
        let claim = &reviewed.claim;
        let hits = self.gatherer.gather_counter_evidence(claim, self.total).await;

        let mut contradicting: Vec<(EvidenceSpan, String)> = Vec::new();
        let mut weak: Vec<(EvidenceSpan, String)> = Vec::new();
        for hit in &hits {
            let span = counter_span(hit);
            let Some(result) = self.validator.assess_counter(&claim.text, &span).await else {
                continue;
            };
            match result.verdict {
                Verdict::Contradicted => contradicting.push((span, result.annotated_reason())),
                Verdict::Weak => weak.push((span, result.annotated_reason())),
                Verdict::Supported => {}
            }
        }
        if contradicting.is_empty() && weak.is_empty() {
            return None;
        }

        let verdict = if contradicting.is_empty() {
            Verdict::Weak
        } else {
            Verdict::Contradicted
        };
        let detail = contradicting
            .first()
            .or_else(|| weak.first())
            .map(|(_, notes)| notes.clone())
            .unwrap_or_default();
        let counter_evidence: Vec<EvidenceSpan> = contradicting
            .into_iter()
            .chain(weak)
            .map(|(span, _)| span)
            .collect();

        Some(RedTeamFinding {
            id: String::new(),
            claim_id: claim.id.clone(),
            topic: topic.to_string(),
            summary: format!(
                "{} passage(s) challenge claim {}",
                counter_evidence.len(),
                claim.id
            ),
            detail,
            verdict,
            counter_evidence,
        })
    }

    /// Challenge every `Supported` claim. Related passages that the model
    /// does not judge `Supported` become findings. Ids run `r001`, `r002`, ...
    pub async fn run(
        &self,
        topic: &str,
        reviewed: &[ReviewedClaim],
    ) -> anyhow::Result<Vec<RedTeamFinding>> {
        let mut findings = Vec::new();
        for claim in reviewed.iter().filter(|c| c.verdict == Verdict::Supported) {
            if let Some(mut finding) = self.challenge(topic, claim).await {
                finding.id = format!("r{:03}", findings.len() + 1);
                findings.push(finding);
            }
        }
        if let Some(artifacts) = &self.artifacts {
            artifacts.save_findings(&findings)?;
        }
        tracing::info!(topic, findings = findings.len(), "red team complete");
        Ok(findings)
    }
}
