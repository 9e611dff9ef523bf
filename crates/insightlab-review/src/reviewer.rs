//! Claim review: one validator pass per citation, then aggregation.

use crate::validator::MultilevelValidator;
use insightlab_storage::{ArtifactStore, Claim, ReviewedClaim, Verdict};
use std::sync::Arc;

pub const MISSING_CITATIONS: &str = "missing citations";
pub const INCONCLUSIVE: &str = "validation inconclusive";

/// Combine per-span `(verdict, notes)` pairs into a claim verdict.
///
/// Contradiction dominates; mixed support downgrades to `Weak`; only a
/// unanimous `Supported` passes. Empty input is `Weak`.
pub fn aggregate_verdicts(results: &[(Verdict, String)]) -> (Verdict, String) {
    let first_with = |v: Verdict| results.iter().find(|(verdict, _)| *verdict == v);

    if results.is_empty() {
        return (Verdict::Weak, INCONCLUSIVE.to_string());
    }
    if results.iter().all(|(v, _)| *v == Verdict::Supported) {
        return (Verdict::Supported, results[0].1.clone());
    }
    if let Some((_, notes)) = first_with(Verdict::Contradicted) {
        return (Verdict::Contradicted, notes.clone());
    }
    if first_with(Verdict::Supported).is_some() {
        let notes = first_with(Verdict::Weak)
            .map(|(_, n)| n.clone())
            .unwrap_or_else(|| INCONCLUSIVE.to_string());
        return (Verdict::Weak, notes);
    }
    let notes = results
        .first()
        .map(|(_, n)| n.clone())
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| INCONCLUSIVE.to_string());
    (Verdict::Weak, notes)
}

pub struct ClaimReviewer {
    validator: Arc<MultilevelValidator>,
    artifacts: Option<ArtifactStore>,
}

impl ClaimReviewer {
    pub fn new(validator: Arc<MultilevelValidator>) -> Self {
        Self {
            validator,
            artifacts: None,
        }
    }

    /// Persist the reviewed set after each batch.
    pub fn with_artifacts(mut self, artifacts: ArtifactStore) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub async fn review_claim(&self, claim: &Claim) -> ReviewedClaim {
        if claim.citations.is_empty() {
            return ReviewedClaim::from_claim(claim, Verdict::Weak, MISSING_CITATIONS.to_string());
        }

        let mut results = Vec::with_capacity(claim.citations.len());
        for span in &claim.citations {
            results.push(self.validator.assess(&claim.text, span).await);
        }
        let (verdict, notes) = aggregate_verdicts(&results);
        tracing::debug!(claim_id = %claim.id, %verdict, spans = results.len(), "claim reviewed");
        ReviewedClaim::from_claim(claim, verdict, notes)
    }

    /// Review every claim, then write the batch once.
    pub async fn review(&self, claims: &[Claim]) -> anyhow::Result<Vec<ReviewedClaim>> {
        let mut reviewed = Vec::with_capacity(claims.len());
        for claim in claims {
            reviewed.push(self.review_claim(claim).await);
        }

        if let Some(artifacts) = &self.artifacts {
            let path = artifacts.save_reviewed(&reviewed)?;
            tracing::info!(path = %path.display(), claims = reviewed.len(), "saved reviewed claims");
        }
        Ok(reviewed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(v: Verdict, notes: &str) -> (Verdict, String) {
        (v, notes.to_string())
    }

    #[test]
    fn unanimous_support_uses_first_notes() {
        let out = aggregate_verdicts(&[r(Verdict::Supported, "a"), r(Verdict::Supported, "b")]);
        assert_eq!(out, r(Verdict::Supported, "a"));
    }

    #[test]
    fn contradiction_dominates() {
        let out = aggregate_verdicts(&[
            r(Verdict::Supported, "a"),
            r(Verdict::Weak, "b"),
            r(Verdict::Contradicted, "c"),
            r(Verdict::Contradicted, "d"),
        ]);
        assert_eq!(out, r(Verdict::Contradicted, "c"));
    }

    #[test]
    fn mixed_support_downgrades_with_first_weak_notes() {
        let out = aggregate_verdicts(&[
            r(Verdict::Supported, "a"),
            r(Verdict::Weak, "b"),
            r(Verdict::Weak, "c"),
        ]);
        assert_eq!(out, r(Verdict::Weak, "b"));
    }

    #[test]
    fn all_weak_uses_first_or_generic() {
        assert_eq!(
            aggregate_verdicts(&[r(Verdict::Weak, "x"), r(Verdict::Weak, "y")]),
            r(Verdict::Weak, "x")
        );
        assert_eq!(
            aggregate_verdicts(&[r(Verdict::Weak, "")]),
            r(Verdict::Weak, INCONCLUSIVE)
        );
        assert_eq!(aggregate_verdicts(&[]), r(Verdict::Weak, INCONCLUSIVE));
    }
}
