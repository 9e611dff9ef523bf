//! Claim / evidence data model shared by every stage of the pipeline.
//!
//! Everything here is plain data: the types are serialized as JSON artifacts
//! and flow between the researcher, the reviewer, the red team and the
//! synthesizer. Records are never mutated in place; each stage derives new
//! values from the previous ones.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of characters kept in [`EvidenceSpan::quote`].
pub const QUOTE_MAX_CHARS: usize = 320;

// ============================================================================
// Evidence
// ============================================================================

/// A pointer into a source document.
///
/// Offsets count Unicode scalar values and are relative to the page text.
/// Signed integers keep malformed spans representable; the structural check
/// rejects them instead of the deserializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSpan {
    pub source_id: String,
    pub page: i64,
    pub char_start: i64,
    pub char_end: i64,
    /// Verbatim text, clipped to [`QUOTE_MAX_CHARS`].
    pub quote: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    /// Full chunk text, when the span was minted from a retrieval hit.
    /// Takes precedence over any cached page text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_text: Option<String>,
}

impl EvidenceSpan {
    /// Short human-readable location, e.g. `report p3`.
    pub fn location(&self) -> String {
        format!("{} p{}", self.source_id, self.page)
    }
}

/// A retrieval hit: one chunk of an ingested document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub score: f64,
    pub source_id: String,
    pub page: i64,
    #[serde(default)]
    pub char_start: i64,
    #[serde(default)]
    pub char_end: i64,
}

// ============================================================================
// Verdicts
// ============================================================================

/// The reviewer's judgement of a claim or of a single citation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Supported,
    Weak,
    Contradicted,
}

impl Verdict {
    /// Normalize a free-form label (e.g. from a model response).
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace and
    /// punctuation; anything unrecognized becomes `Weak`.
    pub fn from_label(label: &str) -> Self {
        let cleaned: String = label
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        match cleaned.as_str() {
            "supported" => Verdict::Supported,
            "contradicted" => Verdict::Contradicted,
            _ => Verdict::Weak,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Supported => "Supported",
            Verdict::Weak => "Weak",
            Verdict::Contradicted => "Contradicted",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Claims
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    #[default]
    Draft,
    Reviewed,
}

/// A drafted assertion with supporting citations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub text: String,
    #[serde(default)]
    pub subpoints: Vec<String>,
    #[serde(default)]
    pub citations: Vec<EvidenceSpan>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub status: ClaimStatus,
}

impl Claim {
    /// Sequential claim id: `c0001`, `c0002`, ...
    pub fn sequential_id(n: usize) -> String {
        format!("c{n:04}")
    }
}

/// A claim after review. Terminal for the review stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewedClaim {
    #[serde(flatten)]
    pub claim: Claim,
    pub verdict: Verdict,
    #[serde(default)]
    pub reviewer_notes: String,
}

impl ReviewedClaim {
    /// Derive the reviewed record; the draft is left untouched.
    pub fn from_claim(claim: &Claim, verdict: Verdict, reviewer_notes: String) -> Self {
        let mut claim = claim.clone();
        claim.status = ClaimStatus::Reviewed;
        Self {
            claim,
            verdict,
            reviewer_notes,
        }
    }

    pub fn id(&self) -> &str {
        &self.claim.id
    }
}

// ============================================================================
// Downstream synthesis
// ============================================================================

/// A cluster of reviewed claims with combined provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub topic: String,
    #[serde(default)]
    pub summary: String,
    pub text: String,
    pub claim_ids: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub provenance: Vec<EvidenceSpan>,
}

/// Counter-evidence found against a supported claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedTeamFinding {
    pub id: String,
    pub claim_id: String,
    pub topic: String,
    #[serde(default)]
    pub summary: String,
    pub detail: String,
    pub verdict: Verdict,
    #[serde(default)]
    pub counter_evidence: Vec<EvidenceSpan>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.75 {
            Priority::High
        } else if confidence >= 0.5 {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

/// A follow-up action derived from insights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub id: String,
    pub title: String,
    pub detail: String,
    pub priority: Priority,
    #[serde(default)]
    pub insight_ids: Vec<String>,
}
