//! Multilevel Evidence Validator
//!
//! Decides whether one cited span supports one claim. Three checks run in
//! strict order and each may end the pipeline:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  resolve context (once)                                              │
//! │        │                                                             │
//! │        ▼                                                             │
//! │  Level 1  structural   exact normalized quote ∈ context?             │
//! │        │               0.95 Supported ──────────────────────► stop   │
//! │        │ 0.0 / 0.4 Weak                                              │
//! │        ▼                                                             │
//! │  Level 2  keyword      matched / claim keywords                      │
//! │        │               ≥0.8  0.85 Supported ─────────────────► stop  │
//! │        │               <0.5  0.3  Contradicted ──────────────► stop  │
//! │        │ 0.5..0.8 (0.6 Weak), no context, no keywords                │
//! │        ▼                                                             │
//! │  Level 3  semantic     cached model verdict, confidence 0.9          │
//! │                        failure → 0.0 Weak (never cached)             │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Levels 1 and 2 are pure functions of their inputs and never suspend.
//! Only level 3 awaits, and only on a cache miss.

use crate::context::SpanContextResolver;
use crate::llm::{LLMError, StructuredLlm};
use crate::text::{extract_keywords, normalize_for_match};
use insightlab_storage::{cache_key, EvidenceCache, EvidenceSpan, Verdict};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub const EXACT_MATCH_CONFIDENCE: f64 = 0.95;
pub const NO_MATCH_CONFIDENCE: f64 = 0.4;
pub const STRUCTURAL_STOP_THRESHOLD: f64 = 0.9;
pub const KEYWORD_STOP_THRESHOLD: f64 = 0.8;
pub const SEMANTIC_CONFIDENCE: f64 = 0.9;

// ============================================================================
// Result type
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    Structural = 1,
    Keyword = 2,
    Semantic = 3,
}

impl Level {
    pub fn number(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Level {}", self.number())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub level: Level,
    pub confidence: f64,
    pub verdict: Verdict,
    pub reason: String,
}

impl ValidationResult {
    fn new(level: Level, confidence: f64, verdict: Verdict, reason: impl Into<String>) -> Self {
        Self {
            level,
            confidence,
            verdict,
            reason: reason.into(),
        }
    }

    /// Reason prefixed with the deciding level, e.g. `[Level 2] Low keyword match: 34%`.
    pub fn annotated_reason(&self) -> String {
        format!("[{}] {}", self.level, self.reason)
    }
}

// ============================================================================
// Level 1: structural
// ============================================================================

/// Span sanity plus an exact (case- and whitespace-insensitive) quote match.
pub fn structural_check(span: &EvidenceSpan, context: &str) -> ValidationResult {
    let invalid = |why: &str| {
        ValidationResult::new(
            Level::Structural,
            0.0,
            Verdict::Weak,
            format!("Invalid span: {why}"),
        )
    };
    if span.quote.trim().is_empty() {
        return invalid("empty quote");
    }
    if span.page < 1 {
        return invalid("page must be >= 1");
    }
    if span.char_start < 0 || span.char_end < span.char_start {
        return invalid("bad character offsets");
    }

    let quote = normalize_for_match(&span.quote);
    let context = normalize_for_match(context);
    if context.contains(&quote) {
        ValidationResult::new(
            Level::Structural,
            EXACT_MATCH_CONFIDENCE,
            Verdict::Supported,
            "Exact quote found in source context",
        )
    } else {
        ValidationResult::new(
            Level::Structural,
            NO_MATCH_CONFIDENCE,
            Verdict::Weak,
            "Quote not found verbatim in source context",
        )
    }
}

// ============================================================================
// Level 2: keyword overlap
// ============================================================================

/// Share of the claim's keywords that also occur in the context.
pub fn keyword_check(claim_text: &str, context: &str) -> ValidationResult {
    if context.trim().is_empty() {
        return ValidationResult::new(Level::Keyword, 0.0, Verdict::Weak, "no context");
    }
    let claim_keywords = extract_keywords(claim_text);
    if claim_keywords.is_empty() {
        return ValidationResult::new(Level::Keyword, 0.5, Verdict::Weak, "Claim has no keywords");
    }
    let context_keywords = extract_keywords(context);
    let matched = claim_keywords
        .iter()
        .filter(|k| context_keywords.contains(*k))
        .count();
    let ratio = matched as f64 / claim_keywords.len() as f64;
    let pct = (ratio * 100.0).round() as i64;

    if ratio >= 0.8 {
        ValidationResult::new(
            Level::Keyword,
            0.85,
            Verdict::Supported,
            format!("High keyword match: {pct}%"),
        )
    } else if ratio >= 0.5 {
        ValidationResult::new(
            Level::Keyword,
            0.6,
            Verdict::Weak,
            format!("Partial keyword match: {pct}%"),
        )
    } else {
        ValidationResult::new(
            Level::Keyword,
            0.3,
            Verdict::Contradicted,
            format!("Low keyword match: {pct}%"),
        )
    }
}

// ============================================================================
// Escalation
// ============================================================================

/// Whether `result` ends the pipeline at its level.
pub fn stops_escalation(result: &ValidationResult) -> bool {
    match result.level {
        Level::Structural => result.confidence >= STRUCTURAL_STOP_THRESHOLD,
        Level::Keyword => {
            (result.verdict == Verdict::Supported && result.confidence >= KEYWORD_STOP_THRESHOLD)
                || result.verdict == Verdict::Contradicted
        }
        Level::Semantic => true,
    }
}

// ============================================================================
// Level 3: semantic adjudication
// ============================================================================

const SEMANTIC_SYSTEM_PROMPT: &str = "You are a careful fact-checking reviewer. \
Decide whether the evidence supports the claim. Answer `Supported` when the evidence \
states the claim, `Contradicted` when it states something incompatible, and `Weak` \
otherwise. Respond with JSON only: {\"verdict\": \"Supported|Weak|Contradicted\", \
\"rationale\": \"one short sentence\"}.";

/// What the validation partition stores per (claim, evidence) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticRecord {
    pub verdict: Verdict,
    pub notes: String,
}

/// Model-backed level 3 with a durable verdict cache.
pub struct SemanticAdjudicator {
    llm: Arc<dyn StructuredLlm>,
    cache: Arc<EvidenceCache>,
}

impl SemanticAdjudicator {
    pub fn new(llm: Arc<dyn StructuredLlm>, cache: Arc<EvidenceCache>) -> Self {
        Self { llm, cache }
    }

    pub fn cache_key(claim_text: &str, span: &EvidenceSpan, context: &str) -> String {
        cache_key(&[claim_text, &span.source_id, &span.page.to_string(), context])
    }

    pub async fn adjudicate(
        &self,
        claim_text: &str,
        span: &EvidenceSpan,
        context: &str,
    ) -> ValidationResult {
        if context.trim().is_empty() {
            return ValidationResult::new(Level::Semantic, 0.0, Verdict::Weak, "no context");
        }

        let key = Self::cache_key(claim_text, span, context);
        if let Some(record) = self.cache.get_as::<SemanticRecord>(&key) {
            tracing::debug!(source_id = %span.source_id, page = span.page, "semantic cache hit");
            return ValidationResult::new(
                Level::Semantic,
                SEMANTIC_CONFIDENCE,
                record.verdict,
                record.notes,
            );
        }

        match self.ask_model(claim_text, context).await {
            Ok(record) => {
                self.cache.set_as(&key, &record);
                ValidationResult::new(
                    Level::Semantic,
                    SEMANTIC_CONFIDENCE,
                    record.verdict,
                    record.notes,
                )
            }
            Err(err) => {
                tracing::warn!(
                    model = %self.llm.name(),
                    source_id = %span.source_id,
                    error = %err,
                    "semantic check failed"
                );
                ValidationResult::new(
                    Level::Semantic,
                    0.0,
                    Verdict::Weak,
                    format!("Semantic check failed: {err}"),
                )
            }
        }
    }

    async fn ask_model(&self, claim_text: &str, context: &str) -> Result<SemanticRecord, LLMError> {
        let user = format!("Claim:\n{claim_text}\n\nEvidence:\n{context}");
        let value = self.llm.call_structured(SEMANTIC_SYSTEM_PROMPT, &user).await?;
        let label = value
            .get("verdict")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LLMError::InvalidResponse("missing verdict".to_string()))?;
        let notes = value
            .get("rationale")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("no rationale provided")
            .to_string();
        Ok(SemanticRecord {
            verdict: Verdict::from_label(label),
            notes,
        })
    }
}

// ============================================================================
// Driver
// ============================================================================

pub struct MultilevelValidator {
    resolver: SpanContextResolver,
    semantic: SemanticAdjudicator,
}

impl MultilevelValidator {
    pub fn new(
        resolver: SpanContextResolver,
        llm: Arc<dyn StructuredLlm>,
        validation_cache: Arc<EvidenceCache>,
    ) -> Self {
        Self {
            resolver,
            semantic: SemanticAdjudicator::new(llm, validation_cache),
        }
    }

    pub fn resolver(&self) -> &SpanContextResolver {
        &self.resolver
    }

    /// Run the levels in order and return the deciding result.
    pub async fn validate(&self, claim_text: &str, span: &EvidenceSpan) -> ValidationResult {
        let context = self.resolver.resolve(span);

        let structural = structural_check(span, &context);
        tracing::debug!(confidence = structural.confidence, reason = %structural.reason, "level 1");
        if stops_escalation(&structural) {
            return structural;
        }

        let keyword = keyword_check(claim_text, &context);
        tracing::debug!(confidence = keyword.confidence, reason = %keyword.reason, "level 2");
        if stops_escalation(&keyword) {
            return keyword;
        }

        self.semantic.adjudicate(claim_text, span, &context).await
    }

    /// Verdict and level-annotated reason for one (claim, span) pair.
    pub async fn assess(&self, claim_text: &str, span: &EvidenceSpan) -> (Verdict, String) {
        let result = self.validate(claim_text, span).await;
        (result.verdict, result.annotated_reason())
    }

    /// Judge a passage the claim does not cite.
    ///
    /// The quote of such a span is taken from its own passage, so the
    /// structural level is skipped. Passages below the partial keyword band
    /// are unrelated to the claim and yield `None`; the rest are adjudicated
    /// semantically.
    pub async fn assess_counter(
        &self,
        claim_text: &str,
        span: &EvidenceSpan,
    ) -> Option<ValidationResult> {
        let context = self.resolver.resolve(span);
        let keyword = keyword_check(claim_text, &context);
        if keyword.verdict == Verdict::Contradicted || context.trim().is_empty() {
            tracing::debug!(source_id = %span.source_id, reason = %keyword.reason, "passage unrelated");
            return None;
        }
        Some(self.semantic.adjudicate(claim_text, span, &context).await)
    }
}
