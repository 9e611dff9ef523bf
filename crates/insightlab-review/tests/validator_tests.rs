//! End-to-end tests for citation validation
//!
//! These tests drive the validator and reviewer through their public API:
//! 1. Exact quotes short-circuit at level 1
//! 2. Keyword overlap bands decide or escalate at level 2
//! 3. Level 3 verdicts are cached; failures are not
//! 4. Context resolution prefers chunk text over cached pages

use insightlab_review::llm::MockLlm;
use insightlab_review::validator::{keyword_check, structural_check};
use insightlab_review::*;
use insightlab_storage::{EvidenceCache, NoPages, PageTextLookup, StaticPages};
use serde_json::json;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

const CLAIM: &str = "Event X occurred in 2020.";

fn span(quote: &str, chunk_text: Option<&str>) -> EvidenceSpan {
    EvidenceSpan {
        source_id: "archive".to_string(),
        page: 1,
        char_start: 0,
        char_end: quote.chars().count() as i64,
        quote: quote.to_string(),
        chunk_id: chunk_text.map(|_| "archive:p0001:c0000".to_string()),
        chunk_text: chunk_text.map(str::to_string),
    }
}

fn claim(text: &str, citations: Vec<EvidenceSpan>) -> Claim {
    Claim {
        id: Claim::sequential_id(1),
        topic: "events".to_string(),
        summary: None,
        text: text.to_string(),
        subpoints: vec![],
        citations,
        confidence: None,
        status: ClaimStatus::Draft,
    }
}

/// Validator over a fresh cache in a temp dir.
fn validator_with(
    pages: Arc<dyn PageTextLookup>,
    llm: Arc<dyn StructuredLlm>,
) -> (Arc<MultilevelValidator>, TempDir) {
    let dir = tempdir().unwrap();
    let cache = Arc::new(EvidenceCache::open(dir.path().join("reviewer_cache.json")));
    let validator = MultilevelValidator::new(SpanContextResolver::new(pages), llm, cache);
    (Arc::new(validator), dir)
}

// ============================================================================
// End-to-end scenarios
// ============================================================================

#[tokio::test]
async fn verbatim_quote_is_supported_at_level_one() {
    let mock = Arc::new(MockLlm::always(json!({"verdict": "Contradicted"})));
    let (validator, _dir) = validator_with(Arc::new(NoPages), mock.clone());
    let reviewer = ClaimReviewer::new(validator);

    let chunk = "Archive records show that Event X occurred in 2020 near the river.";
    let reviewed = reviewer
        .review_claim(&claim(CLAIM, vec![span("Event X occurred in 2020", Some(chunk))]))
        .await;

    assert_eq!(reviewed.verdict, Verdict::Supported);
    assert!(reviewed.reviewer_notes.starts_with("[Level 1]"));
    assert_eq!(reviewed.claim.status, ClaimStatus::Reviewed);
    assert_eq!(mock.calls(), 0);
}

#[tokio::test]
async fn misquoted_year_ends_weak() {
    let chunk = "The event was said to have occurred in 1999, per the archive.";
    let citation = span("Event X occurred in 1999", Some(chunk));

    // Level 1 misses, level 2 lands in the partial band and escalates.
    let keyword = keyword_check(CLAIM, chunk);
    assert_eq!(keyword.verdict, Verdict::Weak);
    assert_eq!(keyword.reason, "Partial keyword match: 67%");

    let mock = Arc::new(MockLlm::always(
        json!({"verdict": "Weak", "rationale": "the years disagree"}),
    ));
    let (validator, _dir) = validator_with(Arc::new(NoPages), mock.clone());
    let reviewed = ClaimReviewer::new(validator)
        .review_claim(&claim(CLAIM, vec![citation.clone()]))
        .await;
    assert_eq!(reviewed.verdict, Verdict::Weak);
    assert_eq!(reviewed.reviewer_notes, "[Level 3] the years disagree");
    assert_eq!(mock.calls(), 1);

    // Without a model the semantic level degrades to Weak as well.
    let (validator, _dir) = validator_with(Arc::new(NoPages), Arc::new(DisabledLlm));
    let reviewed = ClaimReviewer::new(validator)
        .review_claim(&claim(CLAIM, vec![citation]))
        .await;
    assert_eq!(reviewed.verdict, Verdict::Weak);
    assert!(reviewed
        .reviewer_notes
        .starts_with("[Level 3] Semantic check failed"));
}

// ============================================================================
// Escalation boundaries
// ============================================================================

#[tokio::test]
async fn high_keyword_overlap_stops_at_level_two() {
    let mock = Arc::new(MockLlm::always(json!({"verdict": "Contradicted"})));
    let (validator, _dir) = validator_with(Arc::new(NoPages), mock.clone());

    let (verdict, notes) = validator
        .assess(
            "alpha bravo charlie delta echo",
            &span("unrelated quote", Some("alpha bravo charlie delta foxtrot")),
        )
        .await;
    assert_eq!(verdict, Verdict::Supported);
    assert_eq!(notes, "[Level 2] High keyword match: 80%");
    assert_eq!(mock.calls(), 0);
}

#[tokio::test]
async fn low_keyword_overlap_stops_at_level_two() {
    let mock = Arc::new(MockLlm::always(json!({"verdict": "Supported"})));
    let (validator, _dir) = validator_with(Arc::new(NoPages), mock.clone());

    let (verdict, notes) = validator
        .assess(
            "solar panels reduce emissions",
            &span("photovoltaic", Some("wind turbines generate power offshore")),
        )
        .await;
    assert_eq!(verdict, Verdict::Contradicted);
    assert_eq!(notes, "[Level 2] Low keyword match: 0%");
    assert_eq!(mock.calls(), 0);
}

#[tokio::test]
async fn half_keyword_overlap_escalates_to_level_three() {
    let mock = Arc::new(MockLlm::always(
        json!({"verdict": "Supported", "rationale": "paraphrase"}),
    ));
    let (validator, _dir) = validator_with(Arc::new(NoPages), mock.clone());

    let result = validator
        .validate("alpha bravo", &span("alpha bravo", Some("alpha zulu")))
        .await;
    assert_eq!(result.level, Level::Semantic);
    assert_eq!(result.verdict, Verdict::Supported);
    assert_eq!(result.annotated_reason(), "[Level 3] paraphrase");
    assert_eq!(mock.calls(), 1);
}

// ============================================================================
// Semantic cache
// ============================================================================

#[tokio::test]
async fn semantic_verdicts_are_cached_across_reopen() {
    let dir = tempdir().unwrap();
    let cache_path = dir.path().join("reviewer_cache.json");
    let citation = span("alpha bravo", Some("alpha zulu"));

    let first = Arc::new(MockLlm::always(json!({"verdict": "Weak", "rationale": "thin"})));
    let validator = MultilevelValidator::new(
        SpanContextResolver::new(Arc::new(NoPages)),
        first.clone(),
        Arc::new(EvidenceCache::open(&cache_path)),
    );
    let a = validator.assess("alpha bravo", &citation).await;
    let b = validator.assess("alpha bravo", &citation).await;
    assert_eq!(a, b);
    assert_eq!(first.calls(), 1);

    let second = Arc::new(MockLlm::always(json!({"verdict": "Supported"})));
    let reopened = MultilevelValidator::new(
        SpanContextResolver::new(Arc::new(NoPages)),
        second.clone(),
        Arc::new(EvidenceCache::open(&cache_path)),
    );
    assert_eq!(reopened.assess("alpha bravo", &citation).await, a);
    assert_eq!(second.calls(), 0);
}

#[tokio::test]
async fn semantic_failures_are_not_cached() {
    let mock = Arc::new(MockLlm::new(vec![
        Err("upstream unavailable".to_string()),
        Ok(json!({"verdict": "Supported", "rationale": "restated"})),
    ]));
    let (validator, _dir) = validator_with(Arc::new(NoPages), mock.clone());
    let citation = span("alpha bravo", Some("alpha zulu"));

    let failed = validator.validate("alpha bravo", &citation).await;
    assert_eq!(failed.verdict, Verdict::Weak);
    assert_eq!(failed.confidence, 0.0);
    assert!(failed.reason.contains("upstream unavailable"));

    let retried = validator.validate("alpha bravo", &citation).await;
    assert_eq!(retried.verdict, Verdict::Supported);
    assert_eq!(mock.calls(), 2);
}

// ============================================================================
// Context resolution
// ============================================================================

#[tokio::test]
async fn chunk_text_beats_conflicting_page_text() {
    let pages = Arc::new(StaticPages::new());
    pages.insert("archive", 1, "Revenue fell sharply in 2021 after the merger.");
    let (validator, _dir) = validator_with(pages, Arc::new(DisabledLlm));

    let with_chunk = span(
        "Revenue grew in 2021",
        Some("Revenue grew in 2021 across all regions."),
    );
    let result = validator.validate("Revenue grew in 2021.", &with_chunk).await;
    assert_eq!(result.level, Level::Structural);
    assert_eq!(result.verdict, Verdict::Supported);

    let legacy = EvidenceSpan {
        chunk_id: None,
        chunk_text: None,
        ..with_chunk
    };
    let result = validator.validate("Revenue grew in 2021.", &legacy).await;
    assert_ne!(result.level, Level::Structural);
}

#[tokio::test]
async fn invalid_spans_fall_through_level_one() {
    let bad = EvidenceSpan {
        page: 0,
        ..span("Event X occurred in 2020", Some(CLAIM))
    };
    let structural = structural_check(&bad, CLAIM);
    assert_eq!(structural.reason, "Invalid span: page must be >= 1");
    assert_eq!(structural.confidence, 0.0);

    let (validator, _dir) = validator_with(Arc::new(NoPages), Arc::new(DisabledLlm));
    let result = validator.validate(CLAIM, &bad).await;
    assert_eq!(result.level, Level::Keyword);
    assert_eq!(result.verdict, Verdict::Supported);
}
