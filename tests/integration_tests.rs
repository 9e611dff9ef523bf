//! Integration tests for the complete Insight Lab flow
//!
//! These tests verify end-to-end functionality across crates:
//! - Document ingestion → page cache → chunk index
//! - Index → drafting → review → artifacts
//! - Legacy spans resolved through the page cache
//! - Runs in their own workspace, ingesting staged documents first
//!
//! Run with: cargo test --test integration_tests

use insightlab_review::{
    DisabledLlm, EvidenceSpan, Lab, LabConfig, Level, Retriever, Stage, StageStatus,
    StructuredLlm, Verdict,
};
use insightlab_storage::artifacts::{
    ACTIONS_FILE, CHALLENGES_FILE, CLAIMS_FILE, PAYLOAD_FILE, REPORT_FILE,
};
use insightlab_storage::{PageTextLookup, StorageConfig};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

const ENERGY_P1: &str =
    "Solar capacity doubled in 2023. Panel prices fell by half. Installers hired more staff.";
const ENERGY_P2: &str = "Wind output grew steadily. Offshore farms expanded in the north.";
const CRITIQUE: &str = "Solar capacity did not double in 2023. Growth was modest.";

/// Corpus of two documents; `energy.txt` has two pages split by a form feed.
fn write_corpus(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("energy.txt"), format!("{ENERGY_P1}\n\x0C{ENERGY_P2}\n")).unwrap();
    fs::write(dir.join("critique.md"), CRITIQUE).unwrap();
    fs::write(dir.join("notes.csv"), "ignored,by,the,loader").unwrap();
}

fn config_in(dir: &TempDir) -> LabConfig {
    LabConfig::with_storage(StorageConfig::rooted(
        dir.path().join("data"),
        dir.path().join("artifacts"),
    ))
}

fn open(config: &LabConfig) -> Lab {
    let llm: Arc<dyn StructuredLlm> = Arc::new(DisabledLlm);
    config.open_with_llm(llm).unwrap()
}

/// Ingest the corpus into a fresh lab and persist the index.
async fn ingested_lab(dir: &TempDir) -> Lab {
    let corpus = dir.path().join("corpus");
    write_corpus(&corpus);

    let lab = open(&config_in(dir));
    let chunks = insightlab_ingest_docs::ingest_dir(&corpus, &lab.pages).unwrap();
    assert_eq!(chunks.len(), 3);
    assert_eq!(lab.index.add_chunks(&chunks).await.unwrap(), 3);
    lab.save_index().unwrap();
    lab
}

// ============================================================================
// Ingestion
// ============================================================================

#[tokio::test]
async fn test_ingest_caches_pages_and_persists_index() {
    let dir = tempdir().unwrap();
    let lab = ingested_lab(&dir).await;

    assert_eq!(
        lab.pages.load_page_text("energy", 2).as_deref(),
        Some(ENERGY_P2)
    );
    assert_eq!(
        lab.pages.load_page_text("critique", 1).as_deref(),
        Some(CRITIQUE)
    );
    assert!(lab.pages.load_page_text("notes", 1).is_none());

    // Re-ingesting upserts by chunk id.
    let again = insightlab_ingest_docs::ingest_dir(&dir.path().join("corpus"), &lab.pages).unwrap();
    lab.index.add_chunks(&again).await.unwrap();
    assert_eq!(lab.index.len(), 3);

    let reopened = open(&lab.config);
    assert_eq!(reopened.index.len(), 3);
    assert_eq!(reopened.index.fingerprint(), lab.index.fingerprint());

    let hits = reopened.index.search("solar capacity", 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.page >= 1));
}

#[test]
fn test_ingest_missing_directory_fails() {
    let dir = tempdir().unwrap();
    let lab = open(&config_in(&dir));
    let err = insightlab_ingest_docs::ingest_dir(&dir.path().join("absent"), &lab.pages)
        .unwrap_err();
    assert!(err.to_string().contains("Input directory not found"));
}

// ============================================================================
// Drafting and review
// ============================================================================

#[tokio::test]
async fn test_research_then_review_supports_drafted_claims() {
    let dir = tempdir().unwrap();
    let lab = ingested_lab(&dir).await;

    let claims = lab.researcher().draft("solar capacity").await.unwrap();
    assert_eq!(claims.len(), 3);
    assert!(lab.artifacts.path_of(CLAIMS_FILE).exists());
    for claim in &claims {
        assert_eq!(claim.citations.len(), 1);
        assert!(claim.citations[0].chunk_text.is_some());
    }

    let reviewed = lab.reviewer().review(&claims).await.unwrap();
    assert_eq!(reviewed.len(), 3);
    assert!(reviewed.iter().all(|c| c.verdict == Verdict::Supported));
    assert!(reviewed
        .iter()
        .all(|c| c.reviewer_notes.starts_with("[Level 1]")));

    let stored = lab.artifacts.load_reviewed().unwrap();
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[0].id(), claims[0].id);
}

#[tokio::test]
async fn test_legacy_span_resolves_through_page_cache() {
    let dir = tempdir().unwrap();
    let lab = ingested_lab(&dir).await;

    let legacy = EvidenceSpan {
        source_id: "energy".to_string(),
        page: 1,
        char_start: 32,
        char_end: 57,
        quote: "Panel prices fell by half".to_string(),
        chunk_id: None,
        chunk_text: None,
    };
    let result = lab
        .validator
        .validate("Panel prices fell by half in 2023.", &legacy)
        .await;
    assert_eq!(result.level, Level::Structural);
    assert_eq!(result.verdict, Verdict::Supported);

    // A source that was never ingested falls back to the quote itself.
    let unknown = EvidenceSpan {
        source_id: "missing".to_string(),
        ..legacy
    };
    let result = lab
        .validator
        .validate("Panel prices fell by half in 2023.", &unknown)
        .await;
    assert_eq!(result.level, Level::Structural);
    assert_eq!(result.verdict, Verdict::Supported);
}

// ============================================================================
// Full pipeline
// ============================================================================

#[tokio::test]
async fn test_pipeline_writes_every_artifact() {
    let dir = tempdir().unwrap();
    let lab = ingested_lab(&dir).await;

    let report = lab.pipeline().run("solar capacity").await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.counts.claims, 3);
    assert_eq!(report.counts.supported, 3);
    assert_eq!(report.stages.len(), Stage::ALL.len());
    assert!(report
        .stages
        .iter()
        .all(|s| s.status == StageStatus::Done && s.error.is_none()));

    for file in [CLAIMS_FILE, CHALLENGES_FILE, REPORT_FILE, ACTIONS_FILE, PAYLOAD_FILE] {
        assert!(lab.artifacts.path_of(file).exists(), "missing {file}");
    }
    let report_file = lab.artifacts.load_report().unwrap().unwrap();
    assert_eq!(report_file.insights.len(), report.counts.insights);
    assert_eq!(lab.artifacts.load_actions().unwrap().len(), report.counts.actions);

    // Ingestion has no target here and logs a single skip event.
    let events = lab.trace.events().unwrap();
    assert_eq!(events.len(), 2 * Stage::ALL.len() - 1);
    assert!(events.iter().all(|e| e.topic.as_deref() == Some("solar capacity")));

    lab.flush().unwrap();
}

#[tokio::test]
async fn test_run_in_workspace_ingests_staged_documents() {
    let dir = tempdir().unwrap();
    let corpus = dir.path().join("corpus");
    write_corpus(&corpus);
    let lab = open(&config_in(&dir));

    let (workspace, output) = lab
        .run_in_workspace("solar capacity", Some(&corpus))
        .await
        .unwrap();
    let report = &output.report;

    assert_eq!(workspace.dir, lab.config.runs_dir.join(report.run_id.to_string()));
    assert!(workspace.input_dir.join("energy.txt").exists());
    assert!(!workspace.input_dir.join("notes.csv").exists());

    let ingestion = report.stage(Stage::Ingestion).unwrap();
    assert!(!ingestion.skipped);
    assert_eq!(ingestion.output_count, 3);
    assert_eq!(report.sources.len(), 2);
    assert_eq!(report.sources["energy"], "energy.txt");
    assert_eq!(report.counts.claims, 3);

    // The run owns its index and artifacts; caches and pages stay shared.
    assert!(workspace.index_path.exists());
    assert!(lab.index.is_empty());
    assert!(!lab.artifacts.path_of(CLAIMS_FILE).exists());
    assert_eq!(
        lab.pages.load_page_text("energy", 2).as_deref(),
        Some(ENERGY_P2)
    );

    let payload = workspace.artifacts().load_payload().unwrap();
    assert_eq!(payload, output.payload);
    assert_eq!(payload.unwrap().sources.len(), 2);

    let events = workspace.trace().events().unwrap();
    assert_eq!(events.len(), 2 * Stage::ALL.len());
    assert_eq!(events[0].agent, "ingestion");
    assert_eq!(events[0].stage, "running");
}

#[tokio::test]
async fn test_run_in_workspace_without_inputs_uses_lab_index() {
    let dir = tempdir().unwrap();
    let lab = ingested_lab(&dir).await;

    let (first, output) = lab.run_in_workspace("solar capacity", None).await.unwrap();
    let ingestion = output.report.stage(Stage::Ingestion).unwrap();
    assert!(ingestion.skipped);
    assert!(output.report.sources.is_empty());
    assert_eq!(output.report.counts.claims, 3);
    assert!(!first.index_path.exists());

    let (second, _) = lab.run_in_workspace("solar capacity", None).await.unwrap();
    assert_ne!(first.dir, second.dir);
    assert_eq!(lab.config.runs_dir.read_dir().unwrap().count(), 2);
}
