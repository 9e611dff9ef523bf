//! Storage tests against real temp directories

use super::*;
use serde_json::json;
use tempfile::tempdir;

fn span(quote: &str) -> EvidenceSpan {
    EvidenceSpan {
        source_id: "annual_report".to_string(),
        page: 3,
        char_start: 10,
        char_end: 10 + quote.chars().count() as i64,
        quote: quote.to_string(),
        chunk_id: Some("annual_report:p0003:c0000".to_string()),
        chunk_text: Some(format!("Intro. {quote} More text.")),
    }
}

fn claim(id: usize, citations: Vec<EvidenceSpan>) -> Claim {
    Claim {
        id: Claim::sequential_id(id),
        topic: "revenue".to_string(),
        summary: Some("Revenue grew".to_string()),
        text: "Revenue grew in 2020.".to_string(),
        subpoints: vec!["Growth was driven by exports.".to_string()],
        citations,
        confidence: Some(0.7),
        status: ClaimStatus::Draft,
    }
}

// ============================================================================
// Cache
// ============================================================================

#[test]
fn test_cache_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("reviewer_cache.json");

    let cache = EvidenceCache::open(&path);
    assert!(cache.get("missing").is_none());
    cache.set("k1", json!({"verdict": "Supported", "notes": "ok"}));
    assert!(path.exists(), "set must flush synchronously");

    let reopened = EvidenceCache::open(&path);
    assert_eq!(
        reopened.get("k1"),
        Some(json!({"verdict": "Supported", "notes": "ok"}))
    );
    assert_eq!(reopened.len(), 1);
}

#[test]
fn test_corrupt_cache_reads_as_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("reviewer_cache.json");
    std::fs::write(&path, "{ this is not json").unwrap();

    let cache = EvidenceCache::open(&path);
    assert!(cache.is_empty());
    assert!(cache.get("anything").is_none());

    // Writing replaces the corrupt file with a valid one.
    cache.set("fresh", json!(1));
    let reopened = EvidenceCache::open(&path);
    assert_eq!(reopened.get("fresh"), Some(json!(1)));
}

#[test]
fn test_typed_get_treats_wrong_shape_as_miss() {
    let dir = tempdir().unwrap();
    let cache = EvidenceCache::open(dir.path().join("c.json"));
    cache.set("vec", json!([1.0, 2.0]));
    cache.set("str", json!("nope"));

    let hit: Option<Vec<f32>> = cache.get_as("vec");
    assert_eq!(hit, Some(vec![1.0, 2.0]));
    let miss: Option<Vec<f32>> = cache.get_as("str");
    assert!(miss.is_none());
}

#[test]
fn test_partitions_do_not_share_keys() {
    let dir = tempdir().unwrap();
    let caches = CacheSet::open(dir.path());

    caches
        .partition(CachePartition::Validation)
        .set("shared-key", json!("verdict"));
    assert!(caches
        .partition(CachePartition::Embeddings)
        .get("shared-key")
        .is_none());
    assert!(caches
        .partition(CachePartition::Retrieval)
        .get("shared-key")
        .is_none());
    assert!(dir.path().join("reviewer_cache.json").exists());
    assert!(!dir.path().join("embedding_cache.json").exists());

    caches.flush().unwrap();
}

#[test]
fn test_cache_key_is_deterministic_and_separated() {
    let a = cache_key(&["claim", "doc", "1", "context"]);
    let b = cache_key(&["claim", "doc", "1", "context"]);
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
    // Boundaries between parts matter.
    assert_ne!(cache_key(&["ab", "c"]), cache_key(&["a", "bc"]));
}

#[test]
fn test_concurrent_writers_leave_valid_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("c.json");
    let cache = std::sync::Arc::new(EvidenceCache::open(&path));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = std::sync::Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..10 {
                    cache.set(&format!("k{}", i % 3), json!(t));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let reopened = EvidenceCache::open(&path);
    assert_eq!(reopened.len(), 3);
}

// ============================================================================
// Pages
// ============================================================================

#[test]
fn test_page_store_roundtrip() {
    let dir = tempdir().unwrap();
    let store = PageTextStore::new(dir.path());
    store
        .cache_page_texts(
            "manual",
            &[
                PageText {
                    page: 1,
                    text: "First page".to_string(),
                },
                PageText {
                    page: 2,
                    text: String::new(),
                },
            ],
        )
        .unwrap();

    assert_eq!(store.load_page_text("manual", 1).as_deref(), Some("First page"));
    assert!(store.load_page_text("manual", 2).is_none(), "empty pages are skipped");
    assert!(store.load_page_text("other", 1).is_none());
}

#[test]
fn test_page_store_corrupt_file_is_a_miss() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("broken.json"), "[{").unwrap();
    let store = PageTextStore::new(dir.path());
    assert!(store.load_page_text("broken", 1).is_none());
}

// ============================================================================
// Artifacts
// ============================================================================

#[test]
fn test_reviewed_claims_roundtrip() {
    let dir = tempdir().unwrap();
    let artifacts = ArtifactStore::new(dir.path());

    let reviewed = vec![
        ReviewedClaim::from_claim(
            &claim(1, vec![span("Revenue grew in 2020")]),
            Verdict::Supported,
            "[Level 1] Exact quote found in source context".to_string(),
        ),
        ReviewedClaim::from_claim(&claim(2, vec![]), Verdict::Weak, "missing citations".to_string()),
    ];
    artifacts.save_reviewed(&reviewed).unwrap();

    let loaded = artifacts.load_reviewed().unwrap();
    assert_eq!(loaded, reviewed);

    let index = artifacts.reviewed_index().unwrap();
    assert_eq!(index["c0001"].verdict, Verdict::Supported);
    assert_eq!(index["c0002"].claim.status, ClaimStatus::Reviewed);
}

#[test]
fn test_missing_artifacts_load_empty_and_reset() {
    let dir = tempdir().unwrap();
    let artifacts = ArtifactStore::new(dir.path().join("nested"));
    assert!(artifacts.load_claims().unwrap().is_empty());
    assert!(artifacts.load_report().unwrap().is_none());

    artifacts.save_claims(&[claim(1, vec![])]).unwrap();
    artifacts.save_actions(&[]).unwrap();
    artifacts.reset(false).unwrap();
    assert_eq!(artifacts.load_claims().unwrap().len(), 1);
    assert!(!artifacts.path_of(artifacts::ACTIONS_FILE).exists());
    artifacts.reset(true).unwrap();
    assert!(artifacts.load_claims().unwrap().is_empty());
}

#[test]
fn test_trace_log_appends() {
    let dir = tempdir().unwrap();
    let log = TraceLog::new(dir.path().join("traces/traces.jsonl"));
    log.log_event("researcher", "start", Some("revenue"), None)
        .unwrap();
    log.log_event("reviewer", "done", None, Some(json!({"claims": 3})))
        .unwrap();

    let events = log.events().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].agent, "researcher");
    assert_eq!(events[1].details, Some(json!({"claims": 3})));
}

#[test]
fn test_storage_config_layout() {
    let config = StorageConfig::rooted("/tmp/data".into(), "/tmp/out".into());
    assert_eq!(config.cache_dir, std::path::PathBuf::from("/tmp/data/cache"));
    assert_eq!(config.trace_path, std::path::PathBuf::from("/tmp/out/traces.jsonl"));
}

#[test]
fn test_run_layout_shares_caches() {
    let shared = StorageConfig::rooted("/tmp/data".into(), "/tmp/out".into());
    let run = shared.for_run(Path::new("/tmp/runs/r1"));
    assert_eq!(run.cache_dir, shared.cache_dir);
    assert_eq!(run.page_cache_dir, shared.page_cache_dir);
    assert_eq!(run.artifacts_dir, std::path::PathBuf::from("/tmp/runs/r1/artifacts"));
    assert_eq!(run.trace_path, std::path::PathBuf::from("/tmp/runs/r1/artifacts/traces.jsonl"));
}

#[test]
fn test_payload_roundtrip_and_reset() {
    let dir = tempdir().unwrap();
    let artifacts = ArtifactStore::new(dir.path());
    assert!(artifacts.load_payload().unwrap().is_none());

    let reviewed = ReviewedClaim::from_claim(&claim(1, vec![span("Revenue grew")]), Verdict::Supported, "[Level 1] ok".into());
    let payload = RunPayload {
        run_id: "r1".to_string(),
        topic: "revenue".to_string(),
        insights: vec![PayloadInsight {
            insight: Insight {
                id: "i001".to_string(),
                topic: "Revenue grew".to_string(),
                summary: "Revenue grew".to_string(),
                text: "Revenue grew in 2020.".to_string(),
                claim_ids: vec![reviewed.claim.id.clone()],
                confidence: 0.5,
                provenance: vec![],
            },
            claims: vec![reviewed],
        }],
        challenges: vec![],
        actions: vec![],
        sources: vec![SourceFile {
            source_id: "annual_report".to_string(),
            filename: "annual_report.pdf".to_string(),
        }],
    };
    artifacts.save_payload(&payload).unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(artifacts.path_of(artifacts::PAYLOAD_FILE)).unwrap())
            .unwrap();
    // Insight fields sit next to the joined claims.
    assert_eq!(raw["insights"][0]["id"], "i001");
    assert_eq!(raw["insights"][0]["claims"][0]["id"], "c0001");

    assert_eq!(artifacts.load_payload().unwrap(), Some(payload));
    artifacts.reset(false).unwrap();
    assert!(artifacts.load_payload().unwrap().is_none());
}
