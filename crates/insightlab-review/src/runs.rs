//! Per-run workspaces and run payloads.
//!
//! Each run gets its own directory:
//!
//! ```text
//! <runs_dir>/<run_id>/
//!   inputs/      staged documents, ingested by the pipeline's first stage
//!   artifacts/   claims, reviews, challenges, report, actions, payload, traces
//!   index.json   the run's chunk index
//! ```
//!
//! Caches and page text stay shared with the lab, so semantic verdicts and
//! embeddings carry over between runs.

use anyhow::Context;
use insightlab_storage::{
    ArtifactStore, PayloadInsight, ReviewedClaim, RunPayload, SourceFile, StorageConfig, TraceLog,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const RUN_INPUT_DIR: &str = "inputs";
pub const RUN_INDEX_FILE: &str = "index.json";

const DEFAULT_TOPIC: &str = "Insight";

// ============================================================================
// Workspace
// ============================================================================

#[derive(Debug, Clone)]
pub struct RunWorkspace {
    pub run_id: Uuid,
    pub dir: PathBuf,
    pub input_dir: PathBuf,
    pub storage: StorageConfig,
    pub index_path: PathBuf,
}

impl RunWorkspace {
    /// Create `<runs_dir>/<new uuid>/` with its input and artifact dirs.
    pub fn create(runs_dir: &Path, shared: &StorageConfig) -> anyhow::Result<Self> {
        let run_id = Uuid::new_v4();
        let dir = runs_dir.join(run_id.to_string());
        let input_dir = dir.join(RUN_INPUT_DIR);
        let storage = shared.for_run(&dir);
        for path in [&input_dir, &storage.artifacts_dir] {
            std::fs::create_dir_all(path)
                .with_context(|| format!("creating run dir {}", path.display()))?;
        }
        tracing::info!(%run_id, dir = %dir.display(), "run workspace created");
        Ok(Self {
            run_id,
            index_path: dir.join(RUN_INDEX_FILE),
            dir,
            input_dir,
            storage,
        })
    }

    /// Copy one document into the run's input dir. Returns the staged file name.
    pub fn stage_file(&self, path: &Path) -> anyhow::Result<String> {
        let name = path
            .file_name()
            .with_context(|| format!("no file name: {}", path.display()))?;
        let target = self.input_dir.join(name);
        std::fs::copy(path, &target)
            .with_context(|| format!("staging {} into {}", path.display(), target.display()))?;
        Ok(name.to_string_lossy().into_owned())
    }

    /// Stage every supported document under `dir`.
    pub fn stage_dir(&self, dir: &Path) -> anyhow::Result<Vec<String>> {
        insightlab_ingest_docs::discover_documents(dir)?
            .iter()
            .map(|path| self.stage_file(path))
            .collect()
    }

    pub fn artifacts(&self) -> ArtifactStore {
        self.storage.artifacts()
    }

    pub fn trace(&self) -> TraceLog {
        self.storage.trace_log()
    }
}

// ============================================================================
// Payload
// ============================================================================

fn non_empty(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn first_claim_text(claims: &[&ReviewedClaim]) -> Option<String> {
    claims.iter().find_map(|c| {
        c.claim
            .summary
            .as_deref()
            .and_then(non_empty)
            .or_else(|| non_empty(&c.claim.text))
            .map(str::to_string)
    })
}

/// Display topic: the candidate, else the summary, else the first claim's
/// summary or text. A topic that merely repeats the run prompt is replaced
/// the same way, skipping the candidate.
pub fn derive_topic(candidate: &str, summary: &str, claims: &[&ReviewedClaim], prompt: &str) -> String {
    let fallback = || {
        non_empty(summary)
            .map(str::to_string)
            .or_else(|| first_claim_text(claims))
            .unwrap_or_else(|| DEFAULT_TOPIC.to_string())
    };
    let topic = non_empty(candidate).map(str::to_string).unwrap_or_else(fallback);
    if topic.to_lowercase() == prompt.trim().to_lowercase() {
        fallback()
    } else {
        topic
    }
}

/// The summary if present, else the first sentence of `detail`.
pub fn derive_summary(summary: &str, detail: &str) -> String {
    if let Some(summary) = non_empty(summary) {
        return summary.to_string();
    }
    match non_empty(detail) {
        Some(detail) => {
            let first = detail.split('.').next().unwrap_or_default().trim();
            if first.is_empty() { detail } else { first }.to_string()
        }
        None => String::new(),
    }
}

/// Join the saved artifacts of a run into one payload.
pub fn build_payload(
    run_id: Uuid,
    prompt: &str,
    artifacts: &ArtifactStore,
    sources: &BTreeMap<String, String>,
) -> anyhow::Result<RunPayload> {
    let reviewed = artifacts.reviewed_index()?;
    let report = artifacts.load_report()?.unwrap_or_default();

    let insights = report
        .insights
        .into_iter()
        .map(|mut insight| {
            let claims: Vec<ReviewedClaim> = insight
                .claim_ids
                .iter()
                .filter_map(|id| reviewed.get(id).cloned())
                .collect();
            let members: Vec<&ReviewedClaim> = claims.iter().collect();
            insight.topic = derive_topic(&insight.topic, &insight.summary, &members, prompt);
            insight.summary = derive_summary(&insight.summary, &insight.text);
            PayloadInsight { insight, claims }
        })
        .collect();

    let challenges = artifacts
        .load_findings()?
        .into_iter()
        .map(|mut finding| {
            let claims: Vec<&ReviewedClaim> = reviewed.get(&finding.claim_id).into_iter().collect();
            finding.topic = derive_topic(&finding.topic, &finding.summary, &claims, prompt);
            finding.summary = derive_summary(&finding.summary, &finding.detail);
            finding
        })
        .collect();

    Ok(RunPayload {
        run_id: run_id.to_string(),
        topic: prompt.to_string(),
        insights,
        challenges,
        actions: artifacts.load_actions()?,
        sources: sources
            .iter()
            .map(|(source_id, filename)| SourceFile {
                source_id: source_id.clone(),
                filename: filename.clone(),
            })
            .collect(),
    })
}
