//! Insight Pipeline: orchestrates one research run end to end
//!
//! The pipeline coordinates:
//! 1. Ingestion of the run's staged documents into the index
//! 2. Claim drafting from retrieved passages
//! 3. Claim review against cited evidence
//! 4. Red-team counter-evidence against supported claims
//! 5. Insight synthesis and action planning
//!
//! Ingestion is marked done and skipped when the run has no staged
//! documents. Ingestion, drafting and review failures abort the run. The
//! later stages degrade: a failure marks the stage `failed` and the run
//! continues with empty outputs for that stage. With artifacts configured,
//! a finished run also writes `payload.json`.

use crate::llm::StructuredLlm;
use crate::red_team::RedTeam;
use crate::researcher::Researcher;
use crate::retrieval::{ChunkIndex, Retriever};
use crate::reviewer::ClaimReviewer;
use crate::runs::build_payload;
use crate::synthesis::{ActionPlanner, Synthesizer};
use crate::validator::MultilevelValidator;
use anyhow::Context;
use chrono::{DateTime, Utc};
use insightlab_ingest_docs::IngestedCorpus;
use insightlab_storage::{
    ActionItem, ArtifactStore, Insight, PageTextStore, RedTeamFinding, ReviewedClaim, RunPayload,
    TraceLog, Verdict,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// Stages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingestion,
    Researcher,
    Reviewer,
    RedTeam,
    Synthesizer,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Ingestion,
        Stage::Researcher,
        Stage::Reviewer,
        Stage::RedTeam,
        Stage::Synthesizer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingestion => "ingestion",
            Stage::Researcher => "researcher",
            Stage::Reviewer => "reviewer",
            Stage::RedTeam => "red_team",
            Stage::Synthesizer => "synthesizer",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Records produced by the stage
    pub output_count: usize,
    pub error: Option<String>,
    /// Done without doing any work
    #[serde(default)]
    pub skipped: bool,
}

impl StageRecord {
    fn pending(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            started_at: None,
            finished_at: None,
            output_count: 0,
            error: None,
            skipped: false,
        }
    }
}

// ============================================================================
// Run report
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub claims: usize,
    pub supported: usize,
    pub weak: usize,
    pub contradicted: usize,
    pub findings: usize,
    pub insights: usize,
    pub actions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub topic: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stages: Vec<StageRecord>,
    pub counts: RunCounts,
    /// Source id to file name for documents ingested by this run
    #[serde(default)]
    pub sources: BTreeMap<String, String>,
}

impl RunReport {
    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    /// True when no stage failed.
    pub fn is_clean(&self) -> bool {
        self.stages.iter().all(|r| r.status == StageStatus::Done)
    }
}

/// Everything a run produced, alongside its report.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub report: RunReport,
    pub reviewed: Vec<ReviewedClaim>,
    pub findings: Vec<RedTeamFinding>,
    pub insights: Vec<Insight>,
    pub actions: Vec<ActionItem>,
    /// Set when the run persisted artifacts
    pub payload: Option<RunPayload>,
}

// ============================================================================
// Events
// ============================================================================

/// Events emitted as a run progresses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    StageStarted { run_id: Uuid, stage: Stage },
    StageFinished { run_id: Uuid, stage: Stage, output_count: usize },
    StageSkipped { run_id: Uuid, stage: Stage, reason: String },
    StageFailed { run_id: Uuid, stage: Stage, message: String },
}

/// Callback for pipeline events
pub type PipelineEventHandler = Box<dyn Fn(&PipelineEvent) + Send + Sync>;

/// Stage bookkeeping for one run: status records, trace events, handlers.
struct StageTracker<'a> {
    run_id: Uuid,
    topic: &'a str,
    records: Vec<StageRecord>,
    trace: Option<&'a TraceLog>,
    handlers: &'a [PipelineEventHandler],
}

impl<'a> StageTracker<'a> {
    fn record_mut(&mut self, stage: Stage) -> &mut StageRecord {
        let idx = Stage::ALL.iter().position(|s| *s == stage).unwrap_or(0);
        &mut self.records[idx]
    }

    fn emit(&self, event: PipelineEvent) {
        for handler in self.handlers {
            handler(&event);
        }
    }

    fn log(&self, stage: Stage, status: &str, details: Value) {
        if let Some(trace) = self.trace {
            if let Err(err) = trace.log_event(stage.as_str(), status, Some(self.topic), Some(details)) {
                tracing::warn!(error = %err, "failed to append trace event");
            }
        }
    }

    fn begin(&mut self, stage: Stage) {
        let record = self.record_mut(stage);
        record.status = StageStatus::Running;
        record.started_at = Some(Utc::now());
        tracing::info!(run_id = %self.run_id, %stage, "stage started");
        self.log(stage, "running", json!({"run_id": self.run_id}));
        self.emit(PipelineEvent::StageStarted {
            run_id: self.run_id,
            stage,
        });
    }

    fn finish(&mut self, stage: Stage, output_count: usize) {
        let record = self.record_mut(stage);
        record.status = StageStatus::Done;
        record.finished_at = Some(Utc::now());
        record.output_count = output_count;
        tracing::info!(run_id = %self.run_id, %stage, output_count, "stage done");
        self.log(
            stage,
            "done",
            json!({"run_id": self.run_id, "output_count": output_count}),
        );
        self.emit(PipelineEvent::StageFinished {
            run_id: self.run_id,
            stage,
            output_count,
        });
    }

    fn skip(&mut self, stage: Stage, reason: &str) {
        let now = Utc::now();
        let record = self.record_mut(stage);
        record.status = StageStatus::Done;
        record.skipped = true;
        record.started_at = Some(now);
        record.finished_at = Some(now);
        tracing::info!(run_id = %self.run_id, %stage, reason, "stage skipped");
        self.log(stage, "skipped", json!({"run_id": self.run_id, "reason": reason}));
        self.emit(PipelineEvent::StageSkipped {
            run_id: self.run_id,
            stage,
            reason: reason.to_string(),
        });
    }

    fn fail(&mut self, stage: Stage, err: &anyhow::Error) {
        let message = format!("{err:#}");
        let record = self.record_mut(stage);
        record.status = StageStatus::Failed;
        record.finished_at = Some(Utc::now());
        record.error = Some(message.clone());
        tracing::warn!(run_id = %self.run_id, %stage, error = %message, "stage failed");
        self.log(stage, "failed", json!({"run_id": self.run_id, "error": message}));
        self.emit(PipelineEvent::StageFailed {
            run_id: self.run_id,
            stage,
            message,
        });
    }
}

// ============================================================================
// Ingestion
// ============================================================================

/// Staged documents for a run and the index their chunks land in.
pub struct IngestionTarget {
    input_dir: PathBuf,
    pages: Arc<PageTextStore>,
    index: Arc<ChunkIndex>,
    index_path: Option<PathBuf>,
}

impl IngestionTarget {
    pub fn new(input_dir: impl Into<PathBuf>, pages: Arc<PageTextStore>, index: Arc<ChunkIndex>) -> Self {
        Self {
            input_dir: input_dir.into(),
            pages,
            index,
            index_path: None,
        }
    }

    /// Save the index to `path` after ingesting.
    pub fn persist_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_path = Some(path.into());
        self
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    fn has_documents(&self) -> bool {
        self.input_dir.is_dir()
            && insightlab_ingest_docs::discover_documents(&self.input_dir)
                .map(|docs| !docs.is_empty())
                .unwrap_or(false)
    }

    async fn ingest(&self) -> anyhow::Result<IngestedCorpus> {
        let corpus = insightlab_ingest_docs::ingest_corpus(&self.input_dir, &self.pages)?;
        self.index.add_chunks(&corpus.chunks).await?;
        if let Some(path) = &self.index_path {
            self.index.save(path)?;
        }
        Ok(corpus)
    }
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct InsightPipeline {
    ingestion: Option<IngestionTarget>,
    researcher: Researcher,
    reviewer: ClaimReviewer,
    red_team: RedTeam,
    synthesizer: Synthesizer,
    planner: ActionPlanner,
    artifacts: Option<ArtifactStore>,
    trace: Option<TraceLog>,
    run_id: Option<Uuid>,
    event_handlers: Vec<PipelineEventHandler>,
}

impl InsightPipeline {
    /// Wire the default components around one retriever, model and validator.
    pub fn new(
        retriever: Arc<dyn Retriever>,
        llm: Arc<dyn StructuredLlm>,
        validator: Arc<MultilevelValidator>,
    ) -> Self {
        Self {
            ingestion: None,
            researcher: Researcher::new(Arc::clone(&retriever), Arc::clone(&llm)),
            reviewer: ClaimReviewer::new(Arc::clone(&validator)),
            red_team: RedTeam::new(retriever, validator),
            synthesizer: Synthesizer::new(Arc::clone(&llm)),
            planner: ActionPlanner::new(llm),
            artifacts: None,
            trace: None,
            run_id: None,
            event_handlers: Vec::new(),
        }
    }

    /// Persist every stage's output, and the run payload, under `artifacts`.
    pub fn with_artifacts(mut self, artifacts: ArtifactStore) -> Self {
        self.researcher = self.researcher.with_artifacts(artifacts.clone());
        self.reviewer = self.reviewer.with_artifacts(artifacts.clone());
        self.red_team = self.red_team.with_artifacts(artifacts.clone());
        self.synthesizer = self.synthesizer.with_artifacts(artifacts.clone());
        self.planner = self.planner.with_artifacts(artifacts.clone());
        self.artifacts = Some(artifacts);
        self
    }

    pub fn with_ingestion(mut self, target: IngestionTarget) -> Self {
        self.ingestion = Some(target);
        self
    }

    /// Use a fixed run id instead of a fresh one.
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_trace(mut self, trace: TraceLog) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_researcher(mut self, researcher: Researcher) -> Self {
        self.researcher = researcher;
        self
    }

    pub fn with_red_team(mut self, red_team: RedTeam) -> Self {
        self.red_team = red_team;
        self
    }

    /// Add an event handler
    pub fn on_event(&mut self, handler: PipelineEventHandler) {
        self.event_handlers.push(handler);
    }

    pub async fn run(&self, topic: &str) -> anyhow::Result<RunReport> {
        Ok(self.run_with_output(topic).await?.report)
    }

    /// Run every stage and return the report with the produced records.
    pub async fn run_with_output(&self, topic: &str) -> anyhow::Result<RunOutput> {
        let started_at = Utc::now();
        let mut tracker = StageTracker {
            run_id: self.run_id.unwrap_or_else(Uuid::new_v4),
            topic,
            records: Stage::ALL.iter().map(|s| StageRecord::pending(*s)).collect(),
            trace: self.trace.as_ref(),
            handlers: &self.event_handlers,
        };
        tracing::info!(run_id = %tracker.run_id, topic, "starting run");

        let sources = self.ingest(&mut tracker).await?;

        tracker.begin(Stage::Researcher);
        let claims = match self.researcher.draft(topic).await {
            Ok(claims) => claims,
            Err(err) => {
                let err = anyhow::Error::new(err);
                tracker.fail(Stage::Researcher, &err);
                return Err(err.context(format!("drafting claims for '{topic}'")));
            }
        };
        tracker.finish(Stage::Researcher, claims.len());

        tracker.begin(Stage::Reviewer);
        let reviewed = match self.reviewer.review(&claims).await {
            Ok(reviewed) => reviewed,
            Err(err) => {
                tracker.fail(Stage::Reviewer, &err);
                return Err(err).context("reviewing drafted claims");
            }
        };
        tracker.finish(Stage::Reviewer, reviewed.len());

        tracker.begin(Stage::RedTeam);
        let findings = match self.red_team.run(topic, &reviewed).await {
            Ok(findings) => {
                tracker.finish(Stage::RedTeam, findings.len());
                findings
            }
            Err(err) => {
                tracker.fail(Stage::RedTeam, &err);
                Vec::new()
            }
        };

        tracker.begin(Stage::Synthesizer);
        let (insights, actions) = match self.synthesize(topic, &reviewed, &findings).await {
            Ok(out) => {
                tracker.finish(Stage::Synthesizer, out.0.len() + out.1.len());
                out
            }
            Err(err) => {
                tracker.fail(Stage::Synthesizer, &err);
                (Vec::new(), Vec::new())
            }
        };

        let count = |v: Verdict| reviewed.iter().filter(|c| c.verdict == v).count();
        let counts = RunCounts {
            claims: claims.len(),
            supported: count(Verdict::Supported),
            weak: count(Verdict::Weak),
            contradicted: count(Verdict::Contradicted),
            findings: findings.len(),
            insights: insights.len(),
            actions: actions.len(),
        };
        let report = RunReport {
            run_id: tracker.run_id,
            topic: topic.to_string(),
            started_at,
            finished_at: Utc::now(),
            stages: tracker.records,
            counts,
            sources,
        };
        let payload = self.write_payload(&report);
        tracing::info!(run_id = %report.run_id, clean = report.is_clean(), "run complete");

        Ok(RunOutput {
            report,
            reviewed,
            findings,
            insights,
            actions,
            payload,
        })
    }

    /// Ingest staged documents. Returns the source map of what was ingested.
    async fn ingest(&self, tracker: &mut StageTracker<'_>) -> anyhow::Result<BTreeMap<String, String>> {
        let Some(target) = &self.ingestion else {
            tracker.skip(Stage::Ingestion, "no input directory");
            return Ok(BTreeMap::new());
        };
        if !target.has_documents() {
            tracker.skip(Stage::Ingestion, "no staged documents");
            return Ok(BTreeMap::new());
        }

        tracker.begin(Stage::Ingestion);
        match target.ingest().await {
            Ok(corpus) => {
                tracker.finish(Stage::Ingestion, corpus.chunks.len());
                Ok(corpus.sources)
            }
            Err(err) => {
                tracker.fail(Stage::Ingestion, &err);
                Err(err.context(format!("ingesting {}", target.input_dir.display())))
            }
        }
    }

    fn write_payload(&self, report: &RunReport) -> Option<RunPayload> {
        let artifacts = self.artifacts.as_ref()?;
        let saved = build_payload(report.run_id, &report.topic, artifacts, &report.sources)
            .and_then(|payload| artifacts.save_payload(&payload).map(|_| payload));
        match saved {
            Ok(payload) => Some(payload),
            Err(err) => {
                let message = format!("{err:#}");
                tracing::warn!(run_id = %report.run_id, error = %message, "payload not written");
                None
            }
        }
    }

    async fn synthesize(
        &self,
        topic: &str,
        reviewed: &[ReviewedClaim],
        findings: &[RedTeamFinding],
    ) -> anyhow::Result<(Vec<Insight>, Vec<ActionItem>)> {
        let insights = self
            .synthesizer
            .synthesize(topic, reviewed, findings)
            .await
            .context("synthesizing insights")?;
        let actions = self
            .planner
            .plan(topic, reviewed, &insights)
            .await
            .context("planning actions")?;
        Ok((insights, actions))
    }
}
