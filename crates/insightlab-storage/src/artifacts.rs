//! Run artifacts (JSON files) and the append-only trace log.

use crate::model::{ActionItem, Claim, Insight, RedTeamFinding, ReviewedClaim};
use anyhow::Context;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const CLAIMS_FILE: &str = "claims.json";
pub const REVIEWED_FILE: &str = "claims_reviewed.json";
pub const CHALLENGES_FILE: &str = "challenges.json";
pub const REPORT_FILE: &str = "report.json";
pub const ACTIONS_FILE: &str = "actions.json";
pub const PAYLOAD_FILE: &str = "payload.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Report {
    pub topic: String,
    pub insights: Vec<Insight>,
}

/// An insight joined with the reviewed claims it clusters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadInsight {
    #[serde(flatten)]
    pub insight: Insight,
    #[serde(default)]
    pub claims: Vec<ReviewedClaim>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub source_id: String,
    pub filename: String,
}

/// Presentation-ready summary of one run, assembled from its artifacts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunPayload {
    pub run_id: String,
    pub topic: String,
    pub insights: Vec<PayloadInsight>,
    pub challenges: Vec<RedTeamFinding>,
    pub actions: Vec<ActionItem>,
    #[serde(default)]
    pub sources: Vec<SourceFile>,
}

/// JSON artifacts for one workspace directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    fn save<T: Serialize + ?Sized>(&self, file: &str, value: &T) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating artifacts dir {}", self.dir.display()))?;
        let path = self.path_of(file);
        let json = serde_json::to_string_pretty(value)?;
        std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    /// Missing file → `None`; unreadable or malformed file → error.
    fn load<T: DeserializeOwned>(&self, file: &str) -> anyhow::Result<Option<T>> {
        let path = self.path_of(file);
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let value = serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(value))
    }

    pub fn save_claims(&self, claims: &[Claim]) -> anyhow::Result<PathBuf> {
        self.save(CLAIMS_FILE, claims)
    }

    pub fn load_claims(&self) -> anyhow::Result<Vec<Claim>> {
        Ok(self.load(CLAIMS_FILE)?.unwrap_or_default())
    }

    pub fn save_reviewed(&self, reviewed: &[ReviewedClaim]) -> anyhow::Result<PathBuf> {
        self.save(REVIEWED_FILE, reviewed)
    }

    pub fn load_reviewed(&self) -> anyhow::Result<Vec<ReviewedClaim>> {
        Ok(self.load(REVIEWED_FILE)?.unwrap_or_default())
    }

    /// Reviewed claims keyed by claim id.
    pub fn reviewed_index(&self) -> anyhow::Result<BTreeMap<String, ReviewedClaim>> {
        Ok(self
            .load_reviewed()?
            .into_iter()
            .map(|c| (c.claim.id.clone(), c))
            .collect())
    }

    pub fn save_findings(&self, findings: &[RedTeamFinding]) -> anyhow::Result<PathBuf> {
        self.save(CHALLENGES_FILE, findings)
    }

    pub fn load_findings(&self) -> anyhow::Result<Vec<RedTeamFinding>> {
        Ok(self.load(CHALLENGES_FILE)?.unwrap_or_default())
    }

    pub fn save_report(&self, report: &Report) -> anyhow::Result<PathBuf> {
        self.save(REPORT_FILE, report)
    }

    pub fn load_report(&self) -> anyhow::Result<Option<Report>> {
        self.load(REPORT_FILE)
    }

    pub fn save_actions(&self, actions: &[ActionItem]) -> anyhow::Result<PathBuf> {
        self.save(ACTIONS_FILE, actions)
    }

    pub fn load_actions(&self) -> anyhow::Result<Vec<ActionItem>> {
        Ok(self.load(ACTIONS_FILE)?.unwrap_or_default())
    }

    pub fn save_payload(&self, payload: &RunPayload) -> anyhow::Result<PathBuf> {
        self.save(PAYLOAD_FILE, payload)
    }

    pub fn load_payload(&self) -> anyhow::Result<Option<RunPayload>> {
        self.load(PAYLOAD_FILE)
    }

    /// Remove downstream artifacts; claims too when `include_claims`.
    pub fn reset(&self, include_claims: bool) -> anyhow::Result<()> {
        let mut files = vec![
            REVIEWED_FILE,
            CHALLENGES_FILE,
            REPORT_FILE,
            ACTIONS_FILE,
            PAYLOAD_FILE,
        ];
        if include_claims {
            files.push(CLAIMS_FILE);
        }
        for file in files {
            let path = self.path_of(file);
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("removing {}", path.display()))?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Trace log
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub timestamp: String,
    pub agent: String,
    pub stage: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Append-only JSONL log of pipeline stage events.
#[derive(Debug, Clone)]
pub struct TraceLog {
    path: PathBuf,
}

impl TraceLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn log_event(
        &self,
        agent: &str,
        stage: &str,
        topic: Option<&str>,
        details: Option<Value>,
    ) -> anyhow::Result<()> {
        let event = TraceEvent {
            timestamp: Utc::now().to_rfc3339(),
            agent: agent.to_string(),
            stage: stage.to_string(),
            topic: topic.map(str::to_string),
            details,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(&event)?)?;
        Ok(())
    }

    /// All events in order. Lines that fail to parse are skipped.
    pub fn events(&self) -> anyhow::Result<Vec<TraceEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}
