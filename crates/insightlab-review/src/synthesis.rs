//! Insight synthesis and action planning.
//!
//! Both stages ask the model first and fall back to a deterministic shape
//! when it is unavailable. Confidence and provenance are always computed
//! here from the reviewed claims, never taken from the model.

use crate::llm::StructuredLlm;
use insightlab_storage::{
    ActionItem, ArtifactStore, EvidenceSpan, Insight, Priority, RedTeamFinding, Report,
    ReviewedClaim, Verdict,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Penalty per member claim challenged by the red team.
pub const CHALLENGE_PENALTY: f64 = 0.1;

fn claim_weight(verdict: Verdict) -> f64 {
    match verdict {
        Verdict::Supported => 0.9,
        Verdict::Weak => 0.5,
        Verdict::Contradicted => 0.0,
    }
}

/// Mean claim weight minus the challenge penalty, clamped to `[0, 1]`.
pub fn insight_confidence(members: &[&ReviewedClaim], challenged: &HashSet<&str>) -> f64 {
    if members.is_empty() {
        return 0.0;
    }
    let mean = members.iter().map(|c| claim_weight(c.verdict)).sum::<f64>() / members.len() as f64;
    let hits = members
        .iter()
        .filter(|c| challenged.contains(c.id()))
        .count();
    (mean - CHALLENGE_PENALTY * hits as f64).clamp(0.0, 1.0)
}

fn provenance(members: &[&ReviewedClaim]) -> Vec<EvidenceSpan> {
    let mut spans: Vec<EvidenceSpan> = Vec::new();
    for span in members.iter().flat_map(|c| c.claim.citations.iter()) {
        if !spans.contains(span) {
            spans.push(span.clone());
        }
    }
    spans
}

fn items_of(value: Value, field: &str) -> Option<Value> {
    match value {
        Value::Object(mut map) => map.remove(field),
        array @ Value::Array(_) => Some(array),
        _ => None,
    }
}

// ============================================================================
// Synthesizer
// ============================================================================

#[derive(Debug, Deserialize)]
struct ProposedInsight {
    #[serde(default, alias = "title")]
    summary: String,
    text: String,
    #[serde(default)]
    claim_ids: Vec<String>,
}

const SYNTHESIS_SYSTEM_PROMPT: &str = "You group reviewed research claims into a few \
higher-level insights. Only reference claim ids you are given. Respond with JSON only: \
{\"insights\": [{\"summary\": \"short title\", \"text\": \"two or three sentences\", \
\"claim_ids\": [\"c0001\"]}]}.";

pub struct Synthesizer {
    llm: Arc<dyn StructuredLlm>,
    artifacts: Option<ArtifactStore>,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn StructuredLlm>) -> Self {
        Self {
            llm,
            artifacts: None,
        }
    }

    pub fn with_artifacts(mut self, artifacts: ArtifactStore) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Cluster non-contradicted claims into insights and save the report.
    pub async fn synthesize(
        &self,
        topic: &str,
        reviewed: &[ReviewedClaim],
        findings: &[RedTeamFinding],
    ) -> anyhow::Result<Vec<Insight>> {
        let eligible: Vec<&ReviewedClaim> = reviewed
            .iter()
            .filter(|c| c.verdict != Verdict::Contradicted)
            .collect();
        let challenged: HashSet<&str> = findings.iter().map(|f| f.claim_id.as_str()).collect();

        let clusters = if eligible.is_empty() {
            Vec::new()
        } else {
            match self.cluster_with_model(topic, &eligible).await {
                Some(clusters) if !clusters.is_empty() => clusters,
                _ => cluster_by_source(&eligible),
            }
        };

        let insights: Vec<Insight> = clusters
            .into_iter()
            .enumerate()
            .map(|(i, (summary, text, ids))| {
                let members: Vec<&ReviewedClaim> = eligible
                    .iter()
                    .copied()
                    .filter(|c| ids.iter().any(|id| id == c.id()))
                    .collect();
                Insight {
                    id: format!("i{:03}", i + 1),
                    topic: topic.to_string(),
                    summary,
                    text,
                    claim_ids: members.iter().map(|c| c.id().to_string()).collect(),
                    confidence: insight_confidence(&members, &challenged),
                    provenance: provenance(&members),
                }
            })
            .collect();

        if let Some(artifacts) = &self.artifacts {
            artifacts.save_report(&Report {
                topic: topic.to_string(),
                insights: insights.clone(),
            })?;
        }
        tracing::info!(topic, insights = insights.len(), "synthesis complete");
        Ok(insights)
    }

    async fn cluster_with_model(
        &self,
        topic: &str,
        eligible: &[&ReviewedClaim],
    ) -> Option<Vec<(String, String, Vec<String>)>> {
        let mut user = format!("Topic: {topic}\n\nClaims:\n");
        for claim in eligible {
            user.push_str(&format!("[{}] ({}) {}\n", claim.id(), claim.verdict, claim.claim.text));
        }
        let value = match self.llm.call_structured(SYNTHESIS_SYSTEM_PROMPT, &user).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "insight clustering call failed");
                return None;
            }
        };
        let proposed: Vec<ProposedInsight> = serde_json::from_value(items_of(value, "insights")?)
            .map_err(|err| tracing::warn!(error = %err, "unusable clustering response"))
            .ok()?;

        let known: HashSet<&str> = eligible.iter().map(|c| c.id()).collect();
        let clusters = proposed
            .into_iter()
            .filter_map(|p| {
                let ids: Vec<String> = p
                    .claim_ids
                    .into_iter()
                    .filter(|id| known.contains(id.as_str()))
                    .collect();
                (!ids.is_empty() && !p.text.trim().is_empty())
                    .then(|| (p.summary.trim().to_string(), p.text.trim().to_string(), ids))
            })
            .collect();
        Some(clusters)
    }
}

/// One cluster per primary source (first citation), in first-seen order.
fn cluster_by_source(eligible: &[&ReviewedClaim]) -> Vec<(String, String, Vec<String>)> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: BTreeMap<String, Vec<&ReviewedClaim>> = BTreeMap::new();
    for claim in eligible {
        let source = claim
            .claim
            .citations
            .first()
            .map(|s| s.source_id.clone())
            .unwrap_or_else(|| "uncited".to_string());
        if !groups.contains_key(&source) {
            order.push(source.clone());
        }
        groups.entry(source).or_default().push(claim);
    }
    order
        .into_iter()
        .filter_map(|source| {
            let members = groups.remove(&source)?;
            let text = members
                .iter()
                .map(|c| c.claim.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            Some((
                format!("{} claim(s) from {}", members.len(), source),
                text,
                members.iter().map(|c| c.id().to_string()).collect(),
            ))
        })
        .collect()
}

// ============================================================================
// Action planner
// ============================================================================

#[derive(Debug, Deserialize)]
struct ProposedAction {
    title: String,
    #[serde(default)]
    detail: String,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    insight_ids: Vec<String>,
}

const ACTION_SYSTEM_PROMPT: &str = "You turn research insights into concrete follow-up \
actions. Only reference insight ids you are given. Respond with JSON only: {\"actions\": \
[{\"title\": \"...\", \"detail\": \"...\", \"priority\": \"high|medium|low\", \
\"insight_ids\": [\"i001\"]}]}.";

pub struct ActionPlanner {
    llm: Arc<dyn StructuredLlm>,
    artifacts: Option<ArtifactStore>,
}

impl ActionPlanner {
    pub fn new(llm: Arc<dyn StructuredLlm>) -> Self {
        Self {
            llm,
            artifacts: None,
        }
    }

    pub fn with_artifacts(mut self, artifacts: ArtifactStore) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub async fn plan(
        &self,
        topic: &str,
        reviewed: &[ReviewedClaim],
        insights: &[Insight],
    ) -> anyhow::Result<Vec<ActionItem>> {
        let mut actions = if insights.is_empty() {
            Vec::new()
        } else {
            match self.plan_with_model(topic, reviewed, insights).await {
                Some(actions) if !actions.is_empty() => actions,
                _ => fallback_actions(insights),
            }
        };
        for (i, action) in actions.iter_mut().enumerate() {
            action.id = format!("a{:03}", i + 1);
        }

        if let Some(artifacts) = &self.artifacts {
            artifacts.save_actions(&actions)?;
        }
        tracing::info!(topic, actions = actions.len(), "action planning complete");
        Ok(actions)
    }

    async fn plan_with_model(
        &self,
        topic: &str,
        reviewed: &[ReviewedClaim],
        insights: &[Insight],
    ) -> Option<Vec<ActionItem>> {
        let mut user = format!("Topic: {topic}\n\nInsights:\n");
        for insight in insights {
            user.push_str(&format!(
                "[{}] (confidence {:.2}) {}: {}\n",
                insight.id, insight.confidence, insight.summary, insight.text
            ));
        }
        let gaps: Vec<&ReviewedClaim> = reviewed
            .iter()
            .filter(|c| c.verdict != Verdict::Supported)
            .collect();
        if !gaps.is_empty() {
            user.push_str("\nOpen questions (weak or contradicted claims):\n");
            for claim in gaps {
                user.push_str(&format!("- {} ({})\n", claim.claim.text, claim.verdict));
            }
        }

        let value = match self.llm.call_structured(ACTION_SYSTEM_PROMPT, &user).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "action planning call failed");
                return None;
            }
        };
        let proposed: Vec<ProposedAction> = serde_json::from_value(items_of(value, "actions")?)
            .map_err(|err| tracing::warn!(error = %err, "unusable action response"))
            .ok()?;

        let by_id: BTreeMap<&str, &Insight> = insights.iter().map(|i| (i.id.as_str(), i)).collect();
        let actions = proposed
            .into_iter()
            .filter(|p| !p.title.trim().is_empty())
            .map(|p| {
                let insight_ids: Vec<String> = p
                    .insight_ids
                    .into_iter()
                    .filter(|id| by_id.contains_key(id.as_str()))
                    .collect();
                let priority = p
                    .priority
                    .as_deref()
                    .and_then(Priority::from_label)
                    .unwrap_or_else(|| {
                        let confidence = insight_ids
                            .first()
                            .and_then(|id| by_id.get(id.as_str()))
                            .map_or(0.0, |i| i.confidence);
                        Priority::from_confidence(confidence)
                    });
                ActionItem {
                    id: String::new(),
                    title: p.title.trim().to_string(),
                    detail: p.detail.trim().to_string(),
                    priority,
                    insight_ids,
                }
            })
            .collect();
        Some(actions)
    }
}

fn fallback_actions(insights: &[Insight]) -> Vec<ActionItem> {
    insights
        .iter()
        .map(|insight| {
            let label = if insight.summary.is_empty() {
                &insight.id
            } else {
                &insight.summary
            };
            ActionItem {
                id: String::new(),
                title: format!("Follow up: {label}"),
                detail: insight.text.clone(),
                priority: Priority::from_confidence(insight.confidence),
                insight_ids: vec![insight.id.clone()],
            }
        })
        .collect()
}
