//! Insight Lab Review: evidence-grounded claims from drafting to actions
//!
//! This crate drafts claims from retrieved passages, checks every citation
//! against its source, actively looks for counter-evidence and folds what
//! survives into insights and follow-up actions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          INSIGHT PIPELINE                                │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │                                                                          │
//! │  inputs/ ──► Ingestion (skipped when no documents are staged)           │
//! │        │ chunks                                                          │
//! │  ┌─────▼──────┐   hits    ┌────────────┐   claims   ┌────────────────┐   │
//! │  │ ChunkIndex │──────────►│ Researcher │───────────►│ ClaimReviewer  │   │
//! │  │ (Retriever)│           └────────────┘            └───────┬────────┘   │
//! │  └─────▲──────┘                                             │            │
//! │        │ counter queries                          per-span  │            │
//! │  ┌─────┴──────┐                              ┌──────────────▼─────────┐  │
//! │  │  RedTeam   │─────────────────────────────►│  MultilevelValidator   │  │
//! │  └─────┬──────┘                              │  L1 structural (quote) │  │
//! │        │ findings                            │  L2 keyword overlap    │  │
//! │  ┌─────▼──────────────┐                      │  L3 semantic (model,   │  │
//! │  │ Synthesizer        │                      │     cached)            │  │
//! │  │ + ActionPlanner    │                      └────────────────────────┘  │
//! │  └─────────┬──────────┘                                                  │
//! │            └──► payload.json (insights + claims, challenges, actions)    │
//! │                                                                          │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Validation Levels
//! - **Level 1**: the quote is found verbatim (after normalization) in context
//! - **Level 2**: claim keywords overlap the context
//! - **Level 3**: a model adjudicates, with results cached per input
//!
//! Cheaper levels stop escalation when they are confident enough. Model
//! failures never abort a review; they degrade to a `Weak` verdict.

pub mod config;
pub mod context;
pub mod embeddings;
pub mod llm;
pub mod pipeline;
pub mod red_team;
pub mod researcher;
pub mod retrieval;
pub mod reviewer;
pub mod runs;
pub mod synthesis;
pub mod text;
pub mod validator;

pub use config::{Lab, LabConfig};
pub use context::SpanContextResolver;
pub use embeddings::{
    build_embedder, CachedEmbedder, DeterministicEmbedder, EmbeddingProvider, EmbeddingStrategy,
    RemoteEmbedder,
};
pub use llm::{DisabledLlm, LLMError, MockLlm, StructuredLlm, UnifiedClient};
pub use pipeline::{
    IngestionTarget, InsightPipeline, PipelineEvent, RunCounts, RunOutput, RunReport, Stage,
    StageRecord, StageStatus,
};
pub use red_team::{CounterEvidenceGatherer, RedTeam};
pub use researcher::{ResearchError, Researcher};
pub use retrieval::{ChunkIndex, RetrievalError, Retriever};
pub use reviewer::{aggregate_verdicts, ClaimReviewer};
pub use runs::{build_payload, derive_summary, derive_topic, RunWorkspace};
pub use synthesis::{ActionPlanner, Synthesizer};
pub use validator::{Level, MultilevelValidator, SemanticAdjudicator, ValidationResult};

// Re-export the data model for convenience
pub use insightlab_storage::{
    ActionItem, ChunkRecord, Claim, ClaimStatus, EvidenceSpan, Insight, Priority, RedTeamFinding,
    ReviewedClaim, Verdict,
};
