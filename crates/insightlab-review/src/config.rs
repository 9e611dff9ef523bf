//! Runtime configuration and component wiring.
//!
//! [`LabConfig`] gathers paths and strategy choices from the environment;
//! [`Lab`] is the opened runtime: caches, page store, index, model and
//! validator, ready to hand to the pipeline or to individual stages.
//! [`Lab::run_in_workspace`] runs the pipeline inside a fresh
//! [`RunWorkspace`] under `runs_dir`.

use crate::context::{SpanContextResolver, DEFAULT_WINDOW};
use crate::embeddings::{build_embedder, EmbeddingStrategy, DEFAULT_EMBED_MODEL};
use crate::llm::{ConfigError, DisabledLlm, StructuredLlm, UnifiedClient};
use crate::pipeline::{IngestionTarget, InsightPipeline, RunOutput};
use crate::red_team::RedTeam;
use crate::researcher::Researcher;
use crate::retrieval::ChunkIndex;
use crate::reviewer::ClaimReviewer;
use crate::runs::RunWorkspace;
use crate::synthesis::{ActionPlanner, Synthesizer};
use crate::validator::MultilevelValidator;
use insightlab_storage::{
    ArtifactStore, CachePartition, CacheSet, PageTextStore, StorageConfig, TraceLog,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct LabConfig {
    pub storage: StorageConfig,
    pub index_path: PathBuf,
    /// Parent of the per-run workspaces
    pub runs_dir: PathBuf,
    pub embeddings: EmbeddingStrategy,
    pub embed_model: String,
    /// Characters of page text kept on each side of a legacy span
    pub context_window: usize,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self::with_storage(StorageConfig::default())
    }
}

impl LabConfig {
    /// Defaults derived from a storage layout; the index and the runs dir
    /// sit next to the caches.
    pub fn with_storage(storage: StorageConfig) -> Self {
        let data_dir = storage.cache_dir.parent().unwrap_or(Path::new("")).to_path_buf();
        Self {
            index_path: data_dir.join("index.json"),
            runs_dir: data_dir.join("runs"),
            storage,
            embeddings: EmbeddingStrategy::default(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            context_window: DEFAULT_WINDOW,
        }
    }

    /// `StorageConfig::from_env` plus `INDEX_PATH`, `RUNS_DIR`, `EMBEDDINGS`,
    /// `EMBED_MODEL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        let mut config = Self::with_storage(StorageConfig::from_env());
        config.index_path = match var("INDEX_PATH") {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(var("INSIGHTLAB_DATA_DIR").unwrap_or_else(|| ".data".into()))
                .join("index.json"),
        };
        if let Some(dir) = var("RUNS_DIR") {
            config.runs_dir = PathBuf::from(dir);
        }
        if let Some(strategy) = var("EMBEDDINGS") {
            config.embeddings = strategy.parse()?;
        }
        if let Some(model) = var("EMBED_MODEL") {
            config.embed_model = model;
        }
        Ok(config)
    }

    /// The configured provider, or [`DisabledLlm`] when none is set.
    pub fn build_llm(&self) -> Arc<dyn StructuredLlm> {
        match UnifiedClient::from_env() {
            Ok(client) => {
                tracing::info!(model = %client.model_name(), "model provider configured");
                Arc::new(client)
            }
            Err(err) => {
                tracing::warn!(error = %err, "semantic checks and drafting will use fallbacks");
                Arc::new(DisabledLlm)
            }
        }
    }

    pub fn open(&self) -> anyhow::Result<Lab> {
        self.open_with_llm(self.build_llm())
    }

    /// Open every component around an explicit model.
    pub fn open_with_llm(&self, llm: Arc<dyn StructuredLlm>) -> anyhow::Result<Lab> {
        let caches = self.storage.open_caches();
        let embedder = build_embedder(
            self.embeddings,
            &self.embed_model,
            caches.partition(CachePartition::Embeddings),
        )?;
        let index = ChunkIndex::load(&self.index_path, embedder)?
            .with_cache(caches.partition(CachePartition::Retrieval));
        let pages = Arc::new(self.storage.page_store());
        let resolver = SpanContextResolver::new(pages.clone()).with_window(self.context_window);
        let validator = Arc::new(MultilevelValidator::new(
            resolver,
            Arc::clone(&llm),
            caches.partition(CachePartition::Validation),
        ));
        tracing::debug!(
            index = %self.index_path.display(),
            chunks = index.len(),
            "lab opened"
        );

        Ok(Lab {
            config: self.clone(),
            caches,
            pages,
            artifacts: self.storage.artifacts(),
            trace: self.storage.trace_log(),
            index: Arc::new(index),
            llm,
            validator,
        })
    }
}

/// Opened runtime shared by the CLI commands.
pub struct Lab {
    pub config: LabConfig,
    pub caches: CacheSet,
    pub pages: Arc<PageTextStore>,
    pub artifacts: ArtifactStore,
    pub trace: TraceLog,
    pub index: Arc<ChunkIndex>,
    pub llm: Arc<dyn StructuredLlm>,
    pub validator: Arc<MultilevelValidator>,
}

impl Lab {
    pub fn researcher(&self) -> Researcher {
        Researcher::new(self.index.clone(), Arc::clone(&self.llm))
            .with_artifacts(self.artifacts.clone())
    }

    pub fn reviewer(&self) -> ClaimReviewer {
        ClaimReviewer::new(Arc::clone(&self.validator)).with_artifacts(self.artifacts.clone())
    }

    pub fn red_team(&self) -> RedTeam {
        RedTeam::new(self.index.clone(), Arc::clone(&self.validator))
            .with_artifacts(self.artifacts.clone())
    }

    pub fn synthesizer(&self) -> Synthesizer {
        Synthesizer::new(Arc::clone(&self.llm)).with_artifacts(self.artifacts.clone())
    }

    pub fn action_planner(&self) -> ActionPlanner {
        ActionPlanner::new(Arc::clone(&self.llm)).with_artifacts(self.artifacts.clone())
    }

    pub fn pipeline(&self) -> InsightPipeline {
        InsightPipeline::new(self.index.clone(), Arc::clone(&self.llm), Arc::clone(&self.validator))
            .with_artifacts(self.artifacts.clone())
            .with_trace(self.trace.clone())
    }

    /// Run the pipeline in a new workspace under `runs_dir`.
    ///
    /// Documents under `staged` (a file or a directory) are copied into the
    /// run's inputs and ingested by the first stage. The run's index starts
    /// from a snapshot of the lab index and is saved in the workspace; the
    /// lab index itself is left untouched.
    pub async fn run_in_workspace(
        &self,
        topic: &str,
        staged: Option<&Path>,
    ) -> anyhow::Result<(RunWorkspace, RunOutput)> {
        let workspace = RunWorkspace::create(&self.config.runs_dir, &self.config.storage)?;
        match staged {
            Some(path) if path.is_file() => {
                workspace.stage_file(path)?;
            }
            Some(path) => {
                let staged = workspace.stage_dir(path)?;
                tracing::info!(run_id = %workspace.run_id, files = staged.len(), "documents staged");
            }
            None => {}
        }

        let index = Arc::new(self.index.snapshot());
        let ingestion = IngestionTarget::new(&workspace.input_dir, self.pages.clone(), index.clone())
            .persist_to(&workspace.index_path);
        let output = InsightPipeline::new(index, Arc::clone(&self.llm), Arc::clone(&self.validator))
            .with_artifacts(workspace.artifacts())
            .with_trace(workspace.trace())
            .with_run_id(workspace.run_id)
            .with_ingestion(ingestion)
            .run_with_output(topic)
            .await?;
        Ok((workspace, output))
    }

    pub fn save_index(&self) -> anyhow::Result<()> {
        self.index.save(&self.config.index_path)
    }

    /// Flush the cache partitions.
    pub fn flush(&self) -> anyhow::Result<()> {
        self.caches.flush()
    }
}
