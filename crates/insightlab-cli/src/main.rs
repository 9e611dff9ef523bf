//! Insight Lab CLI
//!
//! Command-line interface for:
//! - Ingesting documents into the page cache and chunk index
//! - Drafting, reviewing and red-teaming claims for a topic
//! - Synthesizing insights and follow-up actions
//! - Checking a single citation against its source

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use insightlab_review::{
    Claim, EvidenceSpan, Lab, LabConfig, Priority, RunReport, StageStatus, Verdict,
};
use insightlab_storage::{StorageConfig, QUOTE_MAX_CHARS};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "insightlab")]
#[command(author, version, about = "Insight Lab: evidence-grounded research claims")]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Root for caches and the chunk index (overrides INSIGHTLAB_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Directory for JSON artifacts (overrides ARTIFACTS_DIR)
    #[arg(long, global = true)]
    artifacts_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load documents, cache their page text and index their chunks
    Ingest {
        /// Directory of .txt / .md / .pdf files
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Draft claims for a topic from the indexed corpus
    Research {
        #[arg(short, long)]
        topic: String,
        /// Passages retrieved for drafting
        #[arg(short, long, default_value_t = 8)]
        k: usize,
        #[arg(long, default_value_t = 6)]
        max_claims: usize,
    },

    /// Review drafted claims against their citations
    Review {
        /// Claims JSON (defaults to the drafted claims artifact)
        #[arg(long)]
        claims: Option<PathBuf>,
    },

    /// Search for counter-evidence against supported claims
    RedTeam {
        /// Topic label for findings (defaults to the claims' topic)
        #[arg(short, long)]
        topic: Option<String>,
    },

    /// Cluster reviewed claims into insights and plan actions
    Synthesize {
        #[arg(short, long)]
        topic: String,
    },

    /// Run the full pipeline in a new run workspace:
    /// ingestion → research → review → red team → synthesis
    Run {
        #[arg(short, long)]
        topic: String,
        /// Document or directory staged into the run and ingested first
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Validate one claim against one cited span
    Assess {
        #[arg(long)]
        claim: String,
        #[arg(long)]
        source: String,
        #[arg(long)]
        page: i64,
        #[arg(long)]
        quote: String,
        #[arg(long)]
        start: Option<i64>,
        #[arg(long)]
        end: Option<i64>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn lab_config(cli: &Cli) -> Result<LabConfig> {
    let config = LabConfig::from_env()?;
    if cli.data_dir.is_none() && cli.artifacts_dir.is_none() {
        return Ok(config);
    }
    let data_dir = match &cli.data_dir {
        Some(dir) => dir.clone(),
        None => config
            .index_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".data")),
    };
    let artifacts_dir = cli
        .artifacts_dir
        .clone()
        .unwrap_or_else(|| config.storage.artifacts_dir.clone());
    let mut overridden = LabConfig::with_storage(StorageConfig::rooted(data_dir, artifacts_dir));
    overridden.embeddings = config.embeddings;
    overridden.embed_model = config.embed_model;
    if std::env::var_os("RUNS_DIR").is_some() {
        overridden.runs_dir = config.runs_dir;
    }
    Ok(overridden)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let lab = lab_config(&cli)?.open()?;
    let result = dispatch(&lab, cli.command).await;
    if let Err(err) = lab.flush() {
        tracing::warn!(error = %err, "failed to flush caches");
    }
    result
}

async fn dispatch(lab: &Lab, command: Commands) -> Result<()> {
    match command {
        Commands::Ingest { input } => cmd_ingest(lab, &input).await,
        Commands::Research {
            topic,
            k,
            max_claims,
        } => cmd_research(lab, &topic, k, max_claims).await,
        Commands::Review { claims } => cmd_review(lab, claims.as_ref()).await,
        Commands::RedTeam { topic } => cmd_red_team(lab, topic).await,
        Commands::Synthesize { topic } => cmd_synthesize(lab, &topic).await,
        Commands::Run { topic, input } => cmd_run(lab, &topic, input.as_deref()).await,
        Commands::Assess {
            claim,
            source,
            page,
            quote,
            start,
            end,
        } => {
            let start = start.unwrap_or(0);
            let end = end.unwrap_or(start + quote.chars().count() as i64);
            let span = EvidenceSpan {
                source_id: source,
                page,
                char_start: start,
                char_end: end,
                quote: quote.chars().take(QUOTE_MAX_CHARS).collect(),
                chunk_id: None,
                chunk_text: None,
            };
            cmd_assess(lab, &claim, &span).await
        }
    }
}

// ============================================================================
// Output helpers
// ============================================================================

fn verdict_label(verdict: Verdict) -> colored::ColoredString {
    match verdict {
        Verdict::Supported => verdict.as_str().green().bold(),
        Verdict::Weak => verdict.as_str().yellow().bold(),
        Verdict::Contradicted => verdict.as_str().red().bold(),
    }
}

fn priority_label(priority: Priority) -> colored::ColoredString {
    match priority {
        Priority::High => "high".red(),
        Priority::Medium => "medium".yellow(),
        Priority::Low => "low".normal(),
    }
}

fn wrote(path: &std::path::Path) {
    eprintln!("{} {}", "wrote".green().bold(), path.display().to_string().bold());
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_ingest(lab: &Lab, input: &PathBuf) -> Result<()> {
    println!("{} {}", "Ingesting".green().bold(), input.display());

    let chunks = insightlab_ingest_docs::ingest_dir(input, &lab.pages)
        .with_context(|| format!("ingesting {}", input.display()))?;
    println!("  {} {} chunks", "→".yellow(), chunks.len());

    let added = lab.index.add_chunks(&chunks).await?;
    lab.save_index()?;
    println!(
        "  {} {} chunks indexed ({} total)",
        "→".yellow(),
        added,
        lab.index.len()
    );
    wrote(&lab.config.index_path);
    Ok(())
}

async fn cmd_research(lab: &Lab, topic: &str, k: usize, max_claims: usize) -> Result<()> {
    println!("{} {}", "Researching".green().bold(), topic);
    let claims = lab
        .researcher()
        .with_limits(k, max_claims)
        .draft(topic)
        .await?;

    for claim in &claims {
        println!("  {} {}", claim.id.bold(), claim.text);
        for span in &claim.citations {
            println!("      {} {}", "↳".dimmed(), span.location().dimmed());
        }
    }
    wrote(&lab.artifacts.path_of(insightlab_storage::artifacts::CLAIMS_FILE));
    Ok(())
}

async fn cmd_review(lab: &Lab, claims_path: Option<&PathBuf>) -> Result<()> {
    let claims: Vec<Claim> = match claims_path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => lab.artifacts.load_claims()?,
    };
    if claims.is_empty() {
        println!("{} no claims to review; run `insightlab research` first", "info:".yellow().bold());
        return Ok(());
    }

    println!("{} {} claims", "Reviewing".green().bold(), claims.len());
    let reviewed = lab.reviewer().review(&claims).await?;
    for claim in &reviewed {
        println!(
            "  {} {:<12} {}",
            claim.id().bold(),
            verdict_label(claim.verdict),
            claim.claim.text
        );
        println!("      {}", claim.reviewer_notes.dimmed());
    }
    wrote(&lab.artifacts.path_of(insightlab_storage::artifacts::REVIEWED_FILE));
    Ok(())
}

async fn cmd_red_team(lab: &Lab, topic: Option<String>) -> Result<()> {
    let reviewed = lab.artifacts.load_reviewed()?;
    let topic = topic
        .or_else(|| reviewed.first().map(|c| c.claim.topic.clone()))
        .unwrap_or_default();

    println!("{} {}", "Red-teaming".green().bold(), topic);
    let findings = lab.red_team().run(&topic, &reviewed).await?;
    if findings.is_empty() {
        println!("  {} no counter-evidence found", "→".yellow());
    }
    for finding in &findings {
        println!(
            "  {} {} {}",
            finding.id.bold(),
            verdict_label(finding.verdict),
            finding.summary
        );
        println!("      {}", finding.detail.dimmed());
    }
    wrote(&lab.artifacts.path_of(insightlab_storage::artifacts::CHALLENGES_FILE));
    Ok(())
}

async fn cmd_synthesize(lab: &Lab, topic: &str) -> Result<()> {
    let reviewed = lab.artifacts.load_reviewed()?;
    let findings = lab.artifacts.load_findings()?;

    println!("{} {}", "Synthesizing".green().bold(), topic);
    let insights = lab.synthesizer().synthesize(topic, &reviewed, &findings).await?;
    for insight in &insights {
        println!(
            "  {} [{:.2}] {}",
            insight.id.bold(),
            insight.confidence,
            insight.summary
        );
    }
    let actions = lab.action_planner().plan(topic, &reviewed, &insights).await?;
    for action in &actions {
        println!(
            "  {} ({}) {}",
            action.id.bold(),
            priority_label(action.priority),
            action.title
        );
    }
    wrote(&lab.artifacts.path_of(insightlab_storage::artifacts::REPORT_FILE));
    wrote(&lab.artifacts.path_of(insightlab_storage::artifacts::ACTIONS_FILE));
    Ok(())
}

fn print_report(report: &RunReport) {
    for stage in &report.stages {
        let status = match stage.status {
            StageStatus::Done => "done".green(),
            StageStatus::Failed => "failed".red(),
            StageStatus::Running => "running".yellow(),
            StageStatus::Pending => "pending".normal(),
        };
        let status = if stage.skipped { "skipped".dimmed() } else { status };
        println!("  {:<12} {:<8} {}", stage.stage.as_str(), status, stage.output_count);
        if let Some(error) = &stage.error {
            println!("      {}", error.red());
        }
    }
    let counts = &report.counts;
    println!(
        "  {} claims: {} supported, {} weak, {} contradicted",
        counts.claims, counts.supported, counts.weak, counts.contradicted
    );
    println!(
        "  {} findings, {} insights, {} actions",
        counts.findings, counts.insights, counts.actions
    );
}

async fn cmd_run(lab: &Lab, topic: &str, input: Option<&Path>) -> Result<()> {
    println!("{} {}", "Running pipeline for".green().bold(), topic);
    let (workspace, output) = lab.run_in_workspace(topic, input).await?;
    let report = &output.report;
    println!("  run {} {} {}", report.run_id.to_string().dimmed(), "→".yellow(), workspace.dir.display());
    print_report(report);
    for (source_id, filename) in &report.sources {
        println!("  {} {} {}", source_id.cyan(), "←".yellow(), filename);
    }
    if output.payload.is_some() {
        wrote(&workspace.artifacts().path_of(insightlab_storage::artifacts::PAYLOAD_FILE));
    }
    if !report.is_clean() {
        println!(
            "{} some stages degraded; see {}",
            "warning:".yellow().bold(),
            workspace.storage.trace_path.display()
        );
    }
    Ok(())
}

async fn cmd_assess(lab: &Lab, claim: &str, span: &EvidenceSpan) -> Result<()> {
    let result = lab.validator.validate(claim, span).await;
    println!(
        "{} {} ({}, confidence {:.2})",
        "Verdict:".bold(),
        verdict_label(result.verdict),
        result.level,
        result.confidence
    );
    println!("  {}", result.reason);
    Ok(())
}
