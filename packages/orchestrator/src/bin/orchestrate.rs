//! Operator CLI for the orchestration engine
//!
//! Works against the SQLite database used by `SqliteStore`.
//! Every command prints one JSON document to stdout; logs go to stderr.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orchestrator::{
    insert_links, CheckpointManager, DuplicateCheck, EngineConfig, JobId, LinkCandidate, LinkInput,
    Orchestrator, SqliteStore, WorkerRegistry,
};

#[derive(Parser)]
#[command(name = "orchestrate")]
#[command(about = "Inspect and maintain generation job state")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a job's checkpointed state
    Inspect { job_id: JobId },

    /// Delete a job's checkpoint
    Clear { job_id: JobId },

    /// Delete checkpoints older than the retention period
    Sweep {
        /// Override CHECKPOINT_RETENTION_DAYS
        #[arg(long)]
        days: Option<i64>,
    },

    /// Ask the duplicate guard about a submission
    CheckDuplicate {
        #[arg(long)]
        scope: String,
        #[arg(long)]
        subject: String,
    },

    /// Run the link insertion engine over a markup file
    Link {
        /// HTML file to enrich
        #[arg(long)]
        markup: PathBuf,
        /// JSON file with `internal`, `external` and `primary_subject`
        #[arg(long)]
        candidates: PathBuf,
    },
}

/// Settings loaded from the environment
#[derive(Debug, Clone)]
struct Config {
    database_path: PathBuf,
    engine: EngineConfig,
}

impl Config {
    fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let mut engine = match env::var("ORCHESTRATOR_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read ORCHESTRATOR_CONFIG ({path})"))?;
                serde_json::from_str(&raw).context("ORCHESTRATOR_CONFIG is not a valid engine config")?
            }
            Err(_) => EngineConfig::default(),
        };

        if let Ok(days) = env::var("DEDUP_WINDOW_DAYS") {
            engine.guard.window_days = days
                .parse()
                .context("DEDUP_WINDOW_DAYS must be a whole number of days")?;
        }
        if let Ok(days) = env::var("CHECKPOINT_RETENTION_DAYS") {
            engine.checkpoint_retention_days = days
                .parse()
                .context("CHECKPOINT_RETENTION_DAYS must be a whole number of days")?;
        }

        Ok(Self {
            database_path: env::var("ORCHESTRATOR_DB")
                .unwrap_or_else(|_| ".orchestrator/orchestrator.db".to_string())
                .into(),
            engine,
        })
    }
}

#[derive(Deserialize)]
struct CandidateFile {
    #[serde(default)]
    internal: Vec<LinkCandidate>,
    #[serde(default)]
    external: Vec<LinkCandidate>,
    #[serde(default)]
    primary_subject: String,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum DuplicateReport {
    NoDuplicate,
    Completed { locator: String, job_id: JobId },
    InFlight { locator: String, job_id: JobId },
}

fn output<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,orchestrator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(true))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Inspect { job_id } => {
            let engine = Orchestrator::new(open_store(&config).await?, WorkerRegistry::new(), config.engine);
            let state = engine
                .inspect(job_id)
                .await
                .with_context(|| format!("failed to load checkpoint for {job_id}"))?;
            match state {
                Some(state) => output(&state),
                None => anyhow::bail!("no usable checkpoint for job {job_id}"),
            }
        }
        Commands::Clear { job_id } => {
            let removed = CheckpointManager::new(job_id, open_store(&config).await?).clear().await;
            output(&serde_json::json!({ "job_id": job_id, "removed": removed }))
        }
        Commands::Sweep { days } => {
            let store = open_store(&config).await?;
            let mut engine_config = config.engine;
            if let Some(days) = days {
                engine_config.checkpoint_retention_days = days;
            }
            let retention_days = engine_config.checkpoint_retention_days;
            let engine = Orchestrator::new(store, WorkerRegistry::new(), engine_config);
            let removed = engine.sweep_checkpoints().await.context("checkpoint sweep failed")?;
            tracing::info!(removed, retention_days, "checkpoint sweep finished");
            output(&serde_json::json!({ "removed": removed, "retention_days": retention_days }))
        }
        Commands::CheckDuplicate { scope, subject } => {
            let engine = Orchestrator::new(open_store(&config).await?, WorkerRegistry::new(), config.engine);
            let report = match engine.check_duplicate(&scope, &subject, None).await {
                DuplicateCheck::NoDuplicate => DuplicateReport::NoDuplicate,
                DuplicateCheck::Completed { locator, work } => DuplicateReport::Completed {
                    locator,
                    job_id: work.job_id,
                },
                DuplicateCheck::InFlight { locator, job_id } => {
                    DuplicateReport::InFlight { locator, job_id }
                }
            };
            output(&report)
        }
        Commands::Link { markup, candidates } => cmd_link(&config, &markup, &candidates).await,
    }
}

async fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.database_path)
        .await
        .with_context(|| format!("failed to open database {}", config.database_path.display()))?;
    Ok(Arc::new(store))
}

async fn cmd_link(config: &Config, markup: &Path, candidates: &Path) -> Result<()> {
    let html = tokio::fs::read_to_string(markup)
        .await
        .with_context(|| format!("failed to read {}", markup.display()))?;
    let raw = tokio::fs::read_to_string(candidates)
        .await
        .with_context(|| format!("failed to read {}", candidates.display()))?;
    let file: CandidateFile =
        serde_json::from_str(&raw).context("candidates file is not valid JSON")?;

    let result = insert_links(
        &LinkInput {
            markup: &html,
            internal: &file.internal,
            external: &file.external,
            primary_subject: &file.primary_subject,
        },
        &config.engine.links,
    );
    output(&result)
}
