use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use feedpipe::config::Config;
use feedpipe::downloader::DownloaderFactory;
use feedpipe::execution::ExecutionService;
use feedpipe::filter::{registry::OperatorRegistry, FilterEngine};
use feedpipe::jobs::{ImportRunner, JobQueue};
use feedpipe::mapper::MapperEngine;
use feedpipe::models::{Pipeline, Stage};
use feedpipe::pipeline::Orchestrator;
use feedpipe::prepare::images::ImagePreparer;
use feedpipe::prepare::PrepareEngine;
use feedpipe::reader::ReaderFactory;
use feedpipe::scheduling::Scheduler;
use feedpipe::storage::{MemoryStorage, PipelineStore};

#[derive(Parser)]
#[command(name = "feedpipe", about = "Data-import pipeline engine", version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "feedpipe.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and job worker until interrupted
    Serve {
        /// Pipeline definition files (JSON) to load at startup
        #[arg(short, long)]
        pipeline: Vec<PathBuf>,
    },
    /// Execute one pipeline definition immediately
    Run {
        /// Pipeline definition file (JSON)
        pipeline: PathBuf,
        /// Stop after this stage (download, read, filter, map,
        /// images_prepare, prepare, save)
        #[arg(short, long)]
        to_stage: Option<String>,
    },
    /// Check a pipeline definition and report every problem
    Validate {
        /// Pipeline definition file (JSON)
        pipeline: PathBuf,
    },
    /// List available plugins
    Plugins,
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.level.clone()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_orchestrator(config: &Config, storage: Arc<MemoryStorage>) -> Orchestrator {
    Orchestrator::new(
        Arc::new(DownloaderFactory::with_builtins()),
        Arc::new(ReaderFactory::with_builtins()),
        Arc::new(FilterEngine::new(Arc::new(OperatorRegistry::with_builtins()))),
        Arc::new(MapperEngine::default()),
        Arc::new(ImagePreparer::new(
            config.images.media_dir.clone(),
            config.images.concurrency,
        )),
        Arc::new(PrepareEngine::default()),
        storage,
    )
}

fn load_pipeline(path: &PathBuf) -> anyhow::Result<Pipeline> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read pipeline file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("cannot parse pipeline file {}", path.display()))
}

fn parse_stage(name: &str) -> anyhow::Result<Stage> {
    Stage::ALL
        .into_iter()
        .find(|s| s.as_str() == name)
        .with_context(|| format!("unknown stage '{name}'"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    init_tracing(&config);

    match cli.command {
        Command::Serve { pipeline } => serve(config, pipeline).await,
        Command::Run { pipeline, to_stage } => run_once(config, &pipeline, to_stage).await,
        Command::Validate { pipeline } => validate(config, &pipeline),
        Command::Plugins => plugins(config).await,
    }
}

async fn serve(config: Config, pipeline_files: Vec<PathBuf>) -> anyhow::Result<()> {
    let storage = MemoryStorage::shared();
    for path in &pipeline_files {
        let pipeline = load_pipeline(path)?;
        info!(pipeline_id = pipeline.id, name = %pipeline.name, "pipeline loaded");
        storage.create(pipeline).await?;
    }

    let orchestrator = Arc::new(build_orchestrator(&config, storage.clone()));
    let executions = Arc::new(ExecutionService::new(storage.clone()));
    let scheduler = Arc::new(Scheduler::new(storage.clone(), config.scheduling.clone()));
    let queue = Arc::new(JobQueue::new());
    let runner = Arc::new(ImportRunner::new(
        queue,
        orchestrator,
        executions,
        storage,
        scheduler,
        config,
    ));

    let cancel = CancellationToken::new();
    let worker = {
        let runner = runner.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { runner.run_worker(cancel).await })
    };
    let scheduler_loop = {
        let runner = runner.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { runner.run_scheduler(cancel).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    cancel.cancel();
    let _ = tokio::join!(worker, scheduler_loop);
    Ok(())
}

async fn run_once(
    config: Config,
    path: &PathBuf,
    to_stage: Option<String>,
) -> anyhow::Result<()> {
    let pipeline = load_pipeline(path)?;
    let storage = MemoryStorage::shared();
    let orchestrator = build_orchestrator(&config, storage);

    let target = match to_stage {
        Some(name) => parse_stage(&name)?,
        None => Stage::Save,
    };
    let report = orchestrator.execute_to_stage(pipeline, target).await?;
    let counts = report.counts();
    println!(
        "completed to {} in {:?}: read={} filtered={} mapped={} saved={}",
        report.target_stage, report.elapsed, counts.read, counts.filtered, counts.mapped, counts.saved
    );
    if let Some(rows) = report.passable.current_rows() {
        println!("{} row(s) after {}", rows.len(), report.target_stage);
    }
    if report.passable.has_result(Stage::Save) {
        if let Some(execution_id) = report.passable.execution_id {
            println!("result stored under execution {execution_id}");
        }
    }
    Ok(())
}

fn validate(config: Config, path: &PathBuf) -> anyhow::Result<()> {
    let pipeline = load_pipeline(path)?;
    let orchestrator = build_orchestrator(&config, MemoryStorage::shared());
    let issues = orchestrator.validate_config(&pipeline);
    if issues.is_empty() {
        println!("configuration is valid");
        return Ok(());
    }
    for issue in &issues {
        println!("{issue}");
    }
    anyhow::bail!("{} configuration problem(s)", issues.len())
}

async fn plugins(config: Config) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(&config, MemoryStorage::shared());
    let catalog = orchestrator.plugin_catalog().await;
    println!("{}", serde_json::to_string_pretty(&catalog)?);
    Ok(())
}
