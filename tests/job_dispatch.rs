//! Queued runs through the job runner: execution records, schedule
//! bookkeeping and the single-running-execution rejection.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use feedpipe::config::Config;
use feedpipe::downloader::{DownloadRequest, DownloadResult, Downloader, DownloaderFactory};
use feedpipe::errors::DownloaderError;
use feedpipe::execution::ExecutionService;
use feedpipe::filter::{registry::OperatorRegistry, FilterEngine};
use feedpipe::jobs::{ImportJob, ImportRunner, JobPriority, JobQueue};
use feedpipe::mapper::MapperEngine;
use feedpipe::models::{ExecutionStatus, OptionBag, Pipeline, TriggeredBy};
use feedpipe::options::OptionDefinitions;
use feedpipe::pipeline::Orchestrator;
use feedpipe::prepare::images::ImagePreparer;
use feedpipe::prepare::PrepareEngine;
use feedpipe::reader::ReaderFactory;
use feedpipe::scheduling::Scheduler;
use feedpipe::storage::{ExecutionStore, MemoryStorage, PipelineStore, ResultStore};

struct StaticDownloader;

#[async_trait]
impl Downloader for StaticDownloader {
    fn scheme(&self) -> &'static str {
        "mem"
    }

    fn option_definitions(&self) -> OptionDefinitions {
        OptionDefinitions::new("StaticDownloader")
    }

    async fn fetch(
        &self,
        _request: &DownloadRequest,
        _options: &OptionBag,
    ) -> Result<DownloadResult, DownloaderError> {
        Ok(DownloadResult {
            content: b"id,status\n1,active\n2,closed\n".to_vec(),
            filename: None,
            content_type: None,
            status: Some(200),
        })
    }
}

fn test_pipeline() -> Pipeline {
    serde_json::from_value(json!({
        "id": 7,
        "organization_id": 1,
        "name": "nightly",
        "source": {"url": "mem://feed.csv"},
        "reader": {"reader_type": "csv"},
        "filters": [{"key": "status", "operator": "equals", "value": "active"}],
        "schedule": {
            "frequency": {"kind": "daily"},
            "start_time": "06:00:00",
            "is_active": true
        }
    }))
    .unwrap()
}

struct Harness {
    storage: Arc<MemoryStorage>,
    executions: Arc<ExecutionService>,
    runner: ImportRunner,
}

fn harness() -> Harness {
    let storage = MemoryStorage::shared();
    let mut downloaders = DownloaderFactory::new();
    downloaders.register(Arc::new(StaticDownloader));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(downloaders),
        Arc::new(ReaderFactory::with_builtins()),
        Arc::new(FilterEngine::new(Arc::new(OperatorRegistry::with_builtins()))),
        Arc::new(MapperEngine::default()),
        Arc::new(ImagePreparer::new("media", 2)),
        Arc::new(PrepareEngine::default()),
        storage.clone(),
    ));
    let executions = Arc::new(ExecutionService::new(storage.clone()));
    let mut config = Config::default();
    config.jobs.retry.backoff_seconds = 0;
    let scheduler = Arc::new(Scheduler::new(storage.clone(), config.scheduling.clone()));
    let runner = ImportRunner::new(
        Arc::new(JobQueue::new()),
        orchestrator,
        executions.clone(),
        storage.clone(),
        scheduler,
        config,
    );
    Harness {
        storage,
        executions,
        runner,
    }
}

#[tokio::test]
async fn a_processed_job_completes_and_reschedules() {
    let h = harness();
    PipelineStore::create(h.storage.as_ref(), test_pipeline()).await.unwrap();

    let job = ImportJob::new(7, JobPriority::Normal, TriggeredBy::Scheduler);
    h.runner.process_job(&job, &CancellationToken::new()).await;

    let executions = h.storage.for_pipeline(7).await.unwrap();
    assert_eq!(executions.len(), 1);
    let execution = &executions[0];
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.counts.read, 2);
    assert_eq!(execution.counts.filtered, 1);
    assert_eq!(execution.counts.saved, 1);

    let saved = h
        .storage
        .find_for_execution(execution.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.rows.len(), 1);
    assert_eq!(saved.rows[0].get("status"), Some(&json!("active")));

    let stored = PipelineStore::find(h.storage.as_ref(), 7).await.unwrap().unwrap();
    assert!(stored.schedule.last_executed_at.is_some());
    assert!(stored.schedule.next_execution_at.is_some());
}

#[tokio::test]
async fn a_running_execution_drops_the_incoming_job() {
    let h = harness();
    PipelineStore::create(h.storage.as_ref(), test_pipeline()).await.unwrap();
    let running = h.executions.start(7, TriggeredBy::Manual).await.unwrap();

    let job = ImportJob::new(7, JobPriority::High, TriggeredBy::Scheduler);
    h.runner.process_job(&job, &CancellationToken::new()).await;

    // only the manual execution exists and it is still running
    let executions = h.storage.for_pipeline(7).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].id, running.id);
    assert_eq!(executions[0].status, ExecutionStatus::Running);
}

#[tokio::test]
async fn a_missing_pipeline_fails_without_creating_executions() {
    let h = harness();
    let job = ImportJob::new(99, JobPriority::Normal, TriggeredBy::Manual);
    h.runner.process_job(&job, &CancellationToken::new()).await;
    assert!(h.storage.for_pipeline(99).await.unwrap().is_empty());
}
