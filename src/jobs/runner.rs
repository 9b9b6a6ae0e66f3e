//! Job worker and scheduler loop
//!
//! The worker drains the queue one job at a time, runs the pipeline under
//! a whole-run timeout and applies the queue-level retry policy. The
//! scheduler loop ticks on an interval, asks the schedule evaluator which
//! pipelines are due and enqueues one job each.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ImportJob, JobPriority, JobQueue};
use crate::config::Config;
use crate::errors::{EngineError, EngineResult, ExecutionError, PipelineError};
use crate::execution::ExecutionService;
use crate::models::{Pipeline, Stage, TriggeredBy};
use crate::pipeline::Orchestrator;
use crate::scheduling::Scheduler;
use crate::storage::PipelineStore;

pub struct ImportRunner {
    queue: Arc<JobQueue>,
    orchestrator: Arc<Orchestrator>,
    executions: Arc<ExecutionService>,
    pipelines: Arc<dyn PipelineStore>,
    scheduler: Arc<Scheduler>,
    config: Config,
}

impl ImportRunner {
    pub fn new(
        queue: Arc<JobQueue>,
        orchestrator: Arc<Orchestrator>,
        executions: Arc<ExecutionService>,
        pipelines: Arc<dyn PipelineStore>,
        scheduler: Arc<Scheduler>,
        config: Config,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            executions,
            pipelines,
            scheduler,
            config,
        }
    }

    /// Drain the queue until cancelled
    pub async fn run_worker(&self, cancel: CancellationToken) {
        info!("job worker started");
        while let Some(job) = self.queue.next(&cancel).await {
            self.process_job(&job, &cancel).await;
        }
        info!("job worker stopped");
    }

    /// Tick and enqueue due pipelines until cancelled
    pub async fn run_scheduler(&self, cancel: CancellationToken) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.scheduling.tick_seconds.max(1)));
        info!(
            tick_seconds = self.config.scheduling.tick_seconds,
            "scheduler loop started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let now = Utc::now();
            match self.scheduler.due_pipelines(now).await {
                Ok(due) => {
                    for pipeline in due {
                        let job = ImportJob::new(
                            pipeline.id,
                            priority_of(&pipeline),
                            TriggeredBy::Scheduler,
                        );
                        debug!(pipeline_id = pipeline.id, queue = %self.lane_name(job.priority), "due");
                        self.queue.enqueue(job).await;
                    }
                    if !self.queue.is_empty().await {
                        let depth = self.queue.len().await;
                        debug!(depth, "jobs waiting after sweep");
                    }
                }
                Err(e) => error!(error = %e, "schedule sweep failed"),
            }
        }
        info!("scheduler loop stopped");
    }

    fn lane_name(&self, priority: JobPriority) -> &str {
        match priority {
            JobPriority::Low => &self.config.jobs.low_queue,
            JobPriority::Normal => &self.config.jobs.default_queue,
            JobPriority::High => &self.config.jobs.high_queue,
        }
    }

    /// Run one job under the retry policy. Retry applies to the whole
    /// run; a rejection because another execution is running is final.
    pub async fn process_job(&self, job: &ImportJob, cancel: &CancellationToken) {
        let retry = self.config.jobs.retry;
        let mut distinct_errors: HashSet<String> = HashSet::new();

        for attempt in 1..=retry.max_attempts.max(1) {
            match self.run_once(job, cancel).await {
                Ok(()) => return,
                Err(EngineError::Execution(ExecutionError::AlreadyRunning { .. })) => {
                    debug!(pipeline_id = job.pipeline_id, "another execution is running, dropping job");
                    return;
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!(
                        pipeline_id = job.pipeline_id,
                        attempt,
                        error = %message,
                        "run attempt failed"
                    );
                    distinct_errors.insert(message);
                    if distinct_errors.len() >= retry.max_distinct_errors.max(1) as usize {
                        error!(
                            pipeline_id = job.pipeline_id,
                            distinct = distinct_errors.len(),
                            "too many distinct errors, giving up"
                        );
                        return;
                    }
                }
            }
            if attempt < retry.max_attempts.max(1) {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(retry.backoff_seconds)) => {}
                }
            }
        }
        error!(
            pipeline_id = job.pipeline_id,
            attempts = retry.max_attempts,
            "run failed after all attempts"
        );
    }

    async fn run_once(&self, job: &ImportJob, cancel: &CancellationToken) -> EngineResult<()> {
        let pipeline = self
            .pipelines
            .find(job.pipeline_id)
            .await?
            .ok_or(ExecutionError::PipelineNotFound {
                pipeline_id: job.pipeline_id,
            })?;

        let (timeout, memory_limit_mb) = self.budgets(&pipeline);
        let execution = self
            .executions
            .start(pipeline.id, job.triggered_by)
            .await?;

        let run = self
            .orchestrator
            .execute(pipeline.clone(), Stage::Save, Some(execution.id), cancel);
        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(report)) => {
                if report.memory_peak.resident_bytes > memory_limit_mb * 1024 * 1024 {
                    warn!(
                        pipeline_id = pipeline.id,
                        peak_mb = report.memory_peak.resident_mb(),
                        limit_mb = memory_limit_mb,
                        "run exceeded its memory budget"
                    );
                }
                self.executions
                    .mark_completed(execution.id, report.counts())
                    .await?;
                self.scheduler.mark_executed(&pipeline, Utc::now()).await?;
                Ok(())
            }
            Ok(Err(e)) => {
                self.executions
                    .mark_failed(execution.id, failing_stage(&e), e.to_string())
                    .await?;
                Err(e)
            }
            Err(_) => {
                let e: EngineError = PipelineError::TimedOut {
                    seconds: timeout.as_secs(),
                }
                .into();
                self.executions
                    .mark_failed(execution.id, None, e.to_string())
                    .await?;
                Err(e)
            }
        }
    }

    /// Timeout and memory class: pipelines flagged as large payloads get
    /// the larger budgets
    fn budgets(&self, pipeline: &Pipeline) -> (Duration, u64) {
        let jobs = &self.config.jobs;
        let large = pipeline
            .settings
            .get("large_file")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if large {
            (
                Duration::from_secs(jobs.large_timeout_seconds),
                jobs.large_memory_limit_mb,
            )
        } else {
            (Duration::from_secs(jobs.timeout_seconds), jobs.memory_limit_mb)
        }
    }
}

fn priority_of(pipeline: &Pipeline) -> JobPriority {
    match pipeline.settings.get("priority").and_then(|v| v.as_str()) {
        Some("high") => JobPriority::High,
        Some("low") => JobPriority::Low,
        _ => JobPriority::Normal,
    }
}

fn failing_stage(error: &EngineError) -> Option<Stage> {
    match error {
        EngineError::Pipeline(PipelineError::StageFailed { stage, .. })
        | EngineError::Pipeline(PipelineError::Cancelled { stage })
        | EngineError::Pipeline(PipelineError::MissingStageInput { stage, .. }) => Some(*stage),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pipeline_with_settings(settings: serde_json::Value) -> Pipeline {
        serde_json::from_value(json!({
            "id": 1,
            "organization_id": 1,
            "name": "p",
            "source": {"url": "https://example.com/feed.csv"},
            "reader": {"reader_type": "csv"},
            "schedule": {
                "frequency": {"kind": "daily"},
                "start_time": "06:00:00",
                "is_active": true
            },
            "settings": settings
        }))
        .unwrap()
    }

    #[test]
    fn priority_comes_from_settings() {
        assert_eq!(
            priority_of(&pipeline_with_settings(json!({"priority": "high"}))),
            JobPriority::High
        );
        assert_eq!(
            priority_of(&pipeline_with_settings(json!({}))),
            JobPriority::Normal
        );
    }

    #[test]
    fn failing_stage_is_extracted_from_stage_failures() {
        let inner: EngineError = crate::errors::DownloaderError::file_not_found("u").into();
        let e: EngineError = PipelineError::StageFailed {
            stage: Stage::Download,
            source: Box::new(inner),
        }
        .into();
        assert_eq!(failing_stage(&e), Some(Stage::Download));
        assert_eq!(failing_stage(&EngineError::internal("x")), None);
    }
}
