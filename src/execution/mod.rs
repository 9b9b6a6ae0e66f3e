//! Execution lifecycle tracking
//!
//! Enforces the single legal transition sequence
//! pending -> running -> completed | failed, and the at-most-one-running-
//! execution invariant per pipeline. The running check and the transition
//! are serialized behind one lock so concurrent start requests cannot both
//! observe "nothing running".

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::errors::{EngineResult, ExecutionError};
use crate::models::{Execution, ExecutionCounts, ExecutionStatus, Stage, TriggeredBy};
use crate::storage::ExecutionStore;

pub struct ExecutionService {
    store: Arc<dyn ExecutionStore>,
    start_lock: Mutex<()>,
}

impl ExecutionService {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            store,
            start_lock: Mutex::new(()),
        }
    }

    /// A fresh execution always starts pending
    pub async fn create(
        &self,
        pipeline_id: i64,
        triggered_by: TriggeredBy,
    ) -> EngineResult<Execution> {
        self.store
            .create(Execution::new(pipeline_id, triggered_by))
            .await
    }

    /// Create and immediately mark running, as one guarded step
    pub async fn start(
        &self,
        pipeline_id: i64,
        triggered_by: TriggeredBy,
    ) -> EngineResult<Execution> {
        let _guard = self.start_lock.lock().await;
        self.reject_if_running(pipeline_id).await?;
        let mut execution = Execution::new(pipeline_id, triggered_by);
        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(Utc::now());
        let execution = self.store.create(execution).await?;
        info!(pipeline_id, execution_id = %execution.id, "execution started");
        Ok(execution)
    }

    pub async fn mark_running(&self, execution_id: Uuid) -> EngineResult<Execution> {
        let _guard = self.start_lock.lock().await;
        let mut execution = self.find(execution_id).await?;
        if execution.status != ExecutionStatus::Pending {
            return Err(invalid_transition(execution.status, ExecutionStatus::Running));
        }
        self.reject_if_running(execution.pipeline_id).await?;
        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(Utc::now());
        self.store.update(execution).await
    }

    pub async fn mark_completed(
        &self,
        execution_id: Uuid,
        counts: ExecutionCounts,
    ) -> EngineResult<Execution> {
        let mut execution = self.find(execution_id).await?;
        if execution.status != ExecutionStatus::Running {
            return Err(invalid_transition(execution.status, ExecutionStatus::Completed));
        }
        execution.status = ExecutionStatus::Completed;
        execution.finished_at = Some(Utc::now());
        execution.counts = counts;
        let execution = self.store.update(execution).await?;
        info!(
            execution_id = %execution.id,
            saved = execution.counts.saved,
            "execution completed"
        );
        Ok(execution)
    }

    /// Failing is legal from running and, for runs rejected before their
    /// first stage, from pending
    pub async fn mark_failed(
        &self,
        execution_id: Uuid,
        stage: Option<Stage>,
        message: impl Into<String>,
    ) -> EngineResult<Execution> {
        let mut execution = self.find(execution_id).await?;
        if execution.status.is_terminal() {
            return Err(invalid_transition(execution.status, ExecutionStatus::Failed));
        }
        execution.status = ExecutionStatus::Failed;
        execution.finished_at = Some(Utc::now());
        execution.error_stage = stage;
        execution.error_message = Some(message.into());
        let execution = self.store.update(execution).await?;
        info!(
            execution_id = %execution.id,
            stage = execution.error_stage.map(|s| s.as_str()).unwrap_or("-"),
            "execution failed"
        );
        Ok(execution)
    }

    pub async fn find(&self, execution_id: Uuid) -> EngineResult<Execution> {
        self.store
            .find(execution_id)
            .await?
            .ok_or_else(|| ExecutionError::NotFound { execution_id }.into())
    }

    pub async fn latest_running_for(&self, pipeline_id: i64) -> EngineResult<Option<Execution>> {
        self.store.latest_running_for(pipeline_id).await
    }

    async fn reject_if_running(&self, pipeline_id: i64) -> EngineResult<()> {
        if let Some(running) = self.store.latest_running_for(pipeline_id).await? {
            return Err(ExecutionError::AlreadyRunning {
                pipeline_id,
                execution_id: running.id,
            }
            .into());
        }
        Ok(())
    }
}

fn invalid_transition(from: ExecutionStatus, to: ExecutionStatus) -> crate::errors::EngineError {
    ExecutionError::InvalidTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn service() -> ExecutionService {
        ExecutionService::new(MemoryStorage::shared())
    }

    #[tokio::test]
    async fn legal_sequence_reaches_completed() {
        let service = service();
        let execution = service.create(1, TriggeredBy::Manual).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Pending);

        let execution = service.mark_running(execution.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert!(execution.started_at.is_some());

        let counts = ExecutionCounts {
            read: 10,
            filtered: 8,
            mapped: 8,
            saved: 8,
        };
        let execution = service.mark_completed(execution.id, counts).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.counts.saved, 8);
    }

    #[tokio::test]
    async fn second_running_execution_is_rejected() {
        let service = service();
        let first = service.start(1, TriggeredBy::Scheduler).await.unwrap();

        let err = service.start(1, TriggeredBy::Manual).await.unwrap_err();
        assert!(err.to_string().contains(&first.id.to_string()));

        service
            .mark_completed(first.id, ExecutionCounts::default())
            .await
            .unwrap();
        service.start(1, TriggeredBy::Manual).await.unwrap();
    }

    #[tokio::test]
    async fn terminal_executions_are_immutable() {
        let service = service();
        let execution = service.start(1, TriggeredBy::Manual).await.unwrap();
        service
            .mark_failed(execution.id, Some(Stage::Download), "connection refused")
            .await
            .unwrap();

        assert!(service.mark_running(execution.id).await.is_err());
        assert!(service
            .mark_completed(execution.id, ExecutionCounts::default())
            .await
            .is_err());
        assert!(service
            .mark_failed(execution.id, None, "again")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn skipping_running_is_an_invalid_transition() {
        let service = service();
        let execution = service.create(1, TriggeredBy::Manual).await.unwrap();
        let err = service
            .mark_completed(execution.id, ExecutionCounts::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("pending -> completed"));
    }

    #[tokio::test]
    async fn concurrent_starts_yield_exactly_one_running() {
        let service = Arc::new(service());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.start(1, TriggeredBy::Manual).await.is_ok()
            }));
        }
        let mut started = 0;
        for handle in handles {
            if handle.await.unwrap() {
                started += 1;
            }
        }
        assert_eq!(started, 1);
    }
}
