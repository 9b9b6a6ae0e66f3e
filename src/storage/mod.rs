//! Persistence contracts
//!
//! The engine only needs create/find/update over pipelines, executions and
//! results; the concrete store lives with the host application. The
//! in-memory implementation backs tests and single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::{EngineResult, ExecutionError};
use crate::models::{Execution, ExecutionStatus, ImportResult, Pipeline};

#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn create(&self, pipeline: Pipeline) -> EngineResult<Pipeline>;
    async fn find(&self, id: i64) -> EngineResult<Option<Pipeline>>;
    async fn update(&self, pipeline: Pipeline) -> EngineResult<Pipeline>;
    async fn all(&self) -> EngineResult<Vec<Pipeline>>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create(&self, execution: Execution) -> EngineResult<Execution>;
    async fn find(&self, id: Uuid) -> EngineResult<Option<Execution>>;
    async fn update(&self, execution: Execution) -> EngineResult<Execution>;
    /// The pipeline's current running execution, if any
    async fn latest_running_for(&self, pipeline_id: i64) -> EngineResult<Option<Execution>>;
    async fn for_pipeline(&self, pipeline_id: i64) -> EngineResult<Vec<Execution>>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// At most one result per execution; a second save replaces the first
    async fn save(&self, result: ImportResult) -> EngineResult<()>;
    async fn find_for_execution(&self, execution_id: Uuid) -> EngineResult<Option<ImportResult>>;
}

/// In-memory store implementing all three contracts
#[derive(Default)]
pub struct MemoryStorage {
    pipelines: RwLock<HashMap<i64, Pipeline>>,
    executions: RwLock<HashMap<Uuid, Execution>>,
    results: RwLock<HashMap<Uuid, ImportResult>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl PipelineStore for MemoryStorage {
    async fn create(&self, pipeline: Pipeline) -> EngineResult<Pipeline> {
        self.pipelines
            .write()
            .await
            .insert(pipeline.id, pipeline.clone());
        Ok(pipeline)
    }

    async fn find(&self, id: i64) -> EngineResult<Option<Pipeline>> {
        Ok(self.pipelines.read().await.get(&id).cloned())
    }

    async fn update(&self, pipeline: Pipeline) -> EngineResult<Pipeline> {
        let mut pipelines = self.pipelines.write().await;
        if !pipelines.contains_key(&pipeline.id) {
            return Err(ExecutionError::PipelineNotFound {
                pipeline_id: pipeline.id,
            }
            .into());
        }
        pipelines.insert(pipeline.id, pipeline.clone());
        Ok(pipeline)
    }

    async fn all(&self) -> EngineResult<Vec<Pipeline>> {
        let mut pipelines: Vec<Pipeline> = self.pipelines.read().await.values().cloned().collect();
        pipelines.sort_by_key(|p| p.id);
        Ok(pipelines)
    }
}

#[async_trait]
impl ExecutionStore for MemoryStorage {
    async fn create(&self, execution: Execution) -> EngineResult<Execution> {
        self.executions
            .write()
            .await
            .insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn find(&self, id: Uuid) -> EngineResult<Option<Execution>> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn update(&self, execution: Execution) -> EngineResult<Execution> {
        let mut executions = self.executions.write().await;
        if !executions.contains_key(&execution.id) {
            return Err(ExecutionError::NotFound {
                execution_id: execution.id,
            }
            .into());
        }
        executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn latest_running_for(&self, pipeline_id: i64) -> EngineResult<Option<Execution>> {
        Ok(self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.pipeline_id == pipeline_id && e.status == ExecutionStatus::Running)
            .max_by_key(|e| e.created_at)
            .cloned())
    }

    async fn for_pipeline(&self, pipeline_id: i64) -> EngineResult<Vec<Execution>> {
        let mut executions: Vec<Execution> = self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        executions.sort_by_key(|e| e.created_at);
        Ok(executions)
    }
}

#[async_trait]
impl ResultStore for MemoryStorage {
    async fn save(&self, result: ImportResult) -> EngineResult<()> {
        self.results
            .write()
            .await
            .insert(result.execution_id, result);
        Ok(())
    }

    async fn find_for_execution(&self, execution_id: Uuid) -> EngineResult<Option<ImportResult>> {
        Ok(self.results.read().await.get(&execution_id).cloned())
    }
}

/// TTL cache for plugin metadata, keyed under one namespace prefix
///
/// Used opportunistically for introspection payloads; never holds
/// correctness-critical state.
pub struct MetadataCache {
    prefix: String,
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, Value)>>,
}

impl MetadataCache {
    pub fn new(prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        let (stored_at, value) = entries.get(&self.namespaced(key))?;
        if stored_at.elapsed() > self.ttl {
            return None;
        }
        Some(value.clone())
    }

    pub async fn put(&self, key: &str, value: Value) {
        self.entries
            .write()
            .await
            .insert(self.namespaced(key), (Instant::now(), value));
    }

    pub async fn remember<F>(&self, key: &str, produce: F) -> Value
    where
        F: FnOnce() -> Value,
    {
        if let Some(cached) = self.get(key).await {
            return cached;
        }
        let value = produce();
        self.put(key, value.clone()).await;
        value
    }

    pub async fn forget(&self, key: &str) {
        self.entries.write().await.remove(&self.namespaced(key));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Row, TriggeredBy};
    use serde_json::json;

    fn pipeline(id: i64) -> Pipeline {
        serde_json::from_value(json!({
            "id": id,
            "organization_id": 7,
            "name": format!("pipeline-{id}"),
            "source": {"url": "https://example.com/feed.csv"},
            "reader": {"reader_type": "csv"},
            "schedule": {
                "frequency": {"kind": "daily"},
                "start_time": "06:00:00",
                "is_active": true
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn update_requires_an_existing_record() {
        let storage = MemoryStorage::new();
        let err = PipelineStore::update(&storage, pipeline(1)).await.unwrap_err();
        assert!(err.to_string().contains("Pipeline not found"));
    }

    #[tokio::test]
    async fn latest_running_ignores_terminal_executions() {
        let storage = MemoryStorage::new();
        let mut done = Execution::new(1, TriggeredBy::Manual);
        done.status = ExecutionStatus::Completed;
        ExecutionStore::create(&storage, done).await.unwrap();
        assert!(storage.latest_running_for(1).await.unwrap().is_none());

        let mut running = Execution::new(1, TriggeredBy::Manual);
        running.status = ExecutionStatus::Running;
        ExecutionStore::create(&storage, running.clone()).await.unwrap();
        let found = storage.latest_running_for(1).await.unwrap().unwrap();
        assert_eq!(found.id, running.id);
    }

    #[tokio::test]
    async fn one_result_per_execution() {
        let storage = MemoryStorage::new();
        let execution_id = Uuid::new_v4();
        for payload in ["first", "second"] {
            storage
                .save(ImportResult {
                    organization_id: 7,
                    pipeline_id: 1,
                    execution_id,
                    rows: vec![Row::from_iter([("v".to_string(), json!(payload))])],
                    saved_at: chrono::Utc::now(),
                })
                .await
                .unwrap();
        }
        let stored = storage.find_for_execution(execution_id).await.unwrap().unwrap();
        assert_eq!(stored.rows[0].get("v"), Some(&json!("second")));
    }

    #[tokio::test]
    async fn cache_honors_ttl_and_namespace() {
        let cache = MetadataCache::new("metadata", Duration::from_millis(20));
        cache.put("operators", json!(["equals"])).await;
        assert_eq!(cache.get("operators").await, Some(json!(["equals"])));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("operators").await.is_none());

        let value = cache.remember("operators", || json!(["equals", "in"])).await;
        assert_eq!(value, json!(["equals", "in"]));
        cache.forget("operators").await;
        assert!(cache.get("operators").await.is_none());
    }
}
