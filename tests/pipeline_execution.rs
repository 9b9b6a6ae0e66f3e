//! End-to-end runs of the stage chain against an in-memory source.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use feedpipe::downloader::{DownloadRequest, DownloadResult, Downloader, DownloaderFactory};
use feedpipe::errors::DownloaderError;
use feedpipe::filter::{registry::OperatorRegistry, FilterEngine};
use feedpipe::mapper::MapperEngine;
use feedpipe::models::{OptionBag, Pipeline, Stage};
use feedpipe::options::OptionDefinitions;
use feedpipe::pipeline::Orchestrator;
use feedpipe::prepare::images::ImagePreparer;
use feedpipe::prepare::PrepareEngine;
use feedpipe::reader::ReaderFactory;
use feedpipe::storage::{MemoryStorage, ResultStore};

/// Serves fixed bytes for `mem://` source URLs
struct StaticDownloader {
    content: &'static str,
}

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
            content: self.content.as_bytes().to_vec(),
            filename: Some("feed.csv".to_string()),
            content_type: Some("text/csv".to_string()),
            status: Some(200),
        })
    }
}

fn orchestrator(content: &'static str, storage: Arc<MemoryStorage>) -> Orchestrator {
    let mut downloaders = DownloaderFactory::new();
    downloaders.register(Arc::new(StaticDownloader { content }));
    Orchestrator::new(
        Arc::new(downloaders),
        Arc::new(ReaderFactory::with_builtins()),
        Arc::new(FilterEngine::new(Arc::new(OperatorRegistry::with_builtins()))),
        Arc::new(MapperEngine::default()),
        Arc::new(ImagePreparer::new("media", 2)),
        Arc::new(PrepareEngine::default()),
        storage,
    )
}

fn pipeline(value: serde_json::Value) -> Pipeline {
    serde_json::from_value(value).unwrap()
}

fn base_pipeline() -> serde_json::Value {
    json!({
        "id": 1,
        "organization_id": 42,
        "name": "products",
        "source": {"url": "mem://feed.csv"},
        "reader": {"reader_type": "csv"},
        "schedule": {
            "frequency": {"kind": "daily"},
            "start_time": "06:00:00",
            "is_active": true
        }
    })
}

#[tokio::test]
async fn csv_float_mapping_records_errors_and_defaults() {
    let storage = MemoryStorage::shared();
    let orchestrator = orchestrator(
        "id,name,price\n1,Widget,9.99\n2,Gadget,abc\n",
        storage.clone(),
    );

    let mut config = base_pipeline();
    config["mappings"] = json!([
        {"source_field": "price", "target_field": "unit_price", "transformation": "float", "default_value": 0.0}
    ]);

    let report = orchestrator.process(pipeline(config)).await.unwrap();
    let map = report.passable.map.as_ref().unwrap();
    assert_eq!(map.rows[0].get("unit_price"), Some(&json!(9.99)));
    assert_eq!(map.rows[1].get("unit_price"), Some(&json!(0.0)));
    assert_eq!(map.errors.len(), 1);
    assert!(map.errors.contains_key(&1));

    let counts = report.counts();
    assert_eq!(counts.read, 2);
    assert_eq!(counts.saved, 2);

    let execution_id = report.passable.save.as_ref().unwrap().execution_id;
    let saved = storage.find_for_execution(execution_id).await.unwrap().unwrap();
    assert_eq!(saved.organization_id, 42);
    assert_eq!(saved.rows.len(), 2);
}

#[tokio::test]
async fn in_operator_filter_survivors_and_stats() {
    let storage = MemoryStorage::shared();
    let orchestrator = orchestrator(
        "id,status\n1,active\n2,closed\n3,pending\n",
        storage.clone(),
    );

    let mut config = base_pipeline();
    config["filters"] = json!([
        {"key": "status", "operator": "in", "value": ["active", "pending"]}
    ]);

    let report = orchestrator.process(pipeline(config)).await.unwrap();
    let filter = report.passable.filter.as_ref().unwrap();
    assert_eq!(filter.stats.total, 3);
    assert_eq!(filter.stats.passed, 2);
    assert_eq!(filter.stats.failed, 1);
    assert_eq!(filter.rows.len(), 2);
}

#[tokio::test]
async fn partial_execution_stops_at_the_target_stage() {
    let storage = MemoryStorage::shared();
    let orchestrator = orchestrator("id,status\n1,active\n", storage.clone());

    let report = orchestrator
        .execute_to_stage(pipeline(base_pipeline()), Stage::Filter)
        .await
        .unwrap();

    assert!(report.passable.download.is_some());
    assert!(report.passable.read.is_some());
    assert!(report.passable.filter.is_some());
    assert!(report.passable.map.is_none());
    assert!(report.passable.prepare.is_none());
    assert!(report.passable.save.is_none());
    assert_eq!(report.timings.len(), 3);

    assert!(report.passable.has_result(Stage::Filter));
    assert!(!report.passable.has_result(Stage::Save));
    // the latest populated row set is the filter output
    assert_eq!(report.passable.current_rows().unwrap().len(), 1);
}

#[tokio::test]
async fn the_plugin_catalog_is_cached_and_complete() {
    let orchestrator = orchestrator("", MemoryStorage::shared());

    let catalog = orchestrator.plugin_catalog().await;
    assert_eq!(catalog["downloader_schemes"], json!(["mem"]));
    assert_eq!(catalog["reader_types"], json!(["csv", "json", "xml"]));
    let transformations = catalog["transformations"].as_array().unwrap();
    assert!(transformations.iter().any(|t| t["name"] == "float"));
    let operators = catalog["filter_operators"].as_array().unwrap();
    assert_eq!(operators.len(), 16);

    assert_eq!(orchestrator.plugin_catalog().await, catalog);
}

#[tokio::test]
async fn unknown_scheme_fails_validation_before_the_pipe_chain() {
    let storage = MemoryStorage::shared();
    let orchestrator = orchestrator("", storage.clone());

    let mut config = base_pipeline();
    config["source"] = json!({"url": "smb://host/share/feed.csv"});
    let config = pipeline(config);

    let issues = orchestrator.validate_config(&config);
    assert_eq!(issues.len(), 1);
    assert!(issues[0]
        .message
        .contains("unsupported downloader scheme 'smb'"));

    let err = orchestrator.process(config).await.unwrap_err();
    assert!(err.to_string().contains("unsupported downloader scheme"));
}

#[tokio::test]
async fn validation_collects_every_problem_at_once() {
    let storage = MemoryStorage::shared();
    let orchestrator = orchestrator("", storage.clone());

    let mut config = base_pipeline();
    config["source"] = json!({"url": "smb://host/feed"});
    config["reader"] = json!({"reader_type": "yaml"});
    config["filters"] = json!([{"key": "a", "operator": "almost_equals", "value": 1}]);
    config["mappings"] = json!([
        {"source_field": "a", "target_field": "b", "transformation": "sparkle"}
    ]);
    config["resolver"] = json!("nonexistent");

    let issues = orchestrator.validate_config(&pipeline(config));
    assert_eq!(issues.len(), 5);
}

#[tokio::test]
async fn reader_parse_failure_halts_with_the_read_stage() {
    let storage = MemoryStorage::shared();
    let orchestrator = orchestrator("id,name\n\"unterminated\n", storage.clone());

    let err = orchestrator
        .process(pipeline(base_pipeline()))
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Stage read failed"), "got: {message}");
}

#[tokio::test]
async fn cancellation_is_honored_between_stages() {
    let storage = MemoryStorage::shared();
    let orchestrator = orchestrator("id\n1\n", storage.clone());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = orchestrator
        .execute(pipeline(base_pipeline()), Stage::Save, None, &cancel)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cancelled"));
}
