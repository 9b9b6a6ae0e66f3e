//! Stage chain orchestration
//!
//! Composes the seven pipes into one run, supports partial execution to a
//! target stage, and collects configuration problems up front so callers
//! can display them all at once. Stage execution is strictly sequential;
//! cancellation is honored between stages, never mid-stage.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use super::passable::Passable;
use super::pipes::{
    DownloadPipe, FilterPipe, ImagesPipe, MapPipe, PreparePipe, ReadPipe, SavePipe, StagePipe,
};
use crate::downloader::DownloaderFactory;
use crate::errors::{EngineError, EngineResult, PipelineError};
use crate::filter::{registry::OperatorMetadata, FilterEngine};
use crate::mapper::{transformers::TransformerMetadata, MapperEngine};
use crate::models::{ExecutionCounts, Pipeline, Stage};
use crate::prepare::images::ImagePreparer;
use crate::prepare::PrepareEngine;
use crate::reader::ReaderFactory;
use crate::storage::{MetadataCache, ResultStore};
use crate::utils::memory::{self, MemorySnapshot};

/// One configuration problem found by `validate_config`
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ValidationIssue {
    pub component: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.component, self.message)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StageTiming {
    pub stage: Stage,
    pub elapsed: Duration,
}

/// Result of one (possibly partial) run
#[derive(Debug)]
pub struct PipelineReport {
    pub target_stage: Stage,
    pub passable: Passable,
    pub elapsed: Duration,
    pub timings: Vec<StageTiming>,
    pub memory_start: MemorySnapshot,
    pub memory_peak: MemorySnapshot,
}

impl PipelineReport {
    pub fn counts(&self) -> ExecutionCounts {
        ExecutionCounts {
            read: self.passable.read.as_ref().map_or(0, |r| r.rows.len()),
            filtered: self.passable.filter.as_ref().map_or(0, |f| f.rows.len()),
            mapped: self.passable.map.as_ref().map_or(0, |m| m.rows.len()),
            saved: self.passable.save.as_ref().map_or(0, |s| s.saved),
        }
    }
}

pub struct Orchestrator {
    downloaders: Arc<DownloaderFactory>,
    readers: Arc<ReaderFactory>,
    filter: Arc<FilterEngine>,
    mapper: Arc<MapperEngine>,
    prepare: Arc<PrepareEngine>,
    pipes: Vec<Arc<dyn StagePipe>>,
    metadata_cache: MetadataCache,
}

const PLUGIN_CATALOG_TTL: Duration = Duration::from_secs(300);

impl Orchestrator {
    pub fn new(
        downloaders: Arc<DownloaderFactory>,
        readers: Arc<ReaderFactory>,
        filter: Arc<FilterEngine>,
        mapper: Arc<MapperEngine>,
        images: Arc<ImagePreparer>,
        prepare: Arc<PrepareEngine>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        let pipes: Vec<Arc<dyn StagePipe>> = vec![
            Arc::new(DownloadPipe {
                factory: downloaders.clone(),
            }),
            Arc::new(ReadPipe {
                factory: readers.clone(),
            }),
            Arc::new(FilterPipe {
                engine: filter.clone(),
            }),
            Arc::new(MapPipe {
                engine: mapper.clone(),
            }),
            Arc::new(ImagesPipe { preparer: images }),
            Arc::new(PreparePipe {
                engine: prepare.clone(),
            }),
            Arc::new(SavePipe { results }),
        ];
        Self {
            downloaders,
            readers,
            filter,
            mapper,
            prepare,
            pipes,
            metadata_cache: MetadataCache::new("plugins", PLUGIN_CATALOG_TTL),
        }
    }

    /// Run every stage
    pub async fn process(&self, pipeline: Pipeline) -> EngineResult<PipelineReport> {
        self.execute(pipeline, Stage::Save, None, &CancellationToken::new())
            .await
    }

    /// Run the stage prefix up to and including `target`; used for
    /// interactive previews that must not reach later stages
    pub async fn execute_to_stage(
        &self,
        pipeline: Pipeline,
        target: Stage,
    ) -> EngineResult<PipelineReport> {
        self.execute(pipeline, target, None, &CancellationToken::new())
            .await
    }

    pub async fn execute(
        &self,
        pipeline: Pipeline,
        target: Stage,
        execution_id: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> EngineResult<PipelineReport> {
        let issues = self.validate_config(&pipeline);
        if !issues.is_empty() {
            let summary = issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(EngineError::configuration(summary));
        }

        let pipeline_id = pipeline.id;
        let mut passable = match execution_id {
            Some(id) => Passable::new(pipeline).with_execution(id),
            None => Passable::new(pipeline),
        };

        let started = Instant::now();
        let memory_start = memory::current();
        let mut memory_peak = memory_start;
        let mut timings = Vec::new();

        for pipe in self.pipes.iter().filter(|p| p.stage().order() <= target.order()) {
            let stage = pipe.stage();
            if cancel.is_cancelled() {
                info!(pipeline_id, %stage, "run cancelled between stages");
                return Err(PipelineError::Cancelled { stage }.into());
            }

            let stage_started = Instant::now();
            if let Err(source) = pipe.handle(&mut passable).await {
                error!(pipeline_id, %stage, error = %source, "stage failed");
                return Err(PipelineError::StageFailed {
                    stage,
                    source: Box::new(source),
                }
                .into());
            }
            timings.push(StageTiming {
                stage,
                elapsed: stage_started.elapsed(),
            });

            let sample = memory::current();
            if sample.resident_bytes > memory_peak.resident_bytes {
                memory_peak = sample;
            }
        }

        let elapsed = started.elapsed();
        info!(
            pipeline_id,
            target = %target,
            elapsed_ms = elapsed.as_millis() as u64,
            memory_peak_mb = memory_peak.resident_mb(),
            "run complete"
        );
        Ok(PipelineReport {
            target_stage: target,
            passable,
            elapsed,
            timings,
            memory_start,
            memory_peak,
        })
    }

    /// Collect every configuration problem; never raises so interactive
    /// callers can show all of them together
    pub fn validate_config(&self, pipeline: &Pipeline) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        match pipeline.source.scheme() {
            None => issues.push(ValidationIssue {
                component: "source",
                message: format!("source url '{}' has no scheme", pipeline.source.url),
            }),
            Some(scheme) if !self.downloaders.has(&scheme) => issues.push(ValidationIssue {
                component: "source",
                message: format!(
                    "unsupported downloader scheme '{scheme}' (available: {})",
                    self.available_downloader_schemes().join(", ")
                ),
            }),
            Some(_) => {}
        }

        if !self.readers.has(&pipeline.reader.reader_type) {
            issues.push(ValidationIssue {
                component: "reader",
                message: format!(
                    "unsupported reader type '{}' (available: {})",
                    pipeline.reader.reader_type,
                    self.available_reader_types().join(", ")
                ),
            });
        }

        for rule in &pipeline.filters {
            match self.filter.registry().get(&rule.operator) {
                Err(_) => issues.push(ValidationIssue {
                    component: "filter",
                    message: format!("unknown operator '{}' for key '{}'", rule.operator, rule.key),
                }),
                Ok(operator) => {
                    if let Err(e) = operator.validate_rule(rule) {
                        issues.push(ValidationIssue {
                            component: "filter",
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        for message in self.mapper.validate_rules(&pipeline.mappings) {
            issues.push(ValidationIssue {
                component: "mapping",
                message,
            });
        }

        if let Some(resolver) = &pipeline.resolver {
            if !self.prepare.registry().has(resolver) {
                issues.push(ValidationIssue {
                    component: "prepare",
                    message: format!("unknown resolver '{resolver}'"),
                });
            }
        }

        issues
    }

    pub fn available_downloader_schemes(&self) -> Vec<String> {
        self.downloaders
            .available_schemes()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn available_reader_types(&self) -> Vec<String> {
        self.readers
            .available_types()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn available_filter_operators(&self) -> Vec<OperatorMetadata> {
        self.filter.registry().metadata()
    }

    pub fn available_transformations(&self) -> Vec<TransformerMetadata> {
        self.mapper.registry().metadata()
    }

    pub fn available_resolvers(&self) -> Vec<&'static str> {
        self.prepare.registry().names()
    }

    /// Full plugin catalog for introspection surfaces, served from the
    /// metadata cache; registries never change after construction
    pub async fn plugin_catalog(&self) -> serde_json::Value {
        self.metadata_cache
            .remember("catalog", || {
                serde_json::json!({
                    "downloader_schemes": self.available_downloader_schemes(),
                    "reader_types": self.available_reader_types(),
                    "filter_operators": self.available_filter_operators(),
                    "transformations": self.available_transformations(),
                    "resolvers": self.available_resolvers(),
                })
            })
            .await
    }
}
